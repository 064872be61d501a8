use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Directories holding this crate's own sources. Anything else in the tree
// (vendored data, scratch files) is not subject to the source policy.
const SOURCE_DIRS: [&str; 6] = ["analysis", "tree", "impute", "cli", "tests", "benches"];

/// One source-policy rule: a line regex plus a filter deciding whether a
/// matching line is really a violation.
struct Rule {
    name: &'static str,
    pattern: &'static str,
    advice: &'static str,
    is_violation: fn(&str) -> bool,
}

// Collects every violating line of a single file.
struct ViolationCollector {
    violations: Vec<String>,
    is_violation: fn(&str) -> bool,
}

impl Sink for ViolationCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if (self.is_violation)(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn is_comment_line(line: &str) -> bool {
    line.trim_start().starts_with("//") || line.contains("/*")
}

fn is_doc_comment(line: &str) -> bool {
    line.trim_start().starts_with("///") || line.trim_start().starts_with("//!")
}

/// Underscore-prefixed names in code. Comments and string literals are skipped.
fn underscore_in_code(line: &str) -> bool {
    if is_comment_line(line) {
        return false;
    }
    let in_string = line
        .split('"')
        .enumerate()
        .any(|(i, part)| i % 2 == 1 && part.contains('_'));
    !in_string
}

fn always(_: &str) -> bool {
    true
}

fn stars_outside_doc_comments(line: &str) -> bool {
    !is_doc_comment(line)
}

/// Comments whose alphabetic characters are all uppercase.
fn shouting_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    let text = if let Some(rest) = trimmed.strip_prefix("///") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("//") {
        rest
    } else if let Some(idx) = line.find("/*") {
        let rest = &line[idx + 2..];
        rest.find("*/").map_or(rest, |end| &rest[..end])
    } else {
        return false;
    };
    let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
    !letters.is_empty() && letters.iter().all(|c| c.is_uppercase())
}

const RULES: [Rule; 5] = [
    Rule {
        name: "underscore-prefixed names",
        pattern: r"\b(_[a-zA-Z0-9_]+)\b",
        advice: "Either use the binding (removing the underscore) or remove it completely.",
        is_violation: underscore_in_code,
    },
    Rule {
        name: "forbidden comment words",
        pattern: r"(//|/\*).*(?:FIXED|CORRECTED|FIX|FIXES|NEW|CHANGED|CHANGES|CHANGE|MODIFIED|MODIFIES|MODIFY|UPDATED|UPDATES|UPDATE)",
        advice: "Comments must describe the code as it is, not its history.",
        is_violation: always,
    },
    Rule {
        name: "'**' in regular comments",
        pattern: r"(//|/\*).*\*\*",
        advice: "Bold markers are allowed in doc comments only.",
        is_violation: stars_outside_doc_comments,
    },
    Rule {
        name: "all-uppercase comments",
        pattern: r"(//|/\*).*",
        advice: "Strongly consider deleting the comment completely.",
        is_violation: shouting_comment,
    },
    Rule {
        name: "#[allow(dead_code)] attributes",
        pattern: r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
        advice: "Either use the code (removing the attribute) or remove it completely.",
        is_violation: always,
    },
];

fn rust_sources() -> Vec<PathBuf> {
    SOURCE_DIRS
        .iter()
        .filter(|dir| Path::new(dir).is_dir())
        .flat_map(|dir| WalkDir::new(dir).into_iter().filter_map(|e| e.ok()))
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
        .collect()
}

fn check(rule: &Rule, sources: &[PathBuf]) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(rule.pattern)?;
    let mut searcher = Searcher::new();
    for path in sources {
        let mut collector = ViolationCollector {
            violations: Vec::new(),
            is_violation: rule.is_violation,
        };
        searcher.search_path(&matcher, path, &mut collector)?;
        if !collector.violations.is_empty() {
            let mut message = format!(
                "\n❌ ERROR: Found {} {} in {}:\n",
                collector.violations.len(),
                rule.name,
                path.display()
            );
            for violation in &collector.violations {
                message.push_str(&format!("   {violation}\n"));
            }
            message.push_str(&format!(
                "\n⚠️ {} are not allowed in this project.\n   {}\n",
                rule.name, rule.advice
            ));
            return Err(message.into());
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in SOURCE_DIRS {
        println!("cargo:rerun-if-changed={dir}");
    }

    let build_timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    println!("cargo:rustc-env=MAMMOTREE_BUILD_TIMESTAMP={build_timestamp}");

    let sources = rust_sources();
    for rule in &RULES {
        if let Err(e) = check(rule, &sources) {
            // Printed to stderr so cargo shows it when the build fails.
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
