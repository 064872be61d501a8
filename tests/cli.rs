use mammotree::fixtures::{SyntheticMasses, render_csv};
use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::tempdir;

fn write_masses(dir: &Path, rows: usize) -> String {
    let path = dir.join("masses.csv");
    let table = SyntheticMasses::new(rows).missing_rate(0.05).seed(21).build();
    fs::write(&path, render_csv(&table, false)).expect("write mass data");
    path.to_str().expect("path str").to_string()
}

fn write_quick_config(dir: &Path) -> String {
    let path = dir.join("quick.toml");
    fs::write(
        &path,
        "[impute]\nimputations = 2\niterations = 2\n\n[tuning]\nfolds = 4\nrepeats = 1\ntune_length = 3\n",
    )
    .expect("write config");
    path.to_str().expect("path str").to_string()
}

fn mammotree(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_mammotree"))
        .current_dir(dir)
        .args(args)
        .output()
        .expect("run mammotree cli")
}

#[test]
fn explore_prints_tables_without_writing_files() {
    let tmp = tempdir().expect("temporary directory");
    let data = write_masses(tmp.path(), 120);
    let output = mammotree(tmp.path(), &["explore", &data]);

    assert!(output.status.success(), "CLI exited with status {:?}", output.status);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("severity"));
    assert!(stdout.contains("margin"));
    assert_eq!(fs::read_dir(tmp.path()).expect("list dir").count(), 1);
}

#[test]
fn impute_writes_a_complete_table() {
    let tmp = tempdir().expect("temporary directory");
    let data = write_masses(tmp.path(), 150);
    let config = write_quick_config(tmp.path());
    let output = mammotree(tmp.path(), &["impute", &data, "--config", &config, "--pooled"]);
    assert!(output.status.success(), "CLI exited with status {:?}", output.status);

    let completed = fs::read_to_string(tmp.path().join("completed.csv")).expect("completed.csv");
    let lines: Vec<&str> = completed.lines().collect();
    assert_eq!(lines[0], "bi_rads,age,shape,margin,density,severity");
    assert_eq!(lines.len(), 151);
    assert!(!completed.contains('?'));
}

#[test]
fn train_then_infer_produces_predictions() {
    let tmp = tempdir().expect("temporary directory");
    let data = write_masses(tmp.path(), 200);
    let config = write_quick_config(tmp.path());

    let trained = mammotree(tmp.path(), &["train", &data, "--config", &config, "--seed", "5"]);
    assert!(trained.status.success(), "train exited with status {:?}", trained.status);
    assert!(tmp.path().join("model.toml").exists(), "model.toml missing");

    let inferred = mammotree(tmp.path(), &["infer", &data, "--model", "model.toml"]);
    assert!(inferred.status.success(), "infer exited with status {:?}", inferred.status);
    let predictions =
        fs::read_to_string(tmp.path().join("predictions.tsv")).expect("predictions.tsv");
    let mut lines = predictions.lines();
    assert_eq!(lines.next(), Some("row\tprediction\tprob_malignant"));
    assert_eq!(lines.count(), 200);
}

#[test]
fn unreadable_input_exits_with_an_error() {
    let tmp = tempdir().expect("temporary directory");
    let output = mammotree(tmp.path(), &["explore", "missing.csv"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error:"));
}

#[test]
fn conflicting_imputation_choices_are_rejected() {
    let tmp = tempdir().expect("temporary directory");
    let data = write_masses(tmp.path(), 50);
    let output = mammotree(tmp.path(), &["impute", &data, "--pooled", "--use", "2"]);
    assert!(!output.status.success());
}

#[test]
fn version_reports_the_package_version() {
    let tmp = tempdir().expect("temporary directory");
    let output = mammotree(tmp.path(), &["version"]);
    assert!(output.status.success(), "CLI exited with status {:?}", output.status);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with(&format!("mammotree {}", env!("CARGO_PKG_VERSION"))));
    assert!(stdout.contains("Built:"));
}
