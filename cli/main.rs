#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use mammotree::config::AnalysisConfig;
use mammotree::data::{load_mass_table, load_prediction_table};
use mammotree::explore::explore;
use mammotree::impute::{CompletedSelection, impute};
use mammotree::model::{TrainedModel, write_predictions};
use mammotree::pipeline::run_analysis;
use mammotree::report::{
    render_exploration, render_imputation, render_load_summary, render_report,
};

#[derive(Args)]
pub struct ImputeArgs {
    /// Path to the mass records (CSV, '?' marks a missing value)
    pub data: String,

    /// Where to write the completed table
    #[arg(long, default_value = "completed.csv")]
    pub output: PathBuf,

    /// Write the per-cell consensus over all imputations
    #[arg(long, conflicts_with = "chain")]
    pub pooled: bool,

    /// Write the completed table of imputation N (1-based)
    #[arg(long = "use", value_name = "N")]
    pub chain: Option<usize>,
}

#[derive(Args)]
pub struct TrainArgs {
    /// Path to the labelled mass records
    pub data: String,

    /// Where to write the trained model
    #[arg(long, default_value = "model.toml")]
    pub output: String,

    /// Feed the pooled imputation to the tree instead of a single chain
    #[arg(long)]
    pub pooled: bool,
}

#[derive(Args)]
pub struct InferArgs {
    /// Path to the records to classify (severity column optional)
    pub data: String,

    /// Path to trained model file (.toml)
    #[arg(long)]
    pub model: String,

    /// Where to write the predictions
    #[arg(long, default_value = "predictions.tsv")]
    pub output: PathBuf,
}

#[derive(Parser)]
#[command(
    name = "mammotree",
    about = "Imputation, exploration and pruned classification trees for mammographic masses",
    version
)]
pub struct Cli {
    /// TOML file with analysis settings; defaults apply to anything it omits
    #[arg(long, global = true, value_name = "TOML")]
    pub config: Option<String>,

    /// Overrides the configured random seed
    #[arg(long, global = true, value_name = "N")]
    pub seed: Option<u64>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Summarize the raw records: frequencies, crosstabs and missing patterns
    #[command(about = "Explore a mass record file")]
    Explore {
        /// Path to the mass records
        data: String,
    },

    /// Fill in missing values by chained-equation imputation
    #[command(about = "Impute missing values (outputs: completed.csv)")]
    Impute(ImputeArgs),

    /// Run the full analysis and save the pruned tree
    #[command(about = "Train a severity tree (outputs: model.toml)")]
    Train(TrainArgs),

    /// Apply a trained tree to new records
    #[command(about = "Predict severity with a trained tree (outputs: predictions.tsv)")]
    Infer(InferArgs),

    /// Display version and build information
    #[command(about = "Display version and build information")]
    Version,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let Cli {
        config,
        seed,
        command,
    } = cli;

    let result = match command {
        Some(Commands::Explore { data }) => {
            load_config(config.as_deref(), seed).and_then(|c| run_explore(&data, &c))
        }
        Some(Commands::Impute(args)) => {
            load_config(config.as_deref(), seed).and_then(|c| run_impute(args, c))
        }
        Some(Commands::Train(args)) => {
            load_config(config.as_deref(), seed).and_then(|c| train(args, c))
        }
        Some(Commands::Infer(args)) => {
            load_config(config.as_deref(), seed).and_then(|c| infer(args, &c))
        }
        Some(Commands::Version) => {
            print_version_info();
            Ok(())
        }
        None => {
            if let Err(e) = Cli::command().print_help() {
                eprintln!("Error: {e}");
            }
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn load_config(
    path: Option<&str>,
    seed: Option<u64>,
) -> Result<AnalysisConfig, Box<dyn std::error::Error>> {
    let mut config = match path {
        Some(path) => AnalysisConfig::load(path)?,
        None => AnalysisConfig::default(),
    };
    if let Some(seed) = seed {
        config.seed = seed;
    }
    Ok(config)
}

fn run_explore(data: &str, config: &AnalysisConfig) -> Result<(), Box<dyn std::error::Error>> {
    let (table, summary) = load_mass_table(data, &config.data)?;
    print!("{}", render_load_summary(&summary)?);
    print!("{}", render_exploration("Raw data", &explore(&table))?);
    Ok(())
}

fn run_impute(args: ImputeArgs, mut config: AnalysisConfig) -> Result<(), Box<dyn std::error::Error>> {
    if args.pooled {
        config.impute.use_completed = CompletedSelection::Pooled;
    } else if let Some(k) = args.chain {
        config.impute.use_completed = CompletedSelection::Chain(k);
    }
    config.validate()?;

    let (table, summary) = load_mass_table(&args.data, &config.data)?;
    print!("{}", render_load_summary(&summary)?);

    let imputation = impute(&table, &config.impute, config.seed)?;
    print!("{}", render_imputation(&imputation)?);

    let completed = imputation.select(config.impute.use_completed)?;
    completed.write_csv(&args.output, &config.data.missing_token)?;
    println!(
        "Completed table ({} rows) written to {}",
        completed.n_rows(),
        args.output.display()
    );
    Ok(())
}

pub fn train(args: TrainArgs, mut config: AnalysisConfig) -> Result<(), Box<dyn std::error::Error>> {
    if args.pooled {
        config.impute.use_completed = CompletedSelection::Pooled;
    }
    println!("Loading training data from: {}", args.data);
    let report = run_analysis(&args.data, &config)?;
    print!("{}", render_report(&report)?);

    report.model.save(&args.output)?;
    println!("Model saved to: {}", args.output);
    Ok(())
}

pub fn infer(args: InferArgs, config: &AnalysisConfig) -> Result<(), Box<dyn std::error::Error>> {
    let model = TrainedModel::load(&args.model)?;
    println!(
        "Loaded a tree with {} splits over {} predictors (cp {:.5})",
        model.tree.split_count(),
        model.predictors.len(),
        model.selected_cp
    );

    let (table, summary) = load_prediction_table(&args.data, &config.data)?;
    print!("{}", render_load_summary(&summary)?);

    let predictions = model.predict(&table)?;
    write_predictions(&args.output, &predictions)?;
    let malignant = predictions.iter().filter(|p| p.class == 1).count();
    println!(
        "Predicted {malignant} of {} records as malignant; results written to {}",
        predictions.len(),
        args.output.display()
    );
    Ok(())
}

/// Format seconds into a human-readable duration like "2.4 hours ago"
fn format_duration_ago(seconds: u64) -> String {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;

    if seconds < MINUTE {
        format!("{seconds} seconds ago")
    } else if seconds < HOUR {
        format!("{:.1} minutes ago", seconds as f64 / MINUTE as f64)
    } else if seconds < DAY {
        format!("{:.1} hours ago", seconds as f64 / HOUR as f64)
    } else {
        format!("{:.1} days ago", seconds as f64 / DAY as f64)
    }
}

fn print_version_info() {
    let version = env!("CARGO_PKG_VERSION");
    let build_timestamp: u64 = env!("MAMMOTREE_BUILD_TIMESTAMP").parse().unwrap_or(0);

    println!("mammotree {version}");

    if build_timestamp > 0 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        if now > build_timestamp {
            println!("Built: {}", format_duration_ago(now - build_timestamp));
        } else {
            println!("Built: just now");
        }
    }
}
