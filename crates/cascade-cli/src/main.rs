//! `cascade` binary

use cascade_cli::{
    cycles_report, dry_run, dry_run_report, init_tracing, load_config, load_schema, parse_seeds, plan_report,
    validate_report, DryRunOptions,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Dependency-ordered cascade generation tools
#[derive(Parser)]
#[command(name = "cascade")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log level when RUST_LOG is unset
    #[arg(long, env = "CASCADE_LOG_LEVEL", default_value = "warn", global = true)]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a schema and scan it for hard cycles
    Validate {
        /// Schema file (.json, .yaml)
        schema: PathBuf,
    },
    /// Print the generation order and levels for a root type
    Plan {
        /// Schema file
        schema: PathBuf,
        /// Root type
        root: String,
    },
    /// List hard cycles
    Cycles {
        /// Schema file
        schema: PathBuf,
    },
    /// Run a cascade with a deterministic stub generator
    DryRun {
        /// Schema file
        schema: PathBuf,
        /// Root type
        root: String,
        /// Scheduler configuration (TOML)
        #[arg(short, long, env = "CASCADE_CONFIG")]
        config: Option<PathBuf>,
        /// Depth override
        #[arg(long)]
        max_depth: Option<usize>,
        /// Generate level by level
        #[arg(long)]
        levels: bool,
        /// Root seed as key=value, repeatable
        #[arg(long = "set", value_name = "KEY=VALUE")]
        seeds: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs);

    match cli.command {
        Command::Validate { schema } => {
            let schema = load_schema(&schema)?;
            let report = validate_report(&schema)?;
            print!("{report}");
            if !report.is_ok() {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Plan { schema, root } => {
            print!("{}", plan_report(&load_schema(&schema)?, &root)?);
            Ok(())
        }
        Command::Cycles { schema } => {
            let cycles = cycles_report(&load_schema(&schema)?)?;
            for cycle in &cycles {
                println!("{cycle}");
            }
            std::process::exit(i32::from(!cycles.is_empty()));
        }
        Command::DryRun {
            schema,
            root,
            config,
            max_depth,
            levels,
            seeds,
        } => {
            let options = DryRunOptions {
                root,
                seed: parse_seeds(&seeds)?,
                max_depth,
                levels,
            };
            let outcome = dry_run(load_schema(&schema)?, load_config(config.as_deref())?, options).await?;
            println!("{}", serde_json::to_string_pretty(&dry_run_report(&outcome)?)?);
            Ok(())
        }
    }
}
