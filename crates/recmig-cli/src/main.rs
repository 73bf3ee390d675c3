//! recmig command-line client
//!
//! Runs a migration script from a run directory and prints the summary.

mod formatter;
mod prompt;

use clap::{Parser, Subcommand};
use formatter::OutputFormat;
use recmig_core::script::DEFAULT_SCRIPT_FILE;
use recmig_core::{ConfirmPolicy, MigrationRunner, Script};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// recmig record migrator
#[derive(Parser, Debug)]
#[command(name = "recmig")]
#[command(version, about = "Migrate related records between stores by external id")]
pub struct Args {
    /// More log output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a migration script
    Run {
        /// Run directory holding the script, data files and reports
        #[arg(long, default_value = ".")]
        path: PathBuf,

        /// Script file, relative to the run directory
        #[arg(long, default_value = DEFAULT_SCRIPT_FILE)]
        script: PathBuf,

        /// Password for encrypted credentials and data files
        #[arg(long)]
        password: Option<String>,

        /// Only check and repair the source files
        #[arg(long)]
        validate_only: bool,

        /// Continue without asking when diagnostics are found
        #[arg(long)]
        no_prompt: bool,

        /// Output format
        #[arg(long, default_value = "table", value_enum)]
        format: OutputFormat,
    },
    /// Encrypt a credential value for use in a script
    Encrypt {
        #[arg(long)]
        password: String,

        value: String,
    },
}

fn main() {
    let args = Args::parse();
    init_tracing(&args);

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing(args: &Args) {
    let level = if args.verbose {
        "debug"
    } else if args.quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("recmig={level}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    match args.command {
        Command::Run {
            path,
            script,
            password,
            validate_only,
            no_prompt,
            format,
        } => run_script(path, script, password, validate_only, no_prompt, format),
        Command::Encrypt { password, value } => {
            println!("{}", recmig_core::encrypt_value(&password, &value)?);
            Ok(())
        }
    }
}

fn run_script(
    path: PathBuf,
    script: PathBuf,
    password: Option<String>,
    validate_only: bool,
    no_prompt: bool,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let script = Script::load(&path.join(script))?;
    let mut runner = MigrationRunner::from_script(script, &path, password)?;
    if validate_only {
        runner.config_mut().validate_only = true;
    }
    if no_prompt {
        runner.config_mut().prompt_on_issues = false;
    }

    let report = if runner.config().prompt_on_issues {
        runner.run(&mut prompt::TerminalConfirm::new())?
    } else {
        runner.run(&mut ConfirmPolicy::AlwaysContinue)?
    };
    println!("{}", formatter::format_report(&report, format));
    Ok(())
}
