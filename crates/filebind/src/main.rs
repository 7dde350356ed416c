//! filebind command-line interface.
//!
//! Runs jobs whose parameters may be files, and retrieves those files from
//! finished builds.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use filebind_logging::{init_logging, LogConfig};
use filebind_params::{install_default_listeners, BuildResult, CancellationToken};
use filebind_protocol::{paths, SystemConfig};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::warn;

mod cli;

use cli::build::{BuildArgs, BuildSummary};
use cli::context::CliContext;

#[derive(Parser, Debug)]
#[command(name = "filebind", about = "Run jobs with file parameters")]
struct Cli {
    /// filebind home (stash, nodes, build records, logs)
    #[arg(long, global = true, env = "FILEBIND_HOME")]
    home: Option<PathBuf>,

    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Set parameters and build a job
    Build {
        /// Job definition (TOML)
        job: PathBuf,

        /// Parameter assignment NAME=VALUE. For file parameters an empty
        /// VALUE reads the content from stdin; anything else is base64.
        #[arg(short = 'p', long = "param")]
        params: Vec<String>,

        /// Wait for completion and exit with the build result
        #[arg(short = 'f', long)]
        follow: bool,

        /// Node for steps that do not name one
        #[arg(long)]
        node: Option<String>,

        /// Output a JSON summary
        #[arg(long)]
        json: bool,
    },

    /// Write a file parameter of a build to a file or stdout
    Download {
        /// Build id
        build_id: String,

        /// Parameter name
        name: String,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print a saved build record as JSON
    Show {
        /// Build id
        build_id: String,
    },

    /// Check whether a name is acceptable as a parameter name
    CheckName {
        name: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn command_wants_json(command: &Commands) -> bool {
    matches!(
        command,
        Commands::Build { json: true, .. } | Commands::CheckName { json: true, .. }
    )
}

/// Run blocking work while Ctrl-C cancels `cancel`.
fn with_interrupt<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(CancellationToken) -> Result<T> + Send + 'static,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .context("Failed to start runtime")?;
    runtime.block_on(async move {
        let cancel = CancellationToken::new();
        let watcher = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, cancelling");
                    cancel.cancel();
                }
            })
        };
        let result = tokio::task::spawn_blocking(move || work(cancel))
            .await
            .context("Command task failed")?;
        watcher.abort();
        result
    })
}

fn print_build_summary(summary: &BuildSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }
    println!(
        "Build {} #{} ({}) finished: {} [started {}, {} ms]",
        summary.job,
        summary.number,
        summary.build_id,
        summary.result,
        summary.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        summary.duration_ms
    );
    Ok(())
}

fn run_command(cli: Cli, config: SystemConfig) -> Result<ExitCode> {
    let ctx = CliContext::new(config);
    match cli.command {
        Commands::Build {
            job,
            params,
            follow,
            node,
            json,
        } => {
            let args = BuildArgs {
                job_file: job,
                params,
                node,
                json,
            };
            let summary = with_interrupt(move |cancel| {
                cli::build::run(&ctx, &args, &mut io::stdin().lock(), cancel)
            })?;
            print_build_summary(&summary, json)?;
            if follow && summary.result != BuildResult::Success {
                return Ok(ExitCode::from(1));
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Download {
            build_id,
            name,
            output,
        } => {
            let written = with_interrupt(move |cancel| {
                cli::download::run(&ctx, &build_id, &name, output.as_deref(), cancel)
            })?;
            tracing::info!(bytes = written, "download complete");
            Ok(ExitCode::SUCCESS)
        }
        Commands::Show { build_id } => {
            println!("{}", cli::show::run(&ctx, &build_id)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::CheckName { name, json } => {
            let check = cli::check_name::run(&name);
            if json {
                println!("{}", serde_json::to_string_pretty(&check)?);
            } else if let Some(message) = &check.message {
                println!("ERROR: {}", message);
            } else {
                println!("OK");
            }
            Ok(if check.valid {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let json_mode = command_wants_json(&cli.command);

    let home = cli.home.clone().unwrap_or_else(paths::filebind_home);
    let config = match SystemConfig::load_from(home) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("ERROR: {}", err);
            return ExitCode::from(1);
        }
    };

    if let Err(err) = init_logging(LogConfig {
        app_name: "filebind",
        verbose: cli.verbose,
        log_dir: config.logs_dir.clone(),
    }) {
        eprintln!("Warning: failed to initialize logging: {:#}", err);
    }
    install_default_listeners();

    match run_command(cli, config) {
        Ok(code) => code,
        Err(err) => {
            if json_mode {
                cli::error::print_json_error(&err);
            } else {
                eprintln!("{:?}", err);
            }
            ExitCode::from(1)
        }
    }
}
