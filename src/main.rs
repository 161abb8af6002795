//! tfpilot CLI entrypoint.
//!
//! This is the main entrypoint for the tfpilot command-line tool. Results
//! (change tree, state index) go to stdout; tool output, prompts and logs go
//! to stderr.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use tfpilot::cli::{Cli, Commands, OutputFormat, OutputFormatter};
use tfpilot::config::{discover_var_files, ConfigParser, ConfigValidator, PilotConfig};
use tfpilot::error::{ConfigError, Result, TfPilotError};
use tfpilot::runner::ProcessRunner;
use tfpilot::session::{Outcome, SessionContext, SessionController, ToolCommands};

use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

type Session = SessionController<ProcessRunner>;

/// Exit code used when the operator cancels a running command.
const EXIT_CANCELLED: u8 = 130;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();
    let formatter = OutputFormatter::new(cli.output);

    // Initialize logging
    init_logging(cli.verbose, cli.output == OutputFormat::Json);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", formatter.error(&e.to_string()));
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system. JSON output also switches logs to JSON.
fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<ExitCode> {
    let formatter = OutputFormatter::new(cli.output);
    let workdir = resolve_workdir(&cli.dir)?;

    let parser = ConfigParser::new().with_base_path(&workdir);
    parser.load_dotenv()?;
    let config = parser.load(cli.config.as_deref())?;
    let validation = ConfigValidator::new().validate(&config, &workdir)?;
    for warning in &validation.warnings {
        warn!("{warning}");
    }

    let context = SessionContext::new(&workdir);
    let initialized = context.is_initialized();
    let session = Arc::new(build_session(&config, context));
    let printer = OutputPrinter::spawn(&session, &formatter);
    spawn_cancel_on_ctrl_c(Arc::clone(&session));

    let result = match cli.command {
        Commands::Init => cmd_init(&session, &formatter).await,
        Commands::Plan { var_files } => {
            let var_files = select_var_files(var_files, &config, &workdir)?;
            warn_uninitialized(initialized, &formatter);
            cmd_plan(&session, var_files, &formatter).await
        }
        Commands::Apply { var_files, yes } => {
            let var_files = select_var_files(var_files, &config, &workdir)?;
            warn_uninitialized(initialized, &formatter);
            cmd_apply(&session, var_files, yes, &formatter).await
        }
        Commands::State { search } => cmd_state(&session, search.as_deref(), &formatter).await,
    };

    printer.finish().await;
    result
}

/// Checks that the working directory exists and makes it absolute.
fn resolve_workdir(dir: &Path) -> Result<PathBuf> {
    let workdir = std::fs::canonicalize(dir).map_err(|_| {
        TfPilotError::Config(ConfigError::InvalidWorkdir {
            path: dir.to_path_buf(),
        })
    })?;
    if !workdir.is_dir() {
        return Err(TfPilotError::Config(ConfigError::InvalidWorkdir { path: workdir }));
    }
    Ok(workdir)
}

fn build_session(config: &PilotConfig, context: SessionContext) -> Session {
    let runner = ProcessRunner::new()
        .with_grace_period(config.tool.grace_period())
        .with_channel_capacity(config.tool.channel_capacity);
    SessionController::new(runner, ToolCommands::from_config(&config.tool), context)
}

/// Picks variable files: flags, then configuration, then the first file
/// found in the workdir.
fn select_var_files(
    flags: Vec<PathBuf>,
    config: &PilotConfig,
    workdir: &Path,
) -> Result<Vec<PathBuf>> {
    if !flags.is_empty() {
        ConfigValidator::new().validate_selection(&flags, workdir)?;
        return Ok(flags);
    }
    if !config.var_files.is_empty() {
        return Ok(config.var_files.clone());
    }

    let discovered = discover_var_files(workdir)?;
    match discovered.split_first() {
        Some((first, rest)) => {
            info!("Using variable file: {}", first.display());
            if !rest.is_empty() {
                info!(
                    "Ignoring {} other variable files; pass --var-file to choose",
                    rest.len()
                );
            }
            Ok(vec![first.clone()])
        }
        None => {
            debug!("No variable files found");
            Ok(Vec::new())
        }
    }
}

fn warn_uninitialized(initialized: bool, formatter: &OutputFormatter) {
    if !initialized {
        eprintln!(
            "{}",
            formatter.warning("Working directory is not initialized; run 'tfpilot init' first")
        );
    }
}

/// Streams tool output to stderr while commands run.
struct OutputPrinter {
    task: JoinHandle<()>,
    stop: oneshot::Sender<()>,
}

impl OutputPrinter {
    fn spawn(session: &Session, formatter: &OutputFormatter) -> Self {
        let mut lines = session.subscribe_output();
        let formatter = formatter.clone();
        let (stop, mut stopped) = oneshot::channel();
        let task = tokio::spawn(async move {
            loop {
                // Queued lines are printed before the stop request is seen.
                tokio::select! {
                    biased;
                    received = lines.recv() => match received {
                        Ok(line) => eprintln!("{}", formatter.format_output_line(&line)),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Skipped {skipped} output lines");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = &mut stopped => break,
                }
            }
        });
        Self { task, stop }
    }

    /// Prints every line already produced, then stops.
    async fn finish(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.task.await {
            warn!("Output printer stopped abnormally: {e}");
        }
    }
}

/// Cancels the running command on Ctrl-C. Exits if nothing is running.
fn spawn_cancel_on_ctrl_c(session: Arc<Session>) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !session.cancel() {
                eprintln!("Interrupted.");
                std::process::exit(i32::from(EXIT_CANCELLED));
            }
        }
    });
}

fn cancelled(formatter: &OutputFormatter, what: &str) -> ExitCode {
    eprintln!("{}", formatter.warning(&format!("{what} cancelled")));
    ExitCode::from(EXIT_CANCELLED)
}

/// Initialize the working directory.
async fn cmd_init(session: &Session, formatter: &OutputFormatter) -> Result<ExitCode> {
    match session.initialize().await? {
        Outcome::Completed(_) => {
            eprintln!("{}", formatter.success("Working directory initialized"));
            Ok(ExitCode::SUCCESS)
        }
        Outcome::Cancelled => Ok(cancelled(formatter, "Initialization")),
    }
}

/// Create a plan and show it.
async fn cmd_plan(
    session: &Session,
    var_files: Vec<PathBuf>,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    match session.plan(var_files).await? {
        Outcome::Completed(change_set) => {
            println!("{}", formatter.format_change_set(&change_set));
            Ok(ExitCode::SUCCESS)
        }
        Outcome::Cancelled => Ok(cancelled(formatter, "Plan")),
    }
}

/// Plan, confirm and apply.
async fn cmd_apply(
    session: &Session,
    var_files: Vec<PathBuf>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let change_set = match session.plan(var_files).await? {
        Outcome::Completed(change_set) => change_set,
        Outcome::Cancelled => return Ok(cancelled(formatter, "Plan")),
    };

    println!("{}", formatter.format_change_set(&change_set));
    if !change_set.summary.has_changes() {
        eprintln!("{}", formatter.success("No changes to apply."));
        return Ok(ExitCode::SUCCESS);
    }

    // Confirm
    if !auto_approve {
        eprint!("Do you want to apply this plan? [y/N]: ");
        std::io::stderr().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            eprintln!("Apply cancelled.");
            return Ok(ExitCode::SUCCESS);
        }
    }

    match session.apply().await? {
        Outcome::Completed(_) => {
            eprintln!(
                "{}",
                formatter.success(&format!("Applied: {}", change_set.summary))
            );
            reload_state(session, formatter).await;
            Ok(ExitCode::SUCCESS)
        }
        Outcome::Cancelled => Ok(cancelled(formatter, "Apply")),
    }
}

/// Reads state again after an apply. Failures are reported, not fatal.
async fn reload_state(session: &Session, formatter: &OutputFormatter) {
    match session.refresh_state().await {
        Ok(Outcome::Completed(index)) => eprintln!(
            "{}",
            formatter.success(&format!(
                "State reloaded: {}",
                OutputFormatter::format_index_summary(&index)
            ))
        ),
        Ok(Outcome::Cancelled) => {
            eprintln!("{}", formatter.warning("State refresh cancelled"));
        }
        Err(e) => eprintln!(
            "{}",
            formatter.warning(&format!("Could not reload state after apply: {e}"))
        ),
    }
}

/// Show recorded state.
async fn cmd_state(
    session: &Session,
    search: Option<&str>,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    match session.refresh_state().await? {
        Outcome::Completed(index) => {
            let shown = search.map_or_else(|| index.as_ref().clone(), |q| index.search(q));
            println!("{}", formatter.format_index(&shown));
            Ok(ExitCode::SUCCESS)
        }
        Outcome::Cancelled => Ok(cancelled(formatter, "State refresh")),
    }
}
