//! almadeploy CLI entrypoint.
//!
//! Resolves the configuration, installs logging, then runs the selected
//! command raced against SIGINT/SIGTERM.

use std::io::Write;
use std::path::Path;
use std::process::ExitCode;

use almadeploy::cli::{Cli, Commands, OutputFormatter};
use almadeploy::config::{ConfigParser, DeployConfig, HostLayout, find_config_file};
use almadeploy::error::{DeployError, Result};
use almadeploy::host::SystemHost;
use almadeploy::orchestrator::Orchestrator;
use almadeploy::probe::HttpHealthProbe;

use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse_args();

    let config = resolve_config(&cli);
    let log_file = match &config {
        Ok(config) => Some(HostLayout::from_config(config).log_file),
        Err(_) => None,
    };
    let _guard = init_logging(cli.verbose, log_file.as_deref());

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::from(e.exit_code());
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let code = runtime.block_on(async {
        tokio::select! {
            code = run(&cli, &config) => code,
            signal = shutdown_signal() => {
                let err = DeployError::Interrupted { signal };
                warn!("{err}; host may be partially provisioned, rerun to converge");
                err.exit_code()
            }
        }
    });

    ExitCode::from(code)
}

/// Loads `.env` and layers file, environment and flags.
fn resolve_config(cli: &Cli) -> Result<DeployConfig> {
    let cwd = std::env::current_dir()?;
    let config_file = cli.config.clone().or_else(|| find_config_file(&cwd));
    let env_dir = config_file
        .as_deref()
        .and_then(Path::parent)
        .map_or_else(|| cwd.clone(), Path::to_path_buf);

    let parser = ConfigParser::new().with_base_path(env_dir);
    parser.load_dotenv()?;
    parser.resolve(config_file.as_deref(), &cwd, &cli.overrides())
}

/// Installs the console layer and, when the file can be opened, an
/// append-only file layer. The returned guard flushes the file on drop.
fn init_logging(verbose: bool, log_file: Option<&Path>) -> Option<WorkerGuard> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let console = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let file = log_file.map(|path| (path, open_log_file(path)));
    match file {
        Some((_, Ok(appender))) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        Some((path, Err(e))) => {
            tracing_subscriber::registry().with(filter).with(console).init();
            warn!("Cannot open log file {}: {e}; logging to console only", path.display());
            None
        }
        None => {
            tracing_subscriber::registry().with(filter).with(console).init();
            None
        }
    }
}

fn open_log_file(path: &Path) -> std::io::Result<tracing_appender::rolling::RollingFileAppender> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a file path"))?;
    std::fs::create_dir_all(dir)?;
    // The appender only reports open failures lazily.
    std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    Ok(tracing_appender::rolling::never(dir, name))
}

/// Resolves when SIGINT or SIGTERM arrives, yielding the signal name.
async fn shutdown_signal() -> String {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for SIGINT: {e}");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => String::from("SIGINT"),
        () = terminate => String::from("SIGTERM"),
    }
}

/// Runs the selected command and returns the process exit code.
async fn run(cli: &Cli, config: &DeployConfig) -> u8 {
    let formatter = OutputFormatter::new(cli.output);
    let host = SystemHost::new();
    let probe = match HttpHealthProbe::new(&config.health) {
        Ok(probe) => probe,
        Err(e) => {
            error!("{e}");
            return e.exit_code();
        }
    };
    let orchestrator = Orchestrator::new(config, &host, &probe);

    let result = match cli.action() {
        Commands::Plan => orchestrator.check_config().map(|_| {
            let plan = orchestrator.plan();
            (formatter.format_plan(&plan, orchestrator.layout()), 0)
        }),
        Commands::Validate => orchestrator
            .validate()
            .await
            .map(|report| (formatter.format_validation(&report), 0)),
        Commands::Deploy => {
            info!("Starting deployment of {}", config.domain);
            orchestrator
                .deploy()
                .await
                .map(|report| (formatter.format_report(&report), report.exit_code()))
        }
        Commands::Health => orchestrator
            .health()
            .await
            .map(|report| (formatter.format_report(&report), report.exit_code())),
    };

    match result {
        Ok((output, code)) => {
            emit(&output);
            code
        }
        Err(e) => {
            error!("{e}");
            e.exit_code()
        }
    }
}

fn emit(output: &str) {
    let mut stdout = std::io::stdout().lock();
    if let Err(e) = writeln!(stdout, "{output}").and_then(|()| stdout.flush()) {
        error!("Failed to write output: {e}");
    }
}

