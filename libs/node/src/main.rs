//! harbor-node - Host or reach a harbor component.
//!
//! Usage:
//!   harbor-node [--config <path>] [--data-path <dir>] serve --name <component>
//!   harbor-node ping --name <component> [--max-retries N] [--quiet] [--factor F]
//!   harbor-node call --name <component> <method> [key=value ...]
//!   harbor-node exit --name <component>

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use harbor_core::{Config, ConnectOptions};
use harbor_fabric::{Arguments, ComponentConnector, ComponentPublisher, EventBus, Value};

mod component;

use component::NodeComponent;

#[derive(Parser)]
#[command(name = "harbor-node", version, about = "Publish or reach a harbor component")]
struct Cli {
    /// Configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory, overrides the configuration file
    #[arg(long, global = true)]
    data_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Publish a component until it is asked to exit
    Serve {
        #[arg(long)]
        name: String,
    },
    /// Check a component is alive
    Ping(Target),
    /// Call a method on a component
    Call {
        #[command(flatten)]
        target: Target,
        method: String,
        /// Arguments as key=value
        args: Vec<String>,
    },
    /// Ask a component to shut down
    Exit(Target),
}

#[derive(Args)]
struct Target {
    /// Component name
    #[arg(long)]
    name: String,

    /// Give up after this many retries
    #[arg(long)]
    max_retries: Option<u32>,

    /// Do not log failed connection attempts
    #[arg(long)]
    quiet: bool,

    /// Backoff growth multiplier
    #[arg(long)]
    factor: Option<f64>,
}

impl Target {
    fn options(&self, defaults: &ConnectOptions) -> ConnectOptions {
        ConnectOptions {
            max_retries: self.max_retries.or(defaults.max_retries),
            quiet: self.quiet || defaults.quiet,
            factor: self.factor.or(defaults.factor),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("failed to load {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };
    if let Some(data_path) = cli.data_path {
        config.data_path = data_path;
    }

    let result = match cli.command {
        Command::Serve { name } => {
            let log_path = config.data_path.join("logs").join(format!("{name}.log"));
            setup_logging(&config.log_level, Some(&log_path));
            serve(&config, &name).await
        }
        Command::Ping(target) => {
            setup_logging(&config.log_level, None);
            ping(&config, &target).await
        }
        Command::Call {
            target,
            method,
            args,
        } => {
            setup_logging(&config.log_level, None);
            call(&config, &target, &method, &args).await
        }
        Command::Exit(target) => {
            setup_logging(&config.log_level, None);
            exit(&config, &target).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn serve(config: &Config, name: &str) -> harbor_fabric::Result<()> {
    let component = Arc::new(NodeComponent::new(name));
    let mut publisher = ComponentPublisher::new(Arc::clone(&component), config);
    publisher.start().await?;

    tokio::select! {
        _ = component.exit_requested() => {}
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
    }

    publisher.stop().await;
    Ok(())
}

async fn ping(config: &Config, target: &Target) -> harbor_fabric::Result<()> {
    let connector = ComponentConnector::new(&target.name, config, EventBus::new());
    let remote = connector.connect(target.options(&config.connect)).await?;
    let alive = remote.ping().await?;
    println!("{}: {}", target.name, if alive { "alive" } else { "not alive" });
    connector.disconnect();
    Ok(())
}

async fn call(
    config: &Config,
    target: &Target,
    method: &str,
    args: &[String],
) -> harbor_fabric::Result<()> {
    let arguments = parse_arguments(args)?;
    let connector = ComponentConnector::new(&target.name, config, EventBus::new());
    let remote = connector.connect(target.options(&config.connect)).await?;
    let answer = remote.call(method, arguments).await?;
    println!("{:?}", answer);
    connector.disconnect();
    Ok(())
}

async fn exit(config: &Config, target: &Target) -> harbor_fabric::Result<()> {
    let connector = ComponentConnector::new(&target.name, config, EventBus::new());
    let remote = connector.connect(target.options(&config.connect)).await?;
    remote.exit().await?;
    connector.disconnect();
    Ok(())
}

fn parse_arguments(args: &[String]) -> harbor_fabric::Result<Arguments> {
    args.iter().try_fold(Arguments::new(), |arguments, arg| {
        let (key, raw) = arg.split_once('=').ok_or_else(|| {
            harbor_fabric::Error::Codec(format!("Expected key=value, got '{}'", arg))
        })?;
        Ok(arguments.arg(key, parse_value(raw)))
    })
}

fn parse_value(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        Value::Int(i)
    } else if let Ok(f) = raw.parse::<f64>() {
        Value::Float(f)
    } else if let Ok(b) = raw.parse::<bool>() {
        Value::Bool(b)
    } else {
        Value::Str(raw.to_string())
    }
}

fn setup_logging(level: &str, log_path: Option<&Path>) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Try to open log file, fall back to stderr
    let file = log_path.and_then(|path| {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).ok()?;
        }
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });

    if let Some(file) = file {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(file)
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}
