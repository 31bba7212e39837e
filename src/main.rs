/// Version injected at compile time via RMFACTS_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("RMFACTS_VERSION") {
    Some(v) => v,
    None => "dev",
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rmfacts::arm::auth::{self, AccessToken, Environment};
use rmfacts::config::Config;
use rmfacts::facts::binder::{ParamValue, RawParams};
use rmfacts::facts::engine::FactEngine;
use rmfacts::facts::registry;
use rmfacts::FactsError;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use url::Url;

/// Read-only resource facts for Azure Resource Manager
#[derive(Parser, Debug)]
#[command(name = "rmfacts", version = VERSION, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level for debugging
    #[arg(long, global = true, value_enum, default_value = "off")]
    log_level: LogLevel,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List registered fact modules
    List,

    /// Show a fact module's parameters and read operations
    Describe {
        /// Fact module id
        id: String,
    },

    /// Run a fact module and print its result envelope
    Run {
        /// Fact module id
        id: String,

        /// Parameter as key=value; repeat a key to pass a list
        #[arg(short = 'p', long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Parameters as a JSON object; -p entries take precedence
        #[arg(long, value_name = "JSON")]
        params_json: Option<String>,

        /// Subscription to query
        #[arg(short, long)]
        subscription: Option<String>,

        /// Resource-manager endpoint
        #[arg(long)]
        endpoint: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let tracing_level = level.to_tracing_level()?;

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file {:?}: {}", log_path, e);
            return None;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("rmfacts {} started with log level: {:?}", VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Some(guard)
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("rmfacts").join("rmfacts.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".rmfacts").join("rmfacts.log");
    }
    PathBuf::from("rmfacts.log")
}

/// Host-facing failure: a category and a message, printed as JSON
struct Failure {
    kind: &'static str,
    msg: String,
}

impl From<FactsError> for Failure {
    fn from(err: FactsError) -> Self {
        Self {
            kind: err.kind(),
            msg: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for Failure {
    fn from(err: anyhow::Error) -> Self {
        Self {
            kind: "invalid_invocation",
            msg: format!("{:#}", err),
        }
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<(), Failure> {
    let text = serde_json::to_string_pretty(value).context("serializing output")?;
    println!("{}", text);
    Ok(())
}

/// Merge `--params-json` and repeated `-p key=value` into one mapping
fn collect_params(pairs: &[String], params_json: Option<&str>) -> Result<RawParams> {
    let mut raw = RawParams::new();

    if let Some(text) = params_json {
        let value: Value = serde_json::from_str(text).context("--params-json is not valid JSON")?;
        let Value::Object(map) = value else {
            bail!("--params-json must be a JSON object");
        };
        for (key, value) in map {
            raw.insert(key, ParamValue::from(value));
        }
    }

    let mut from_flags: Vec<(String, Vec<String>)> = Vec::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("parameter {:?} is not KEY=VALUE", pair);
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("parameter {:?} has an empty key", pair);
        }
        match from_flags.iter_mut().find(|(k, _)| k == key) {
            Some((_, values)) => values.push(value.to_string()),
            None => from_flags.push((key.to_string(), vec![value.to_string()])),
        }
    }

    for (key, mut values) in from_flags {
        let value = if values.len() == 1 {
            ParamValue::String(values.remove(0))
        } else {
            ParamValue::from(values)
        };
        raw.insert(key, value);
    }

    Ok(raw)
}

fn list_descriptors() -> Result<(), Failure> {
    let listing: Vec<Value> = registry::get_registry()
        .iter()
        .map(|d| {
            json!({
                "id": d.id,
                "client": d.client.name,
                "result_key": d.result_key,
            })
        })
        .collect();
    print_json(&listing)
}

fn describe_descriptor(id: &str) -> Result<(), Failure> {
    let descriptor = registry::get_descriptor(id)
        .ok_or_else(|| FactsError::UnknownDescriptor(id.to_string()))?;
    print_json(&descriptor.summary())
}

async fn run_descriptor(
    id: &str,
    pairs: &[String],
    params_json: Option<&str>,
    subscription: Option<String>,
    endpoint: Option<String>,
) -> Result<(), Failure> {
    let mut config = Config::load();
    let raw = collect_params(pairs, params_json)?;

    let subscription = subscription
        .or_else(|| config.effective_subscription())
        .unwrap_or_default();

    let endpoint = endpoint.unwrap_or_else(|| config.effective_endpoint());
    let endpoint = Url::parse(&endpoint).map_err(|e| {
        FactsError::ClientUnavailable(format!("invalid endpoint {}: {}", endpoint, e))
    })?;

    let credentials = auth::get_access_token().unwrap_or_else(|| AccessToken::new(""));
    let env = Environment::new(subscription, endpoint, credentials);

    tracing::info!("Running {} against {}", id, env.resource_manager_endpoint);

    let envelope = FactEngine::new().run(id, &raw, &env).await?;

    if let Err(e) = config.set_last_descriptor(id) {
        tracing::warn!("Failed to save config: {}", e);
    }

    print_json(&envelope)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level);

    let result = match args.command {
        Command::List => list_descriptors(),
        Command::Describe { id } => describe_descriptor(&id),
        Command::Run {
            id,
            params,
            params_json,
            subscription,
            endpoint,
        } => run_descriptor(&id, &params, params_json.as_deref(), subscription, endpoint).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(failure) => {
            tracing::error!("{}: {}", failure.kind, failure.msg);
            println!(
                "{}",
                json!({"failed": true, "error": failure.kind, "msg": failure.msg})
            );
            ExitCode::FAILURE
        }
    }
}
