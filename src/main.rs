use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use trmnl_bridge::{
    ClientFactory, Config, ConnectionState, Dispatcher, Error, MergeStrategy, Operation, Payload,
    RateLimitSettings,
};

/// TRMNL - Rate-limited pushes to TRMNL e-ink displays
#[derive(Parser)]
#[command(name = "trmnl", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/trmnl/config.toml)
    #[arg(short, long, env = "TRMNL_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show an image on a device
    PushImage {
        /// Device id from the config file
        device: String,
        /// URL of the image to display
        image_url: String,
        /// Refresh rate in seconds
        #[arg(short, long)]
        refresh_rate: Option<u32>,
    },
    /// Push template merge variables to a device
    PushVariables {
        /// Device id from the config file
        device: String,
        /// Variables as a JSON object
        variables: String,
        /// Merge strategy: `deep_merge` or `stream`
        #[arg(short, long, default_value = "deep_merge")]
        strategy: MergeStrategy,
    },
    /// Show what a device is displaying
    Status {
        /// Device id from the config file
        device: String,
    },
    /// Check that a device API is reachable
    Test {
        /// Device id from the config file
        device: String,
    },
    /// List configured devices
    Devices {
        /// Also run a connection test against each device
        #[arg(long)]
        check: bool,
    },
    /// Read JSON commands from stdin, one per line, and answer on stdout
    Serve,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn,trmnl_bridge=info",
        1 => "info,trmnl_bridge=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Dispatcher plus the per-device limiter settings from the config file
struct Bridge {
    dispatcher: Dispatcher,
    settings: HashMap<String, RateLimitSettings>,
    defaults: RateLimitSettings,
}

impl Bridge {
    fn from_config(config: Config) -> Self {
        let dispatcher = Dispatcher::new(ClientFactory::new(config.request_timeout));
        let mut settings = HashMap::new();
        for profile in config.devices {
            settings.insert(profile.device.device_id.clone(), profile.rate_limit);
            dispatcher.register(profile.device);
        }
        Self {
            dispatcher,
            settings,
            defaults: config.default_rate_limit,
        }
    }

    fn settings_for(&self, device_id: &str) -> RateLimitSettings {
        self.settings
            .get(device_id)
            .copied()
            .unwrap_or(self.defaults)
    }

    async fn invoke(&self, device_id: &str, operation: Operation) -> trmnl_bridge::Result<Payload> {
        self.dispatcher
            .invoke(device_id, operation, self.settings_for(device_id))
            .await
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    tracing::debug!(devices = config.devices.len(), "loaded configuration");
    let bridge = Arc::new(Bridge::from_config(config));

    let (device, operation) = match cli.command {
        Command::PushImage {
            device,
            image_url,
            refresh_rate,
        } => (
            device,
            Operation::PushImage {
                image_url,
                refresh_rate,
            },
        ),
        Command::PushVariables {
            device,
            variables,
            strategy,
        } => {
            let variables: serde_json::Map<String, Value> =
                serde_json::from_str(&variables).context("variables must be a JSON object")?;
            (
                device,
                Operation::PushVariables {
                    variables,
                    merge_strategy: strategy,
                },
            )
        }
        Command::Status { device } => (device, Operation::GetStatus),
        Command::Test { device } => (device, Operation::TestConnection),
        Command::Devices { check } => return list_devices(&bridge, check).await,
        Command::Serve => return serve(bridge).await,
    };

    let reads_status = operation == Operation::GetStatus;
    match bridge.invoke(&device, operation).await {
        Ok(payload) => {
            println!("{}", serde_json::to_string_pretty(&payload)?);
            Ok(())
        }
        Err(e) => {
            if let Some(wait) = e.retry_after() {
                eprintln!("{e}; try again in {} seconds", wait.as_secs());
            }
            if reads_status && let Some(state) = e.connection_state() {
                println!("{device}: {state}");
            }
            Err(e.into())
        }
    }
}

async fn list_devices(bridge: &Bridge, check: bool) -> anyhow::Result<()> {
    let ids = bridge.dispatcher.device_ids();
    if ids.is_empty() {
        println!("No devices configured");
        return Ok(());
    }

    let reachability: Vec<Option<bool>> = if check {
        futures::future::join_all(ids.iter().map(|id| async move {
            Some(bridge.invoke(id, Operation::TestConnection).await.is_ok())
        }))
        .await
    } else {
        vec![None; ids.len()]
    };

    for (id, reachable) in ids.iter().zip(reachability) {
        let Some(device) = bridge.dispatcher.device(id) else {
            continue;
        };
        let settings = bridge.settings_for(id);
        let limit = if settings.enabled {
            format!("{}/h", settings.rate_limit_per_hour)
        } else {
            "unlimited".to_string()
        };
        let status = match reachable {
            Some(true) => " [reachable]",
            Some(false) => " [unreachable]",
            None => "",
        };
        println!(
            "{id}  {}  {}  {limit}{status}",
            device.implementation_type, device.endpoint_base_url
        );
    }
    Ok(())
}

/// One answer line in `serve` mode
#[derive(Serialize)]
struct Reply {
    device_id: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorReply>,
}

#[derive(Serialize)]
struct ErrorReply {
    kind: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_secs: Option<f64>,
    /// Device reachability, when the call got as far as the device API
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<ConnectionState>,
}

impl Reply {
    fn from_result(device_id: String, result: trmnl_bridge::Result<Payload>) -> Self {
        match result {
            Ok(payload) => Self {
                device_id,
                ok: true,
                payload: Some(payload),
                error: None,
            },
            Err(e) => Self {
                device_id,
                ok: false,
                payload: None,
                error: Some(ErrorReply {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                    retry_after_secs: e.retry_after().map(|d| d.as_secs_f64()),
                    state: e.connection_state(),
                }),
            },
        }
    }
}

/// Split a command line into device id and operation
fn parse_command(line: &str) -> Result<(String, Operation), String> {
    let mut value: Value = serde_json::from_str(line).map_err(|e| format!("invalid JSON: {e}"))?;
    let device_id = value
        .as_object_mut()
        .and_then(|obj| obj.remove("device_id"))
        .and_then(|id| id.as_str().map(ToString::to_string))
        .ok_or_else(|| "missing device_id".to_string())?;
    let operation = serde_json::from_value(value).map_err(|e| format!("invalid operation: {e}"))?;
    Ok((device_id, operation))
}

async fn serve(bridge: Arc<Bridge>) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::channel::<String>(64);

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            if let Err(e) = stdout.write_all(format!("{line}\n").as_bytes()).await {
                tracing::warn!(error = %e, "failed to write reply");
                break;
            }
            if let Err(e) = stdout.flush().await {
                tracing::warn!(error = %e, "failed to flush reply");
            }
        }
    });

    tracing::info!(devices = bridge.dispatcher.device_ids().len(), "serving commands from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let tx = tx.clone();
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move {
            let reply = match parse_command(&line) {
                Ok((device_id, operation)) => {
                    let result = bridge.invoke(&device_id, operation).await;
                    Reply::from_result(device_id, result)
                }
                Err(message) => Reply::from_result(
                    String::new(),
                    Err(Error::Config(message)),
                ),
            };
            match serde_json::to_string(&reply) {
                Ok(json) => {
                    if tx.send(json).await.is_err() {
                        tracing::warn!("reply dropped, output closed");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "failed to encode reply"),
            }
        });
    }

    drop(tx);
    writer.await?;
    Ok(())
}
