use std::{path::PathBuf, sync::Arc};

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    tracing::{error, info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
    wagate_config::{Severity, ValidationResult, WagateConfig},
    wagate_gateway::{LogFileLayer, shutdown_signal, start_gateway},
    wagate_whatsapp::{ChannelClient, ReconnectPolicy, SidecarClient, SidecarOptions},
};

#[derive(Parser)]
#[command(name = "wagate", version, about = "wagate: WhatsApp Web message gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error). Overrides `logging.level`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,
    /// Port to listen on (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,
    /// Directory holding `wagate.toml` (overrides the default search path).
    #[arg(long, global = true, env = "WAGATE_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway (default when no subcommand is provided).
    Serve,
    /// Validate the configuration and report errors/warnings.
    CheckConfig,
}

impl Cli {
    fn apply_overrides(&self, config: &mut WagateConfig) {
        if let Some(ref bind) = self.bind {
            config.server.bind.clone_from(bind);
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(ref level) = self.log_level {
            config.logging.level.clone_from(level);
        }
    }
}

/// Install the global subscriber: console output plus the JSONL files when
/// `logging.dir` is set.
fn init_telemetry(json_logs: bool, config: &WagateConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let file_layer = match config.logging.dir {
        Some(ref dir) => Some(
            LogFileLayer::open(dir)
                .with_context(|| format!("opening log directory {}", dir.display()))?,
        ),
        None => None,
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);

    if json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
    Ok(())
}

/// Route panics through tracing so they land in `error.log`.
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic| {
        let location = panic
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();
        error!(%location, panic = %panic, "process panicked");
        default_hook(panic);
    }));
}

/// Load config before the global subscriber exists, so loader warnings
/// still reach stderr.
fn load_config(cli: &Cli) -> WagateConfig {
    let bootstrap = fmt().with_writer(std::io::stderr).with_target(false).finish();
    let mut config = tracing::subscriber::with_default(bootstrap, || {
        wagate_config::discover_and_load(cli.config_dir.as_deref())
    });
    cli.apply_overrides(&mut config);
    config
}

const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn print_diagnostics(result: &ValidationResult) {
    for d in &result.diagnostics {
        let (color, label) = match d.severity {
            Severity::Error => (RED, "error"),
            Severity::Warning => (YELLOW, "warning"),
        };
        eprintln!("  {BOLD}{color}{label}{RESET} {}: {}", d.path, d.message);
    }
}

/// Print the effective configuration as JSON, then its diagnostics.
fn check_config(config: &WagateConfig) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    let result = wagate_config::validate(config);
    print_diagnostics(&result);
    if result.diagnostics.is_empty() {
        eprintln!("No issues found.");
    }
    if result.has_errors() {
        anyhow::bail!("configuration is invalid");
    }
    Ok(())
}

async fn serve(config: WagateConfig) -> anyhow::Result<()> {
    let result = wagate_config::validate(&config);
    for d in &result.diagnostics {
        match d.severity {
            Severity::Error => error!(path = d.path, "{}", d.message),
            Severity::Warning => warn!(path = d.path, "{}", d.message),
        }
    }
    if result.has_errors() {
        anyhow::bail!("refusing to start with an invalid configuration");
    }

    let client: Arc<dyn ChannelClient> =
        Arc::new(SidecarClient::new(SidecarOptions::from(&config)));
    let session = wagate_whatsapp::spawn(client, ReconnectPolicy::from(&config.reconnect));

    // A failed first attempt is reported through the session state and
    // retried by the reconnect policy, so startup continues either way.
    if let Err(e) = session.initialize().await {
        warn!(error = %e, "initial WhatsApp initialization failed");
    }

    start_gateway(&config, session, shutdown_signal()).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = load_config(&cli);

    match cli.command {
        Some(Commands::CheckConfig) => check_config(&config),
        None | Some(Commands::Serve) => {
            init_telemetry(cli.json_logs, &config)?;
            install_panic_hook();
            info!(
                version = env!("CARGO_PKG_VERSION"),
                environment = %config.server.environment,
                "wagate starting"
            );
            serve(config).await
        },
    }
}
