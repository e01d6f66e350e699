use anyhow::Context;
use bt_wind_receiver::domain::models::AppEvent;
use bt_wind_receiver::domain::settings::{Settings, SettingsService, TransportKind};
use bt_wind_receiver::infrastructure::bluetooth::transport::{Connector, TcpConnector};
use bt_wind_receiver::infrastructure::bluetooth::LinkService;
use bt_wind_receiver::infrastructure::logging::init_logger;
use bt_wind_receiver::presentation::console::{ConsoleInput, WindDisplay};
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "bt-wind-receiver", version, about = "Bluetooth wind station receiver")]
struct Cli {
    /// Settings file (defaults to the per-user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bluetooth address of the wind station
    #[arg(long)]
    address: Option<String>,

    /// RFCOMM channel
    #[arg(long)]
    channel: Option<u8>,

    /// Connect through a serial-over-TCP bridge at HOST:PORT instead of RFCOMM
    #[arg(long, value_name = "HOST:PORT")]
    tcp: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Write the effective settings back to the settings file
    #[arg(long)]
    save_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings_service = match cli.config {
        Some(path) => SettingsService::load(path),
        None => SettingsService::new()?,
    };
    let settings = settings_service.get_mut();
    if let Some(address) = cli.address {
        settings.link.device_address = address;
    }
    if let Some(channel) = cli.channel {
        settings.link.rfcomm_channel = channel;
    }
    if let Some(tcp) = cli.tcp {
        settings.link.transport = TransportKind::Tcp;
        settings.link.tcp_address = tcp;
    }
    if let Some(level) = cli.log_level {
        settings.log_settings.level = level;
    }

    let settings = settings_service.get().clone();
    let _logging_guard = init_logger(&settings.log_settings)?;
    if let Some(e) = settings_service.load_error() {
        warn!(
            "Ignoring settings file {}, using defaults: {:#}",
            settings_service.path().display(),
            e
        );
    }
    settings.link.validate().context("invalid link settings")?;

    if cli.save_config {
        settings_service.save()?;
        info!("Saved settings to {}", settings_service.path().display());
    }

    info!(
        "Starting Bluetooth wind receiver (settings: {})",
        settings_service.path().display()
    );

    match settings.link.transport {
        TransportKind::Tcp => run(TcpConnector::new(&settings.link.tcp_address), &settings).await,
        TransportKind::Rfcomm => run_rfcomm(&settings).await,
    }
}

#[cfg(target_os = "linux")]
async fn run_rfcomm(settings: &Settings) -> anyhow::Result<()> {
    use bt_wind_receiver::domain::models::BdAddr;
    use bt_wind_receiver::infrastructure::bluetooth::rfcomm::RfcommConnector;

    let address: BdAddr = settings.link.device_address.parse()?;
    run(
        RfcommConnector::new(address, settings.link.rfcomm_channel),
        settings,
    )
    .await
}

#[cfg(not(target_os = "linux"))]
async fn run_rfcomm(_settings: &Settings) -> anyhow::Result<()> {
    anyhow::bail!("RFCOMM sockets are only supported on Linux; use --tcp with a serial bridge")
}

async fn run<C: Connector>(connector: C, settings: &Settings) -> anyhow::Result<()> {
    info!("Connecting to {}", connector.peer());
    let (service, mut events) = LinkService::start(connector, &settings.link);
    let mut display = WindDisplay::default();
    let mut input = spawn_stdin_reader();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    println!("{}", display.render());
    println!("Keys: l = toggle lights, r = reset gust, q = quit");

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if let AppEvent::Telemetry(message) = &event {
                    if !message.extra.is_empty() {
                        debug!("Extra telemetry fields: {:?}", message.extra);
                    }
                }
                if display.handle_event(&event) {
                    println!("{}", display.render());
                }
            }
            Some(line) = input.recv() => {
                match ConsoleInput::parse(&line) {
                    Some(ConsoleInput::Command(command)) => {
                        info!("Sending {:?}", command);
                        service.enqueue_command(command);
                    }
                    Some(ConsoleInput::Quit) => break,
                    None => {}
                }
            }
            _ = &mut ctrl_c => {
                info!("Ctrl-C received");
                break;
            }
        }
    }

    service.shutdown().await?;
    println!("{}", WindDisplay::default().render());
    info!("Bluetooth wind receiver stopped");
    Ok(())
}

/// Forward stdin lines from a plain thread; a blocking read must not hold up
/// runtime shutdown.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });
    rx
}
