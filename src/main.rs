use clap::{Parser, Subcommand};
use serial_binding::config::{Config, ConfigLoader, LogFormat, LoggingConfig};
use serial_binding::{Binding, Transport};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    version,
    about = "Inspect and monitor serial ports.",
    long_about = "Lists serial devices and streams data from one of them. With --mock, the simulated devices from the configuration file are used instead of the operating system's ports."
)]
struct Cli {
    /// Configuration file (overrides the standard search path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Use the simulated devices from the `mock` config section
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List available devices
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Open a device and print everything it sends
    Monitor {
        /// Device path or configured alias
        path: String,

        /// Baud rate (defaults to the configured value)
        #[arg(short, long)]
        baud: Option<u32>,

        /// Allow other sessions to share the device
        #[arg(long)]
        no_lock: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let loader = match &cli.config {
        Some(path) => ConfigLoader::load_from(path)?,
        None => ConfigLoader::load()?,
    };
    let config = loader.into_config();
    init_tracing(&config.logging);

    let transport = select_transport(cli.mock, &config)?;

    match cli.command {
        Command::List { json } => list(transport.as_ref(), json).await,
        Command::Monitor {
            path,
            baud,
            no_lock,
        } => monitor(transport, &config, path, baud, no_lock).await,
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Compact => builder.compact().init(),
    }
}

fn select_transport(
    mock: bool,
    config: &Config,
) -> Result<Arc<dyn Transport>, Box<dyn std::error::Error>> {
    if mock {
        return Ok(Arc::new(config.mock.transport()));
    }

    #[cfg(feature = "system")]
    {
        Ok(Arc::new(serial_binding::SystemTransport::new()))
    }

    #[cfg(not(feature = "system"))]
    {
        Err("built without the `system` feature, use --mock".into())
    }
}

async fn list(transport: &dyn Transport, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let ports = Binding::list(transport).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    if ports.is_empty() {
        println!("No serial ports found");
        return Ok(());
    }
    for port in ports {
        let ids = match (&port.vendor_id, &port.product_id) {
            (Some(vid), Some(pid)) => format!("{vid}:{pid}"),
            _ => "-".to_string(),
        };
        println!(
            "{:<24} {:<10} {:<28} {}",
            port.path,
            ids,
            port.manufacturer.as_deref().unwrap_or("-"),
            port.serial_number.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

enum MonitorEvent {
    Data(bytes::Bytes),
    Disconnected(serial_binding::BindingError),
}

async fn monitor(
    transport: Arc<dyn Transport>,
    config: &Config,
    path: String,
    baud: Option<u32>,
    no_lock: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let path = config.serial.resolve_port(&path);
    let mut options = config.serial.open.clone();
    if let Some(baud) = baud {
        options.baud_rate = baud;
    }
    if no_lock {
        options.lock = false;
    }

    let (events, mut received) = mpsc::unbounded_channel();
    let disconnects = events.clone();
    let binding = Binding::builder()
        .push(move |chunk| events.send(MonitorEvent::Data(chunk)).is_ok())
        .disconnect(move |err| {
            let _ = disconnects.send(MonitorEvent::Disconnected(err));
        })
        .build_shared(transport)?;

    binding.open(path.clone(), options.clone())?.await?;
    binding.set(config.serial.flags)?.await?;
    info!(path = %path, baud_rate = options.baud_rate, "monitoring, press Ctrl+C to stop");
    binding.resume()?;

    let mut stdout = std::io::stdout();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = received.recv() => match event {
                Some(MonitorEvent::Data(chunk)) => {
                    stdout.write_all(&chunk)?;
                    stdout.flush()?;
                }
                Some(MonitorEvent::Disconnected(err)) => {
                    warn!(error = %err, "device went away");
                    break;
                }
                None => break,
            },
        }
    }

    binding.close()?.await?;
    Ok(())
}
