//! lanmsg - Word-oriented LAN message exchange over TCP
//!
//! A small request-reply message service: every frame is an 8-byte header
//! (message id and payload size, both big-endian) followed by a payload of
//! 32-bit words. The server answers known requests; the client drives a
//! scripted exchange against it.

mod config;
mod network;
mod protocol;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::Config;
use network::{Client, Server, ServerEvent};
use protocol::{reply_id, MSG_ID_GET_VERSION, MSG_ID_TEST, VERSION_WORD};

/// lanmsg - word-oriented LAN message exchange
#[derive(Parser)]
#[command(name = "lanmsg")]
#[command(version = "0.1.0")]
#[command(about = "Exchange word-oriented messages over TCP", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the message server
    Server {
        /// Port to listen on (overrides configuration)
        #[arg(short, long)]
        port: Option<u16>,

        /// Interface to bind to (overrides configuration)
        #[arg(short, long)]
        bind: Option<String>,

        /// Per-frame read timeout in ms, 0 waits forever (overrides configuration)
        #[arg(long)]
        read_timeout_ms: Option<u64>,
    },

    /// Run the scripted client exchange against a server
    Client {
        /// Server address to connect to
        #[arg(short, long)]
        server: Option<String>,

        /// Server port (overrides configuration)
        #[arg(short, long)]
        port: Option<u16>,

        /// Number of words in each test payload
        #[arg(short, long, default_value_t = 512)]
        words: usize,

        /// Number of test messages to send before asking for the version
        #[arg(long, default_value_t = 2)]
        count: usize,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show protocol information
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    // Initialize logging
    let filter = if cli.verbose || config.general.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    match &config.general.log_file {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            tracing_subscriber::registry()
                .with(fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
                .with(filter)
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .init();
        }
    }

    match cli.command {
        Commands::Server {
            port,
            bind,
            read_timeout_ms,
        } => {
            run_server(config, port, bind, read_timeout_ms).await?;
        }
        Commands::Client {
            server,
            port,
            words,
            count,
        } => {
            run_client(config, server, port, words, count).await?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config();
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
        Commands::Info => {
            print_protocol_info();
        }
    }

    Ok(())
}

/// Run the message server until Ctrl+C
async fn run_server(
    config: Config,
    port: Option<u16>,
    bind: Option<String>,
    read_timeout_ms: Option<u64>,
) -> anyhow::Result<()> {
    let mut net_config = config.network_config();
    if let Some(port) = port {
        net_config.port = port;
    }
    if let Some(bind) = bind {
        net_config.bind_address = Some(bind);
    }
    if let Some(ms) = read_timeout_ms {
        net_config.read_timeout_ms = ms;
    }

    tracing::info!(
        "Starting server '{}' on port {}",
        config.general.name,
        net_config.port
    );

    let mut server = Server::new(net_config);
    let mut event_rx = server.take_event_receiver().unwrap();

    let bind_addr = server.start().await?;

    println!("\n========================================");
    println!("  Message Server Running");
    println!("========================================");
    println!("  Host: {}", config.general.name);
    println!("  Listening: {}", bind_addr);
    println!("========================================");
    println!("\nWaiting for clients to connect...");
    println!("Press Ctrl+C to stop.\n");

    // Main event loop
    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                match event {
                    ServerEvent::ClientConnected { addr } => {
                        println!("+ Client connected: {}", addr);
                    }
                    ServerEvent::ClientDisconnected { addr, reason } => {
                        println!("- Client disconnected: {} ({})", addr, reason);
                    }
                    ServerEvent::RequestAnswered { addr, request_id, reply_id } => {
                        tracing::debug!(
                            "Request 0x{:X} from {} answered with 0x{:X}",
                            request_id,
                            addr,
                            reply_id
                        );
                    }
                    ServerEvent::UnknownMessage { addr, message_id } => {
                        println!("! Unknown message id 0x{:X} from {}", message_id, addr);
                    }
                    ServerEvent::Error { message } => {
                        tracing::error!("Server error: {}", message);
                    }
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    server.stop().await?;
    tracing::info!("Server stopped");

    Ok(())
}

/// Run the scripted client exchange: `count` test messages, then a
/// version query.
async fn run_client(
    config: Config,
    server: Option<String>,
    port: Option<u16>,
    words: usize,
    count: usize,
) -> anyhow::Result<()> {
    let server = match server {
        Some(server) => server,
        None => anyhow::bail!("Please specify --server address"),
    };
    let port = port.unwrap_or(config.network.port);

    let mut net_config = config.network_config();
    net_config.port = port;

    let mut client = Client::new(net_config);

    println!("Connecting to {}:{}...", server, port);
    client.connect_hostname(&server, port).await?;

    // Ramp payload, one word per index
    let payload: Vec<u32> = (0..words as u32).collect();

    for i in 1..=count {
        client.send_test(payload.clone()).await?;
        println!("Test {}/{}: acknowledged ({} words)", i, count, words);
    }

    let version = client.get_version().await?;
    println!("Server version: 0x{:08X}", version);

    if let Some(stats) = client.stats() {
        tracing::info!(
            "Exchange complete: {} frames out ({} bytes), {} frames in ({} bytes)",
            stats.frames_written,
            stats.bytes_written,
            stats.frames_read,
            stats.bytes_read
        );
    }

    client.disconnect().await?;

    Ok(())
}

/// Print protocol information
fn print_protocol_info() {
    println!("LAN Message Protocol");
    println!("====================\n");

    println!(
        "Frame: {}-byte header + payload of {}-byte words",
        protocol::HEADER_SIZE,
        protocol::WORD_SIZE
    );
    println!("Header: message id (u32 BE), payload size in bytes (u32 BE)");

    println!("\nMessages:");
    println!(
        "  0x{:05X}  Test        reply 0x{:05X} with empty payload",
        MSG_ID_TEST,
        reply_id(MSG_ID_TEST)
    );
    println!(
        "  0x{:05X}  GetVersion  reply 0x{:05X} with version word 0x{:08X}",
        MSG_ID_GET_VERSION,
        reply_id(MSG_ID_GET_VERSION),
        VERSION_WORD
    );

    println!("\nDefault port: {}", protocol::DEFAULT_PORT);
    println!(
        "Default max payload: {} bytes",
        protocol::DEFAULT_MAX_PAYLOAD_SIZE
    );
}
