//! Neutral IPC server - shares one template engine with local clients.
//!
//! `serve` runs the render server. `render` is a command-line client for
//! scripts and for checking a running server by hand.

mod engine;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use engine::NeutralRenderer;
use neutral_ipc::{IpcConfig, RenderClient, RenderServer, ServerConfig, TemplateRef};
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "neutral-ipc-server")]
#[command(about = "Local IPC render server for Neutral templates")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the render server
    Serve {
        /// JSON configuration file
        #[arg(short, long, default_value = IpcConfig::CONFIG_FILE)]
        config: PathBuf,

        /// Host to bind to (overrides the config file)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on, 0 = auto-assign (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,

        /// Template root directory (overrides the config file)
        #[arg(long)]
        template_root: Option<PathBuf>,
    },

    /// Submit one render request to a running server
    Render {
        /// Server address
        #[arg(long, default_value = "127.0.0.1:4273")]
        addr: SocketAddr,

        /// Template path, resolved by the server
        #[arg(short, long, conflicts_with = "inline", required_unless_present = "inline")]
        template: Option<String>,

        /// Inline template source
        #[arg(long)]
        inline: Option<String>,

        /// Schema JSON file (empty schema when omitted)
        #[arg(short, long)]
        schema: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging. RUST_LOG takes precedence over --debug.
    let default_level = if args.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    match args.command {
        Command::Serve {
            config,
            host,
            port,
            template_root,
        } => {
            let mut config = ServerConfig::load_or_default(&config);
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(root) = template_root {
                config.template_root = root;
            }
            serve(config).await
        }
        Command::Render {
            addr,
            template,
            inline,
            schema,
        } => {
            let template = match (template, inline) {
                (Some(path), _) => TemplateRef::Path(path),
                (None, Some(source)) => TemplateRef::Inline(source),
                (None, None) => bail!("either --template or --inline is required"),
            };
            render(addr, template, schema).await
        }
    }
}

async fn serve(config: ServerConfig) -> Result<()> {
    info!("Starting Neutral IPC server");
    info!("Template root: {}", config.template_root.display());

    let store = neutral_ipc::open_store(&config.cache)?;
    let renderer = Arc::new(NeutralRenderer::new(config.template_root.clone()));
    let mut handle = RenderServer::start(&config, renderer, store).await?;

    // Print port for supervisors and tests to read (intentional stdout)
    println!("IPC_PORT={}", handle.port);

    info!("Neutral IPC running on {}", handle.addr());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");
    handle.shutdown();

    Ok(())
}

async fn render(addr: SocketAddr, template: TemplateRef, schema: Option<PathBuf>) -> Result<()> {
    let schema_json = match schema {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("reading schema {}", path.display()))?,
        None => "{}".to_string(),
    };

    let client = RenderClient::connect(addr).await?;
    let response = client.submit_json(template, schema_json).await?;

    eprintln!(
        "{} {} {}",
        response.status_code, response.status_text, response.status_param
    );
    let mut stdout = std::io::stdout();
    stdout.write_all(response.body.as_bytes())?;
    stdout.flush()?;

    if !response.is_ok() {
        std::process::exit(1);
    }
    Ok(())
}
