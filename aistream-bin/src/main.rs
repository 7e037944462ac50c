use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use aistream_core::{
    client::{Notifier, Severity, TransportManager},
    config::Config,
    gateway::{self, GatewayState},
    provider_factory::build_provider,
};
use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Streams generated answers over WebSocket", long_about = None)]
struct Cli {
    /// JSON or TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the streaming gateway
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Ask a running gateway and print the answer as it streams in
    Ask {
        #[arg(short, long, help = "Message to send")]
        message: String,
        #[arg(long, help = "Gateway WebSocket URL")]
        url: Option<String>,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(p) => Config::from_path(p).with_context(|| format!("loading {}", p.display())),
        None => Ok(Config::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the streamed answer for `ask`, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(h) = host {
                cfg.server.host = h;
            }
            if let Some(p) = port {
                cfg.server.port = p;
            }
            cfg.validate()?;
            serve(cfg).await
        }
        Commands::Ask { message, url } => {
            if let Some(u) = url {
                cfg.client.url = u;
            }
            ask(cfg, &message).await
        }
    }
}

async fn serve(cfg: Config) -> anyhow::Result<()> {
    let provider = build_provider(&cfg)?;
    let state = GatewayState::new(&cfg, Arc::clone(&provider));
    let addr = cfg.server.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, provider = provider.name(), "starting gateway");

    gateway::serve(listener, state, &cfg.server, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutting down");
    })
    .await?;
    Ok(())
}

async fn ask(cfg: Config, message: &str) -> anyhow::Result<()> {
    let notifier = Notifier::default();
    let mut notices = notifier.subscribe();
    let tm = TransportManager::new(cfg.client, notifier);
    let mut status = tm.subscribe_status();

    loop {
        tokio::select! {
            ready = status.wait_for(|connected| *connected) => {
                ready.context("transport stopped")?;
                break;
            }
            notice = notices.recv() => {
                if let Ok(n) = notice
                    && n.severity == Severity::Error
                {
                    bail!("{}", n.message);
                }
            }
        }
    }

    let mut responses = tm.subscribe_responses();
    let mut completions = tm.subscribe_completions();
    tm.send_message(message)?;

    let mut printed = 0usize;
    let mut stdout = std::io::stdout();
    loop {
        // Responses first, so a snapshot queued alongside the completion is
        // printed before the loop ends.
        tokio::select! {
            biased;
            snapshot = responses.recv() => {
                let Ok(snapshot) = snapshot else { continue };
                if let Some(delta) = snapshot.get(printed..).filter(|_| snapshot.len() > printed) {
                    write!(stdout, "{delta}")?;
                    stdout.flush()?;
                    printed = snapshot.len();
                }
            }
            done = completions.recv() => {
                done.context("transport stopped")?;
                break;
            }
            notice = notices.recv() => {
                let Ok(n) = notice else { continue };
                match n.severity {
                    Severity::Error | Severity::Critical => {
                        let detail = n.details.map(|d| format!(" ({d})")).unwrap_or_default();
                        bail!("{}{detail}", n.message);
                    }
                    Severity::Warning => bail!("{}", n.message),
                    Severity::Info => {}
                }
            }
        }
    }
    let full = tm.current_response();
    if let Some(rest) = full.get(printed..) {
        write!(stdout, "{rest}")?;
    }
    writeln!(stdout)?;
    Ok(())
}
