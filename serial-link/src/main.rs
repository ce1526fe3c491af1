//! Entry point for `serial-link`.
//!
//! Parses CLI arguments and runs either the **tx** (Initiator, sends a file)
//! or **rx** (Responder, receives a file) side.  All protocol work is
//! delegated to the library; `main.rs` owns only process setup (logging,
//! argument parsing, file I/O).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};

use serial_link::{
    open_serial, receive_file, send_file, Connection, LinkConfig, Role, Teardown,
};

/// Reliable file transfer over a serial line.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Serial device (e.g. /dev/ttyS0).
    port: String,

    /// Which side of the transfer to run.
    role: Mode,

    /// Transmissions per frame before giving up.
    #[arg(default_value_t = serial_link::config::DEFAULT_RETRIES)]
    retries: u32,

    /// Seconds to wait for each reply.
    #[arg(default_value_t = 3)]
    timeout: u64,

    /// File to send (tx) or path to write (rx; defaults to the sender's name).
    filename: Option<PathBuf>,

    /// Line speed.
    #[arg(long, default_value_t = 38400)]
    baud: u32,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    /// Send a file.
    Tx,
    /// Receive a file.
    Rx,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let config = LinkConfig::default()
        .with_retries(cli.retries)
        .with_timeout(Duration::from_secs(cli.timeout));

    // Read the file before touching the line so a bad path fails fast.
    let (role, outgoing) = match cli.role {
        Mode::Tx => {
            let Some(path) = &cli.filename else {
                bail!("tx needs a FILENAME to send");
            };
            let data = tokio::fs::read(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            (Role::Initiator, Some((name, data)))
        }
        Mode::Rx => (Role::Responder, None),
    };

    let port = open_serial(&cli.port, cli.baud)
        .with_context(|| format!("opening serial port {}", cli.port))?;
    let mut conn = Connection::new(port, role, config).context("invalid link settings")?;

    conn.open().await.context("establishing link")?;

    let transferred = match outgoing {
        Some((name, data)) => send_file(&mut conn, &name, &data)
            .await
            .map(|_| None)
            .with_context(|| format!("sending {name}")),
        None => receive_file(&mut conn)
            .await
            .map(Some)
            .context("receiving file"),
    };
    let received = match transferred {
        Ok(received) => received,
        Err(e) => {
            // Still try to release the peer before reporting the failure.
            match conn.close().await {
                Ok(teardown) => log::info!("link closed after failed transfer ({teardown:?})"),
                Err(close) => log::warn!("closing link after failed transfer: {close}"),
            }
            return Err(e);
        }
    };

    if let Some(file) = received {
        // Keep the announced name inside the working directory.
        let path = cli.filename.unwrap_or_else(|| {
            PathBuf::from(&file.name)
                .file_name()
                .map_or_else(|| PathBuf::from("received.bin"), PathBuf::from)
        });
        tokio::fs::write(&path, &file.data)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        log::info!("wrote {} bytes to {}", file.data.len(), path.display());
    }

    match conn.close().await.context("closing link")? {
        Teardown::Clean => {}
        Teardown::MissingUa => log::warn!("peer never confirmed the disconnect"),
    }
    Ok(())
}
