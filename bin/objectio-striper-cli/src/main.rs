//! ObjectIO Striper CLI
//!
//! Reads and writes striped virtual objects kept in a local directory store.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use objectio_common::{LayoutParams, StriperConfig};
use objectio_striper::{DirStore, IoOptions, Striper, coalesce, compute_segments, object_name};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "objectio-striper-cli")]
#[command(about = "Striped virtual objects on a directory store")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/objectio/striper.toml")]
    config: String,

    /// Store root directory (overrides config)
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Stripe unit, e.g. 64K or 4M (overrides config)
    #[arg(long, value_parser = parse_size)]
    stripe_unit: Option<u64>,

    /// Backing objects per object set (overrides config)
    #[arg(long)]
    stripe_count: Option<u64>,

    /// Backing object size (overrides config)
    #[arg(long, value_parser = parse_size)]
    object_size: Option<u64>,

    /// Concurrent backing calls per operation (overrides config)
    #[arg(long)]
    max_in_flight: Option<usize>,

    /// Log level (overrides config)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replace a virtual object with the content of a file (or stdin)
    Put {
        /// Virtual object name
        name: String,
        /// Input file, stdin if omitted
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
    /// Write a file (or stdin) at an offset
    Write {
        /// Virtual object name
        name: String,
        /// Logical offset
        #[arg(short, long, value_parser = parse_size, default_value = "0")]
        offset: u64,
        /// Input file, stdin if omitted
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
    /// Append a file (or stdin)
    Append {
        /// Virtual object name
        name: String,
        /// Input file, stdin if omitted
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
    /// Read a range to a file (or stdout)
    Get {
        /// Virtual object name
        name: String,
        /// Logical offset
        #[arg(long, value_parser = parse_size, default_value = "0")]
        offset: u64,
        /// Bytes to read, up to the end if omitted
        #[arg(short, long, value_parser = parse_size)]
        length: Option<u64>,
        /// Output file, stdout if omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Set the logical size
    Truncate {
        /// Virtual object name
        name: String,
        /// New size, e.g. 10M
        #[arg(value_parser = parse_size)]
        size: u64,
    },
    /// Delete a virtual object
    Rm {
        /// Virtual object name
        name: String,
    },
    /// Show size and modification time
    Stat {
        /// Virtual object name
        name: String,
    },
    /// Show which backing objects hold a range (no I/O)
    Layout {
        /// Virtual object name
        name: String,
        /// Logical offset
        #[arg(long, value_parser = parse_size, default_value = "0")]
        offset: u64,
        /// Range length
        #[arg(short, long, value_parser = parse_size)]
        length: u64,
    },
}

/// Parse a human-readable size string (e.g. "64K", "4M", "1G") into bytes.
fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim();
    let (num, multiplier) = if let Some(n) = s.strip_suffix('G') {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = s.strip_suffix('M') {
        (n, 1024 * 1024)
    } else if let Some(n) = s.strip_suffix('K') {
        (n, 1024)
    } else {
        (s, 1)
    };
    let value: u64 = num
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid size: '{s}'"))?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| anyhow::anyhow!("Size too large: '{s}'"))
}

/// Format bytes as a human-readable size string.
fn format_size(bytes: u64) -> String {
    const GIB: u64 = 1024 * 1024 * 1024;
    const MIB: u64 = 1024 * 1024;
    const KIB: u64 = 1024;

    if bytes >= GIB && bytes.is_multiple_of(GIB) {
        format!("{} GiB", bytes / GIB)
    } else if bytes >= MIB && bytes.is_multiple_of(MIB) {
        format!("{} MiB", bytes / MIB)
    } else if bytes >= KIB && bytes.is_multiple_of(KIB) {
        format!("{} KiB", bytes / KIB)
    } else {
        format!("{bytes} B")
    }
}

/// Fold command line overrides into the loaded configuration
fn merge_args(mut config: StriperConfig, args: &Args) -> StriperConfig {
    let LayoutParams {
        stripe_unit,
        stripe_count,
        object_size,
    } = config.layout;
    config.layout = LayoutParams {
        stripe_unit: args.stripe_unit.unwrap_or(stripe_unit),
        stripe_count: args.stripe_count.unwrap_or(stripe_count),
        object_size: args.object_size.unwrap_or(object_size),
    };
    if let Some(root) = &args.root {
        config.store.root.clone_from(root);
    }
    if let Some(max_in_flight) = args.max_in_flight {
        config.io.max_in_flight = max_in_flight;
    }
    if let Some(level) = &args.log_level {
        config.logging.level.clone_from(level);
    }
    config
}

async fn read_input(input: Option<&Path>) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    match input {
        Some(path) => {
            data = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
        }
        None => {
            tokio::io::stdin()
                .read_to_end(&mut data)
                .await
                .context("Failed to read stdin")?;
        }
    }
    Ok(data)
}

async fn write_output(output: Option<&Path>, data: &[u8]) -> Result<()> {
    match output {
        Some(path) => tokio::fs::write(path, data)
            .await
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(data).await?;
            stdout.flush().await?;
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load config file if it exists
    let config = if Path::new(&args.config).exists() {
        StriperConfig::load(&args.config)
            .with_context(|| format!("Failed to load config file {}", args.config))?
    } else {
        StriperConfig::default()
    };
    let config = merge_args(config, &args);

    // Initialize logging; stdout carries object data
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let layout = config.striping_layout()?;
    debug!("Config file: {}", args.config);
    debug!("Layout: {}", layout);

    if let Commands::Layout {
        name,
        offset,
        length,
    } = &args.command
    {
        let extents = coalesce(&compute_segments(&layout, *offset, *length)?);
        println!("{layout}");
        for extent in extents {
            println!(
                "{}  {}  local {}+{}  ({} piece(s))",
                object_name(name, extent.object, &layout),
                extent.object,
                extent.local_offset,
                extent.length,
                extent.pieces.len()
            );
        }
        return Ok(());
    }

    let store = DirStore::open(&config.store.root)
        .await
        .with_context(|| format!("Failed to open store at {}", config.store.root.display()))?;
    info!("Store root: {}", store.root().display());

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let striper = Striper::new(Arc::new(store), layout)
        .with_options(IoOptions::from(&config.io))
        .with_cancellation(cancel);

    match args.command {
        Commands::Put { name, input } => {
            let data = read_input(input.as_deref()).await?;
            striper.write_full(&name, &data).await?;
            info!("Stored {} ({})", name, format_size(data.len() as u64));
        }
        Commands::Write {
            name,
            offset,
            input,
        } => {
            let data = read_input(input.as_deref()).await?;
            striper.write(&name, &data, offset).await?;
            info!("Wrote {} bytes to {} at {}", data.len(), name, offset);
        }
        Commands::Append { name, input } => {
            let data = read_input(input.as_deref()).await?;
            striper.append(&name, &data).await?;
            info!("Appended {} bytes to {}", data.len(), name);
        }
        Commands::Get {
            name,
            offset,
            length,
            output,
        } => {
            let length = match length {
                Some(length) => length,
                None => striper.stat(&name).await?.size.saturating_sub(offset),
            };
            let length = usize::try_from(length).context("Length does not fit in memory")?;
            let data = striper.read_to_vec(&name, length, offset).await?;
            write_output(output.as_deref(), &data).await?;
        }
        Commands::Truncate { name, size } => {
            striper.truncate(&name, size).await?;
            info!("Truncated {} to {}", name, format_size(size));
        }
        Commands::Rm { name } => {
            striper.delete(&name).await?;
            info!("Deleted {}", name);
        }
        Commands::Stat { name } => {
            let stat = striper.stat(&name).await?;
            println!("Name:     {name}");
            println!("Size:     {} ({})", stat.size, format_size(stat.size));
            println!("Modified: {}", stat.mtime.to_rfc3339());
        }
        // Printed before the store is opened
        Commands::Layout { .. } => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert_eq!(parse_size("64K").unwrap(), 64 * 1024);
        assert_eq!(parse_size("4M").unwrap(), 4 * 1024 * 1024);
        assert_eq!(parse_size(" 1G ").unwrap(), 1024 * 1024 * 1024);
        assert!(parse_size("lots").is_err());
        assert!(parse_size("99999999999999G").is_err());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(4 * 1024 * 1024), "4 MiB");
        assert_eq!(format_size(64 * 1024), "64 KiB");
        assert_eq!(format_size(10000), "10000 B");
    }

    #[test]
    fn test_args_override_config() {
        let args = Args::parse_from([
            "objectio-striper-cli",
            "--root",
            "/tmp/objects",
            "--stripe-unit",
            "64K",
            "--stripe-count",
            "4",
            "stat",
            "disk",
        ]);
        let config = merge_args(StriperConfig::default(), &args);
        assert_eq!(config.store.root, PathBuf::from("/tmp/objects"));
        assert_eq!(config.layout.stripe_unit, 64 * 1024);
        assert_eq!(config.layout.stripe_count, 4);
        assert_eq!(config.layout.object_size, 4 * 1024 * 1024);
        assert!(config.striping_layout().is_ok());
    }
}
