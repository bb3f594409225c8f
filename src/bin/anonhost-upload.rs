use anonhost::client::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_FILE_SIZE, UploadClient};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Upload a file to an anonhost server in fixed-size chunks.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// File to upload
    file: PathBuf,

    /// Server base URL (overrides ANONHOST_SERVER)
    #[arg(long)]
    server: Option<String>,

    /// Bytes per chunk
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: u64,

    /// Refuse files larger than this many bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FILE_SIZE)]
    max_size: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("anonhost=info")),
        )
        .init();

    let args = Args::parse();
    let server = args
        .server
        .clone()
        .or_else(|| std::env::var("ANONHOST_SERVER").ok())
        .unwrap_or_else(|| "http://localhost:3000".into());
    let client = UploadClient::new(server)
        .with_chunk_size(args.chunk_size)
        .with_max_file_size(args.max_size);

    let outcome = client
        .upload_path(&args.file, |progress| {
            tracing::info!(
                "uploaded {}/{} chunks ({:.0}%)",
                progress.completed,
                progress.total,
                progress.fraction() * 100.0
            );
        })
        .await
        .with_context(|| format!("uploading {}", args.file.display()))?;

    println!("{}", outcome.url);
    Ok(())
}
