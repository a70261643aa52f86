//! Stowline command-line client.
//!
//! ## Usage
//!
//! ```bash
//! # Upload, resuming automatically if a previous attempt was interrupted
//! stowline upload my-bucket photos/cat.jpg ./cat.jpg --validation crc32c
//!
//! # Download with checksum validation
//! stowline download my-bucket photos/cat.jpg ./cat-copy.jpg
//!
//! # Forget an interrupted upload so the next one starts over
//! stowline discard my-bucket photos/cat.jpg
//! ```
//!
//! Configuration comes from the environment (`STOWLINE_ENDPOINT`,
//! `STOWLINE_SESSION_DIR`, `STOWLINE_SIMPLE_UPLOAD_THRESHOLD`,
//! `STOWLINE_VALIDATE_DOWNLOADS`, `LOG_LEVEL`). The access token is read from
//! `STOWLINE_TOKEN`; without one, requests are sent unauthenticated.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use stowline_core::{ObjectHandle, TransferConfig, TransferOptions, UploadStrategy, ValidationMode};
use stowline_http::{HttpRequestFactory, StaticTokenSource};
use stowline_transfer::{
    AuthorizedRequestFactory, DownloadCoordinator, FileSessionStore, SessionStore,
    TransferError, UploadCoordinator,
};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "stowline")]
#[command(about = "Resumable, checksum-validated object uploads and downloads")]
#[command(version)]
struct Args {
    /// API endpoint (scheme and authority)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Bearer access token
    #[arg(long, global = true, env = "STOWLINE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a local file
    Upload {
        /// Destination bucket
        bucket: String,
        /// Destination object name
        object: String,
        /// Local file to read
        file: PathBuf,
        /// Checksum used to validate the upload (none, md5, crc32c)
        #[arg(long, default_value = "md5")]
        validation: ValidationMode,
        /// Force a single-request upload
        #[arg(long, conflicts_with = "resumable")]
        simple: bool,
        /// Force a resumable upload
        #[arg(long)]
        resumable: bool,
        /// Declared content type
        #[arg(long)]
        content_type: Option<mime::Mime>,
        /// Custom metadata entry, repeatable
        #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        metadata: Vec<(String, String)>,
    },
    /// Download an object to a local file
    Download {
        /// Source bucket
        bucket: String,
        /// Source object name
        object: String,
        /// Local file to write
        file: PathBuf,
    },
    /// Forget the saved resumable session for an object
    Discard {
        /// Bucket
        bucket: String,
        /// Object name
        object: String,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .filter(|(k, _)| !k.is_empty())
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .ok_or_else(|| format!("expected KEY=VALUE, got `{s}`"))
}

/// Initialize the tracing subscriber.
///
/// Uses `RUST_LOG` if set, otherwise falls back to the `LOG_LEVEL` config value.
fn init_tracing(log_level: &str) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid log level filter: {log_level}"))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = TransferConfig::from_env();
    if let Some(endpoint) = args.endpoint {
        config.endpoint = endpoint;
    }
    init_tracing(&config.log_level)?;
    debug!(endpoint = %config.endpoint, session_dir = %config.session_dir, "loaded configuration");

    let tokens = args
        .token
        .map_or_else(StaticTokenSource::anonymous, StaticTokenSource::new);
    let factory: Arc<dyn AuthorizedRequestFactory> =
        Arc::new(HttpRequestFactory::new(Arc::new(tokens)).context("failed to create HTTP client")?);
    let store: Arc<dyn SessionStore> = Arc::new(FileSessionStore::new(config.session_file()));

    match args.command {
        Command::Upload {
            bucket,
            object,
            file,
            validation,
            simple,
            resumable,
            content_type,
            metadata,
        } => {
            let strategy = match (simple, resumable) {
                (true, _) => Some(UploadStrategy::Simple),
                (_, true) => Some(UploadStrategy::Resumable),
                _ => None,
            };
            let options = TransferOptions::builder()
                .validation(validation)
                .strategy(strategy)
                .content_type(content_type.map(|m| m.to_string()))
                .metadata(metadata.into_iter().collect::<BTreeMap<_, _>>())
                .build();
            let uploads = UploadCoordinator::new(&config, factory, store);
            upload(&uploads, ObjectHandle::new(bucket, object)?, options, &file).await
        }
        Command::Download {
            bucket,
            object,
            file,
        } => {
            let downloads = DownloadCoordinator::new(&config, factory);
            download(&downloads, ObjectHandle::new(bucket, object)?, &file).await
        }
        Command::Discard { bucket, object } => {
            let uploads = UploadCoordinator::new(&config, factory, store);
            let object = ObjectHandle::new(bucket, object)?;
            uploads.discard_session(&object).await?;
            println!("discarded upload session for {object}");
            Ok(())
        }
    }
}

async fn upload(
    uploads: &UploadCoordinator,
    object: ObjectHandle,
    mut options: TransferOptions,
    path: &Path,
) -> Result<()> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    let len = file.metadata().await?.len();
    options.content_length = Some(len);

    info!(object = %object, file = %path.display(), bytes = len, "uploading");
    let mut stream = uploads.open_upload_stream(object.clone(), options);
    if let Err(e) = tokio::io::copy(&mut file, &mut stream).await {
        if !is_stream_closed(&e) {
            stream.abort();
            return Err(anyhow::Error::new(e).context(format!("failed to read {}", path.display())));
        }
        // The session ended early; its own error says why.
        return match stream.finish().await {
            Err(err) => Err(err.into()),
            Ok(_) => Err(anyhow::Error::new(e).context("upload stream closed")),
        };
    }
    let metadata = stream.finish().await?;

    println!(
        "uploaded {object} ({} bytes, generation {})",
        metadata.size_bytes().unwrap_or(len),
        metadata.generation.as_deref().unwrap_or("-")
    );
    Ok(())
}

/// Whether a copy into an [`UploadStream`](stowline_transfer::UploadStream)
/// failed on the write side because the session stopped accepting data.
fn is_stream_closed(err: &std::io::Error) -> bool {
    err.get_ref()
        .and_then(|e| e.downcast_ref::<TransferError>())
        .is_some_and(|e| matches!(e, TransferError::StreamClosed))
}

/// Sibling path a download is written to before it is renamed into place.
fn partial_path(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .with_context(|| format!("{} is not a file path", path.display()))?;
    let mut partial = name.to_os_string();
    partial.push(".part");
    Ok(path.with_file_name(partial))
}

async fn download(downloads: &DownloadCoordinator, object: ObjectHandle, path: &Path) -> Result<()> {
    let partial = partial_path(path)?;
    let mut file = tokio::fs::File::create(&partial)
        .await
        .with_context(|| format!("failed to create {}", partial.display()))?;

    let mut stream = downloads.open_download_stream(object.clone());
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                drop(file);
                tokio::fs::remove_file(&partial).await.ok();
                return Err(e.into());
            }
        };
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);
    tokio::fs::rename(&partial, path)
        .await
        .with_context(|| format!("failed to move download to {}", path.display()))?;

    println!("downloaded {object} ({written} bytes) to {}", path.display());
    Ok(())
}
