//! drivenet: encrypted network storage client
//!
//! Commands:
//!   download -b <bucket> -f <file> [-o <path>] [--cache]  - fetch and decrypt a stored file
//!   upload -b <bucket> <local> [--parts <n>]              - encrypt and store a local file
//!   config show                                           - display current configuration

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use drivenet_cache::{build_fs_operator, LedgerSnapshot, LruCache, OperatorStorage};
use drivenet_core::config::{expand_tilde, DrivenetConfig};
use drivenet_transfer::download::DownloadOptions;
use drivenet_transfer::upload::UploadOptions;
use drivenet_transfer::{
    fetch_cached, http_pipelines, ByteSource, Credentials, DownloadRequest, Downloader,
    ProgressFn, UploadRequest,
};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "drivenet",
    version,
    about = "Encrypted network storage client",
    long_about = "drivenet: upload and download client-side encrypted files through the storage bridge"
)]
struct Cli {
    /// Path to drivenet.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "DRIVENET_CONFIG",
        default_value = "~/.config/drivenet/drivenet.toml"
    )]
    config: PathBuf,

    /// Log filter, overriding log.level from the config (RUST_LOG wins over both)
    #[arg(long)]
    log: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Download and decrypt a stored file
    Download(DownloadArgs),

    /// Encrypt and upload a local file
    Upload(UploadArgs),

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Args, Debug)]
struct DownloadArgs {
    /// Bucket id (hex)
    #[arg(long, short = 'b')]
    bucket: String,

    /// File id
    #[arg(long, short = 'f')]
    file: String,

    /// Destination path (default: the stored file name)
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    /// Bearer token; takes precedence over --user
    #[arg(long, env = "DRIVENET_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(flatten)]
    login: LoginArgs,

    /// Account mnemonic (prompted when neither it nor --key is given)
    #[arg(long, env = "DRIVENET_MNEMONIC", hide_env_values = true)]
    mnemonic: Option<String>,

    /// Hex-encoded 32-byte file key; takes precedence over the mnemonic
    #[arg(long)]
    key: Option<String>,

    /// Read through the local blob cache
    #[arg(long)]
    cache: bool,
}

#[derive(Args, Debug)]
struct UploadArgs {
    /// Bucket id (hex)
    #[arg(long, short = 'b')]
    bucket: String,

    /// Local file to upload
    local: PathBuf,

    /// Number of parts for a multipart upload (default: transfer.default_parts)
    #[arg(long)]
    parts: Option<u32>,

    #[command(flatten)]
    login: LoginArgs,

    /// Account mnemonic (prompted when absent)
    #[arg(long, env = "DRIVENET_MNEMONIC", hide_env_values = true)]
    mnemonic: Option<String>,
}

#[derive(Args, Debug)]
struct LoginArgs {
    /// Bridge user
    #[arg(long, env = "DRIVENET_BRIDGE_USER")]
    user: Option<String>,

    /// Bridge password (prompted when --user is given without it)
    #[arg(long, env = "DRIVENET_BRIDGE_PASS", hide_env_values = true)]
    pass: Option<String>,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let config = load_config(&config_path)?;

    init_logging(
        cli.log.as_deref().unwrap_or(&config.log.level),
        &config.log.format,
    );

    match cli.command {
        Commands::Download(args) => cmd_download(&config, args).await,
        Commands::Upload(args) => cmd_upload(&config, args).await,
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &config_path),
    }
}

fn init_logging(level: &str, format: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

fn load_config(path: &Path) -> Result<DrivenetConfig> {
    let config = DrivenetConfig::load(path)
        .with_context(|| format!("loading config: {}", path.display()))?;
    config
        .network
        .validate()
        .with_context(|| format!("invalid network settings in {}", path.display()))?;
    Ok(config)
}

// ── Secrets ───────────────────────────────────────────────────────────────────

fn prompt_secret(prompt: &str) -> Result<SecretString> {
    let value = rpassword::prompt_password(prompt).context("reading from terminal")?;
    Ok(SecretString::from(value))
}

fn login_credentials(login: LoginArgs) -> Result<Option<Credentials>> {
    let Some(user) = login.user else {
        return Ok(None);
    };
    let pass = match login.pass {
        Some(pass) => pass,
        None => rpassword::prompt_password(format!("Bridge password for {user}: "))
            .context("reading bridge password")?,
    };
    Ok(Some(Credentials::new(user, pass)))
}

fn mnemonic_or_prompt(mnemonic: Option<String>) -> Result<SecretString> {
    match mnemonic {
        Some(words) => Ok(SecretString::from(words)),
        None => prompt_secret("Mnemonic: "),
    }
}

fn decode_key(key: &str) -> Result<Vec<u8>> {
    let bytes = hex::decode(key.trim()).context("--key must be hex-encoded")?;
    if bytes.len() != 32 {
        anyhow::bail!("--key must be 32 bytes (64 hex characters), got {}", bytes.len());
    }
    Ok(bytes)
}

// ── Cancellation and progress ─────────────────────────────────────────────────

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling transfer");
            trigger.cancel();
        }
    });
    cancel
}

fn make_progress_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::with_template(
        "{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}",
    )
    .map(|s| s.progress_chars("=>-"))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn progress_for(pb: &ProgressBar) -> ProgressFn {
    let pb = pb.clone();
    Arc::new(move |total, done| {
        pb.set_length(total);
        pb.set_position(done);
    })
}

// ── `drivenet download` ───────────────────────────────────────────────────────

async fn cmd_download(config: &DrivenetConfig, args: DownloadArgs) -> Result<()> {
    let (downloader, _) = http_pipelines(config).context("configuring bridge client")?;

    let mut request = DownloadRequest::new(&args.bucket, &args.file);
    match args.token {
        Some(token) => request.token = Some(SecretString::from(token)),
        None => request.credentials = login_credentials(args.login)?,
    }
    match args.key {
        Some(key) => request.encryption_key = Some(decode_key(&key)?),
        None => request.mnemonic = Some(mnemonic_or_prompt(args.mnemonic)?),
    }

    let pb = make_progress_bar(0, "download");
    pb.set_message(args.file.clone());
    let options = DownloadOptions::default()
        .with_cancel(cancel_on_ctrl_c())
        .with_progress(progress_for(&pb));

    let result = if args.cache && config.cache.enabled {
        download_cached(config, &downloader, &request, options, args.output).await
    } else {
        if args.cache {
            warn!("--cache given but cache.enabled = false; downloading directly");
        }
        download_streaming(&downloader, &request, options, args.output).await
    };

    match result {
        Ok((path, bytes)) => {
            pb.finish_with_message(format!("→ {}", path.display()));
            info!(bucket = %args.bucket, file = %args.file, bytes, path = %path.display(), "saved");
            Ok(())
        }
        Err(e) => {
            pb.abandon();
            Err(e)
        }
    }
}

async fn download_streaming(
    downloader: &Downloader,
    request: &DownloadRequest,
    options: DownloadOptions,
    output: Option<PathBuf>,
) -> Result<(PathBuf, u64)> {
    let stream = downloader.download(request, options).await?;
    let target = output.unwrap_or_else(|| default_output(&stream.metadata().name, &request.file_id));

    // write beside the target and rename, so a failed transfer leaves no partial file
    let partial = partial_path(&target);
    let mut out = tokio::fs::File::create(&partial)
        .await
        .with_context(|| format!("creating {}", partial.display()))?;

    match stream.pipe_to(&mut out).await {
        Ok(written) => {
            drop(out);
            tokio::fs::rename(&partial, &target)
                .await
                .with_context(|| format!("moving download into {}", target.display()))?;
            Ok((target, written))
        }
        Err(e) => {
            drop(out);
            if let Err(rm) = tokio::fs::remove_file(&partial).await {
                warn!(path = %partial.display(), "failed to remove partial download: {rm}");
            }
            Err(e.into())
        }
    }
}

async fn download_cached(
    config: &DrivenetConfig,
    downloader: &Downloader,
    request: &DownloadRequest,
    options: DownloadOptions,
    output: Option<PathBuf>,
) -> Result<(PathBuf, u64)> {
    let ledger_path = expand_tilde(&config.cache.ledger_file);
    let cache = open_blob_cache(config).await?;

    let data = fetch_cached(downloader, request, options, &cache).await?;

    if let Err(e) = cache.snapshot().await.save(&ledger_path) {
        warn!(path = %ledger_path.display(), "failed to persist cache ledger: {e}");
    }

    let target = output.unwrap_or_else(|| PathBuf::from(&request.file_id));
    tokio::fs::write(&target, &data)
        .await
        .with_context(|| format!("writing {}", target.display()))?;
    Ok((target, data.len() as u64))
}

/// Open the fs-backed blob cache under its persisted ledger.
///
/// Without a readable ledger nothing tracks the blobs already on disk, so they
/// are removed and the cache starts empty.
async fn open_blob_cache(config: &DrivenetConfig) -> Result<LruCache<Bytes, OperatorStorage>> {
    let dir = expand_tilde(&config.cache.dir);
    let ledger_path = expand_tilde(&config.cache.ledger_file);

    let op = build_fs_operator(&dir)
        .with_context(|| format!("opening cache directory {}", dir.display()))?;
    let storage = OperatorStorage::new(op);

    let snapshot = if ledger_path.exists() {
        LedgerSnapshot::load(&ledger_path)
            .inspect_err(|e| warn!(path = %ledger_path.display(), "unreadable cache ledger: {e}"))
            .ok()
    } else {
        None
    };
    let snapshot = match snapshot {
        Some(snapshot) => snapshot,
        None => {
            let removed = storage
                .clear()
                .await
                .with_context(|| format!("clearing untracked blobs in {}", dir.display()))?;
            if removed > 0 {
                warn!(dir = %dir.display(), removed, "removed cache blobs with no ledger entry");
            }
            LedgerSnapshot::default()
        }
    };

    Ok(LruCache::restore(storage, config.cache.capacity_bytes(), snapshot))
}

/// Final path component of the stored name, falling back to the file id.
fn default_output(name: &str, file_id: &str) -> PathBuf {
    Path::new(name)
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(file_id))
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

// ── `drivenet upload` ─────────────────────────────────────────────────────────

async fn cmd_upload(config: &DrivenetConfig, args: UploadArgs) -> Result<()> {
    let (_, uploader) = http_pipelines(config).context("configuring bridge client")?;

    let credentials = login_credentials(args.login)?
        .context("uploads need bridge credentials: pass --user or set DRIVENET_BRIDGE_USER")?;
    let mnemonic = mnemonic_or_prompt(args.mnemonic)?;
    let source = ByteSource::open(&args.local)
        .await
        .with_context(|| format!("opening {}", args.local.display()))?;

    println!(
        "Uploading {} → bucket {} ({} bytes)",
        args.local.display(),
        args.bucket,
        source.size()
    );

    let pb = make_progress_bar(source.size(), "upload");
    pb.set_message(args.local.display().to_string());
    let options = UploadOptions::default()
        .with_cancel(cancel_on_ctrl_c())
        .with_progress(progress_for(&pb));

    let request = UploadRequest {
        bucket_id: args.bucket,
        source,
        credentials,
        mnemonic,
        parts: args.parts,
    };
    match uploader.upload(request, options).await {
        Ok(result) => {
            pb.finish_with_message("done");
            println!("file id: {}", result.file_id);
            Ok(())
        }
        Err(e) => {
            pb.abandon();
            Err(e).context("upload failed")
        }
    }
}

// ── `drivenet config show` ────────────────────────────────────────────────────

fn cmd_config_show(config: &DrivenetConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
