use anyhow::Context;
use chunkup::{
    upload_progress_bar, Credentials, ResumePoint, UploadConfig, UploadError, UploadMode,
    Uploader, DEFAULT_CHUNK_SIZE, DEFAULT_HOST,
};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "chunkup")]
#[command(about = "Upload a large file in resumable, checksum-verified chunks", long_about = None)]
#[command(version)]
struct Args {
    /// Username for the upload service
    #[arg(short, long, requires = "password")]
    username: Option<String>,

    /// Password for the upload service
    #[arg(short, long, requires = "username")]
    password: Option<String>,

    /// File to upload (e.g. a zipped AOI directory)
    #[arg(short = 'f', long)]
    upfile: PathBuf,

    /// Name to register the upload under; default is the file name
    #[arg(short = 'n', long)]
    filename: Option<String>,

    /// Size of upload chunks in bytes
    #[arg(short = 'C', long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunksize: u64,

    /// Upload the file in a single HTTP POST request
    #[arg(long)]
    no_chunks: bool,

    /// Use insecure HTTP instead of HTTPS
    #[arg(long)]
    no_https: bool,

    /// Comment to attach to the upload
    #[arg(short, long)]
    comment: Option<String>,

    /// Identifier of the parent record on the server
    #[arg(long)]
    parent_aoi: Option<String>,

    /// IP or domain name of the upload host
    #[arg(short = 'r', long, default_value = DEFAULT_HOST)]
    host: String,

    /// Port of the upload host; default is 443, or 80 without HTTPS
    #[arg(short = 'P', long)]
    port: Option<u16>,

    /// Re-sends of a failed chunk before giving up
    #[arg(long, default_value_t = 3)]
    retries: usize,

    /// Deadline for each HTTP request (e.g. "90s", "5m")
    #[arg(long, default_value = "5m")]
    timeout: humantime::Duration,

    /// File recording upload progress; an existing one resumes the upload
    #[arg(long)]
    state: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize tracing; stdout is reserved for the result line
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("chunkup={}", log_level))
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(url) => println!("Upload Completed Successfully: {}", url),
        Err(e) => {
            if let Some(UploadError::Authentication) = e.downcast_ref::<UploadError>() {
                eprintln!("❌ Error: username and/or password seems to be incorrect");
            } else {
                eprintln!("❌ Error: {:#}", e);
            }
            std::process::exit(1);
        }
    }
}

async fn run(args: Args) -> anyhow::Result<String> {
    let credentials = match (args.username, args.password) {
        (Some(username), Some(password)) => Some(Credentials { username, password }),
        _ => None,
    };
    let mode = if args.no_chunks {
        UploadMode::SingleShot
    } else {
        UploadMode::Chunked
    };

    let config = UploadConfig {
        host: args.host,
        port: args.port,
        use_https: !args.no_https,
        upload_file: args.upfile,
        filename: args.filename,
        comment: args.comment,
        parent_object_id: args.parent_aoi,
        chunk_size: args.chunksize,
        credentials,
        max_retries: args.retries,
        request_timeout: args.timeout.into(),
        ..Default::default()
    };

    info!("🚀 ChunkUp - resumable uploader");
    info!("Host: {}", config.base_url());
    info!("File: {:?}", config.upload_file);

    let mut uploader = Uploader::open(&config)
        .await
        .with_context(|| format!("failed to prepare {}", config.upload_file.display()))?;
    if atty::is(atty::Stream::Stderr) {
        let progress_bar = upload_progress_bar(uploader.target().declared_size);
        uploader = uploader.with_progress(progress_bar);
    }

    if let (Some(path), UploadMode::Chunked) = (&args.state, mode) {
        if let Some(point) = load_resume_point(path)? {
            uploader.resume(point)?;
        }
    }

    match uploader.upload(mode).await {
        Ok(url) => {
            if let Some(path) = &args.state {
                if path.exists() {
                    std::fs::remove_file(path)
                        .with_context(|| format!("failed to remove {}", path.display()))?;
                }
            }
            Ok(url)
        }
        Err(e) => {
            if let (Some(path), Some(point)) = (&args.state, uploader.session().resume_point()) {
                save_resume_point(path, &point)?;
                warn!(
                    "Progress saved to {}; run again with the same --state to resume",
                    path.display()
                );
            }
            Err(e.into())
        }
    }
}

fn load_resume_point(path: &Path) -> anyhow::Result<Option<ResumePoint>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
    };
    let point = serde_json::from_str(&content)
        .with_context(|| format!("invalid resume state in {}", path.display()))?;
    info!("Loaded resume state from {}", path.display());
    Ok(Some(point))
}

/// Writes `point` without its auth token; a resumed run authenticates again
/// with the credentials it is given.
fn save_resume_point(path: &Path, point: &ResumePoint) -> anyhow::Result<()> {
    let point = ResumePoint {
        auth_token: None,
        ..point.clone()
    };
    let json = serde_json::to_string_pretty(&point)?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
