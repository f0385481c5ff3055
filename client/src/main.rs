mod logging;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info};

use shutterqueue::capture::{
    CaptureController, CaptureOutcome, DEFAULT_CAPTURE_QUALITY, RejectReason, StillFileCamera,
};
use shutterqueue::config::Settings;
use shutterqueue::notify::{LogNotices, Notice, NoticeSink};
use shutterqueue::store::PhotoStore;
use shutterqueue::uploader::{UploadResult, send_queued};

#[derive(Debug, Parser)]
#[command(name = "shutterqueue", version, about = "Queue photos locally and send them as one batch")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Capture a still image into the local queue
    Capture {
        /// Image file used as the camera frame
        image: PathBuf,
        /// Capture quality between 0.0 and 1.0
        #[arg(long, default_value_t = DEFAULT_CAPTURE_QUALITY)]
        quality: f32,
    },
    /// List queued photos
    List,
    /// Send every queued photo in one request
    Send {
        /// API token; defaults to $SHUTTERQUEUE_TOKEN
        #[arg(long)]
        token: Option<String>,
    },
    /// Delete every queued photo
    Clear,
}

fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();

    match run(cli.command) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Returns `Ok(false)` when the command ran but did not succeed.
fn run(command: Command) -> Result<bool> {
    let notices: Arc<dyn NoticeSink> = Arc::new(LogNotices);

    match command {
        Command::Capture { image, quality } => {
            let (_, store) = open_queue()?;
            let controller = CaptureController::new(StillFileCamera::new(image), store, notices)
                .with_quality(quality);
            match controller.capture() {
                Ok(CaptureOutcome::Saved(photo)) => {
                    println!("{}", photo.path.display());
                    Ok(true)
                }
                Ok(CaptureOutcome::Rejected(RejectReason::CameraNotReady)) => {
                    info!("Camera is not ready; nothing captured");
                    Ok(false)
                }
                Ok(CaptureOutcome::Rejected(RejectReason::Busy)) => Ok(false),
                // Already reported through the notice sink.
                Err(_) => Ok(false),
            }
        }
        Command::List => {
            let (_, store) = open_queue()?;
            for photo in store.list_all()? {
                println!("{}\t{}", photo.sequence, photo.path.display());
            }
            Ok(true)
        }
        Command::Send { token } => {
            let (settings, store) = open_queue()?;
            let settings = settings.with_token(token)?;
            let (notice, ok) = match send_queued(&settings, store)? {
                UploadResult::NoFiles => (Notice::info("No images to send."), true),
                UploadResult::Success { .. } => (Notice::info("Images sent successfully!"), true),
                UploadResult::Rejected { .. } => (Notice::error("Failed to send images."), false),
                UploadResult::Failed(reason) => {
                    (Notice::error(format!("Send failed: {reason}")), false)
                }
            };
            notices.show(notice);
            Ok(ok)
        }
        Command::Clear => {
            let (_, store) = open_queue()?;
            match store.clear() {
                Ok(true) => notices.show(Notice::info("All images removed")),
                Ok(false) => {}
                Err(err) => {
                    error!("Error clearing pictures: {err}");
                    return Ok(false);
                }
            }
            Ok(true)
        }
    }
}

fn open_queue() -> Result<(Settings, Arc<PhotoStore>)> {
    let settings = Settings::load().context("load client settings")?;
    let store = Arc::new(PhotoStore::new(&settings.cache_root));
    Ok((settings, store))
}
