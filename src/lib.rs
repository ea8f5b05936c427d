//! Vox-Operis Studio - camera capture, background replacement and recording
//! for media profiles.
//!
//! The pipeline runs capture source → frame compositor → stream recorder,
//! with [`studio::MediaStudio`] as the entry point for UI glue.

pub mod capture;
pub mod compositor;
pub mod config;
pub mod ffmpeg;
pub mod media;
pub mod recorder;
pub mod storage;
pub mod studio;
pub mod utils;
pub mod waveform;

#[cfg(test)]
mod test_support;

use anyhow::Context;
use capture::CaptureBackend;
use compositor::BackgroundSpec;
use config::{RecordingMode, StudioConfig};
use std::sync::Arc;
use std::time::Duration;
use studio::MediaStudio;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vox_operis_studio=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn capture_backend() -> Arc<dyn CaptureBackend> {
    #[cfg(feature = "native-capture")]
    {
        Arc::new(capture::NativeBackend::new())
    }
    #[cfg(not(feature = "native-capture"))]
    {
        Arc::new(capture::SyntheticBackend::new())
    }
}

/// Record a short blurred-background take and save it to the storage dir
pub async fn run() -> anyhow::Result<()> {
    init_tracing();
    tracing::info!("Starting Vox-Operis Studio v{}", env!("CARGO_PKG_VERSION"));

    let config = StudioConfig::from_env().context("loading studio config")?;
    let studio = MediaStudio::with_defaults(&config, RecordingMode::Video, capture_backend())
        .await
        .context("probing ffmpeg")?;
    tracing::info!("Capabilities: {:?}", studio.capabilities());

    studio.setup_camera().await.context("opening camera")?;
    studio.select_background(BackgroundSpec::Blur(10))?;
    studio.start_recording().await.context("starting recording")?;

    tokio::time::sleep(Duration::from_secs(3)).await;

    let artifact = studio
        .stop_recording()
        .await?
        .context("recording produced no artifact")?;
    tracing::info!(
        "Recorded {:.1}s of {} ({} bytes)",
        artifact.duration_secs(),
        artifact.mime_type(),
        artifact.size_bytes()
    );

    let stored = studio.save_recording("demo", "Studio demo").await?;
    println!("{}", serde_json::to_string_pretty(&stored)?);

    studio.teardown().await;
    Ok(())
}
