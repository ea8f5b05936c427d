//! FFmpeg and ffprobe helpers
//!
//! Small one-shot invocations used outside the live encoder: capability
//! probing, image decoding, thumbnail grabs and PCM extraction.

use crate::media::VideoFrame;
use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FfmpegError {
    #[error("Failed to run {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("{program} failed: {stderr}")]
    Failed { program: String, stderr: String },

    #[error("Unexpected {program} output: {output}")]
    Parse { program: String, output: String },

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for FfmpegError {
    fn from(e: std::io::Error) -> Self {
        FfmpegError::Io(e.to_string())
    }
}

async fn run(program: &str, args: &[&str]) -> Result<Vec<u8>, FfmpegError> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| FfmpegError::Spawn {
            program: program.to_string(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        // Only the last lines carry the actual error
        let lines: Vec<&str> = stderr.lines().collect();
        return Err(FfmpegError::Failed {
            program: program.to_string(),
            stderr: lines[lines.len().saturating_sub(4)..].join("\n"),
        });
    }

    Ok(output.stdout)
}

fn path_arg(path: &Path) -> Result<&str, FfmpegError> {
    path.to_str()
        .ok_or_else(|| FfmpegError::Io(format!("path is not valid UTF-8: {:?}", path)))
}

/// Names of the encoders the local ffmpeg was built with
pub async fn list_encoders() -> Result<Vec<String>, FfmpegError> {
    let stdout = run("ffmpeg", &["-hide_banner", "-encoders"]).await?;
    Ok(parse_encoder_list(&String::from_utf8_lossy(&stdout)))
}

/// Parse `ffmpeg -encoders` output.
///
/// Encoder rows look like ` V....D libvpx-vp9  libvpx VP9`; the legend above
/// the `------` separator is skipped.
pub fn parse_encoder_list(output: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("------"))
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let flags = parts.next()?;
            let name = parts.next()?;
            (flags.len() == 6).then(|| name.to_string())
        })
        .collect()
}

/// Width and height of the first video stream
pub async fn probe_dimensions(path: &Path) -> Result<(u32, u32), FfmpegError> {
    let stdout = run(
        "ffprobe",
        &[
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height",
            "-of",
            "csv=p=0",
            path_arg(path)?,
        ],
    )
    .await?;

    let text = String::from_utf8_lossy(&stdout);
    parse_dimensions(&text).ok_or_else(|| FfmpegError::Parse {
        program: "ffprobe".to_string(),
        output: text.trim().to_string(),
    })
}

fn parse_dimensions(text: &str) -> Option<(u32, u32)> {
    let line = text.lines().next()?;
    let mut parts = line.trim().split(',');
    let width = parts.next()?.trim().parse().ok()?;
    let height = parts.next()?.trim().parse().ok()?;
    (width > 0 && height > 0).then_some((width, height))
}

/// Decode any image ffmpeg understands into an RGBA frame
pub async fn decode_image(bytes: &[u8]) -> Result<VideoFrame, FfmpegError> {
    let file = tempfile::NamedTempFile::new()?;
    tokio::fs::write(file.path(), bytes).await?;

    let (width, height) = probe_dimensions(file.path()).await?;
    let size = format!("{}x{}", width, height);
    let raw = run(
        "ffmpeg",
        &[
            "-v",
            "error",
            "-i",
            path_arg(file.path())?,
            "-frames:v",
            "1",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-s",
            &size,
            "-",
        ],
    )
    .await?;

    VideoFrame::from_rgba(width, height, raw).map_err(|e| FfmpegError::Parse {
        program: "ffmpeg".to_string(),
        output: e.to_string(),
    })
}

/// Grab one frame at `seek_secs` as PNG bytes
pub async fn extract_png_frame(path: &Path, seek_secs: f64) -> Result<Vec<u8>, FfmpegError> {
    let seek = format!("{:.3}", seek_secs.max(0.0));
    let png = run(
        "ffmpeg",
        &[
            "-v",
            "error",
            "-ss",
            &seek,
            "-i",
            path_arg(path)?,
            "-frames:v",
            "1",
            "-f",
            "image2pipe",
            "-vcodec",
            "png",
            "-",
        ],
    )
    .await?;

    if png.is_empty() {
        return Err(FfmpegError::Parse {
            program: "ffmpeg".to_string(),
            output: format!("no frame at {}s", seek),
        });
    }
    Ok(png)
}

/// Decode audio to mono signed 16-bit PCM at `sample_rate`
pub async fn decode_mono_pcm(path: &Path, sample_rate: u32) -> Result<Vec<i16>, FfmpegError> {
    let rate = sample_rate.to_string();
    let raw = run(
        "ffmpeg",
        &[
            "-v",
            "error",
            "-i",
            path_arg(path)?,
            "-ac",
            "1",
            "-ar",
            &rate,
            "-f",
            "s16le",
            "-acodec",
            "pcm_s16le",
            "-",
        ],
    )
    .await?;

    Ok(raw
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect())
}
