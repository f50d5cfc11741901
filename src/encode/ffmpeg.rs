//! FFmpeg Stream Encoder
//!
//! Encodes a raw RGB8 stream file into H.264 MP4 by running the `ffmpeg`
//! binary. The raw artifact is already on disk, so the input is the file
//! itself rather than a pipe, and a failed run can simply be repeated.
//!
//! Output is `yuv420p` H.264 with a keyframe every other frame and
//! `+faststart`, matching what downstream training tooling expects.

use super::VideoEncoder;
use crate::dataset::{raw_artifact_path, video_artifact_path};
use crate::episode::CameraMeta;
use crate::error::{Result, TelerecError};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Longest stderr tail carried into an error message
const STDERR_TAIL: usize = 500;

/// Encoder invoking the system `ffmpeg`
pub struct FfmpegEncoder {
    preset: String,
    crf: u32,
}

impl FfmpegEncoder {
    pub fn new(preset: impl Into<String>, crf: u32) -> Self {
        Self {
            preset: preset.into(),
            crf,
        }
    }

    /// Whether the `ffmpeg` binary is runnable
    pub fn is_available() -> bool {
        Command::new("ffmpeg")
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    fn build_args(
        &self,
        input: &Path,
        output: &Path,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            // Input: headerless RGB8 frames at the session tick rate
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            "rgb24".to_string(),
            "-s".to_string(),
            format!("{}x{}", width, height),
            "-r".to_string(),
            fps.to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            // Output: H.264 with a keyframe every other frame, so
            // training can seek to arbitrary samples
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            self.preset.clone(),
            "-crf".to_string(),
            self.crf.to_string(),
            "-g".to_string(),
            "2".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            output.to_string_lossy().to_string(),
        ]
    }
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new("medium", 23)
    }
}

impl VideoEncoder for FfmpegEncoder {
    fn encode_stream(
        &self,
        episode_dir: &Path,
        camera: &CameraMeta,
        tick_rate_hz: u32,
    ) -> Result<PathBuf> {
        let input = raw_artifact_path(episode_dir, &camera.id);
        let output = video_artifact_path(episode_dir, &camera.id);

        if !input.exists() {
            return Err(TelerecError::camera(
                &camera.id,
                format!("raw stream {} is missing", input.display()),
            ));
        }

        let args = self.build_args(&input, &output, camera.width, camera.height, tick_rate_hz);
        tracing::debug!("Running ffmpeg {}", args.join(" "));

        let result = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| TelerecError::camera(&camera.id, format!("spawn ffmpeg: {}", e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail_start = stderr.len().saturating_sub(STDERR_TAIL);
            let tail = stderr.get(tail_start..).unwrap_or(&stderr);
            return Err(TelerecError::camera(
                &camera.id,
                format!("ffmpeg exited with {}: {}", result.status, tail),
            ));
        }

        Ok(output)
    }
}
