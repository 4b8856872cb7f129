//! Encoder invocation for a single input file.
//!
//! [`Encoder`] is the seam between the dispatcher and the external encoding
//! tool. [`FfmpegEncoder`] turns a [`Profile`] into a structured ffmpeg
//! argument list.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use ms_core::{Profile, ProfileParams};

use crate::command::ToolCommand;
use crate::tools::ToolRegistry;

/// One encoder invocation: read `input`, write `output` according to `profile`.
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub profile: Profile,
    /// Upper bound on the invocation's run time.
    pub timeout: Duration,
}

/// An external encoder.
///
/// Implementations must write the encoded artifact to `request.output` on
/// success and return an error otherwise. They must not touch any path other
/// than the request's input and output.
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Short name used in logs (e.g. "ffmpeg").
    fn name(&self) -> &'static str;

    async fn encode(&self, request: &EncodeRequest) -> ms_core::Result<()>;
}

/// Encoder backed by the ffmpeg CLI.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    ffmpeg: PathBuf,
}

impl FfmpegEncoder {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }

    /// Use the ffmpeg binary found by the registry.
    pub fn from_registry(tools: &ToolRegistry) -> ms_core::Result<Self> {
        Ok(Self::new(tools.require("ffmpeg")?))
    }

    /// Build the ffmpeg invocation for a request without running it.
    pub fn build_command(&self, request: &EncodeRequest) -> ToolCommand {
        let mut cmd = ToolCommand::new(self.ffmpeg.clone());
        cmd.args(["-nostdin", "-hide_banner", "-loglevel", "error", "-y"]);
        cmd.arg("-i").arg(file_url(&request.input));

        match request.profile.params() {
            ProfileParams::Audio { bitrate_kbps } => {
                cmd.args(["-vn", "-c:a", "libmp3lame"]);
                cmd.arg("-b:a").arg(format!("{bitrate_kbps}k"));
            }
            ProfileParams::Video {
                height,
                crf,
                preset,
                audio_bitrate_kbps,
            } => {
                // -2 keeps the aspect ratio with an even width for libx264.
                cmd.arg("-vf").arg(format!("scale=-2:{height}"));
                cmd.args(["-c:v", "libx264"]);
                cmd.arg("-crf").arg(crf.to_string());
                cmd.arg("-preset").arg(preset);
                cmd.args(["-c:a", "aac"]);
                cmd.arg("-b:a").arg(format!("{audio_bitrate_kbps}k"));
                cmd.args(["-movflags", "+faststart"]);
            }
        }

        cmd.arg(file_url(&request.output));
        cmd.timeout(request.timeout);
        cmd
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn encode(&self, request: &EncodeRequest) -> ms_core::Result<()> {
        tracing::debug!(
            profile = %request.profile,
            "ffmpeg {:?} -> {:?}",
            request.input,
            request.output
        );
        self.build_command(request).execute().await?;
        Ok(())
    }
}

/// Prefix a path with the `file:` protocol so ffmpeg never interprets a name
/// such as `concat:...` or `-i` as anything but a local file.
fn file_url(path: &Path) -> String {
    format!("file:{}", path.to_string_lossy())
}
