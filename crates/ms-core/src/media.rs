//! Media-domain enums: input kinds, media kinds, and the closed set of output
//! profiles.
//!
//! All enums serialize in snake_case and implement `Display` manually for a
//! consistent string representation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

// ---------------------------------------------------------------------------
// MediaKind
// ---------------------------------------------------------------------------

/// Classification of a single input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Audio,
    Video,
    Ignored,
}

impl MediaKind {
    /// Whether files of this kind are sent to the encoder.
    pub fn is_media(self) -> bool {
        !matches!(self, Self::Ignored)
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
            Self::Ignored => write!(f, "ignored"),
        }
    }
}

// ---------------------------------------------------------------------------
// InputKind
// ---------------------------------------------------------------------------

/// Shape of a submitted file, decided before it is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    SingleAudio,
    SingleVideo,
    Archive,
    Unsupported,
}

impl InputKind {
    /// Media kind of the one input a single-file submission produces.
    pub fn single_media_kind(self) -> Option<MediaKind> {
        match self {
            Self::SingleAudio => Some(MediaKind::Audio),
            Self::SingleVideo => Some(MediaKind::Video),
            Self::Archive | Self::Unsupported => None,
        }
    }
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SingleAudio => write!(f, "single_audio"),
            Self::SingleVideo => write!(f, "single_video"),
            Self::Archive => write!(f, "archive"),
            Self::Unsupported => write!(f, "unsupported"),
        }
    }
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// Constant rate factor used by every video profile.
const VIDEO_CRF: u32 = 28;
/// x264 preset used by every video profile.
const VIDEO_PRESET: &str = "veryfast";
/// Audio bitrate of the soundtrack inside video outputs, in kbit/s.
const VIDEO_AUDIO_KBPS: u32 = 128;

/// Output quality profile. The set is closed so the encoder's parameter space
/// never depends on user-supplied strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Profile {
    #[serde(rename = "audio-64k")]
    Audio64k,
    #[serde(rename = "audio-128k")]
    Audio128k,
    #[serde(rename = "audio-192k")]
    Audio192k,
    #[serde(rename = "video-360p")]
    Video360p,
    #[serde(rename = "video-480p")]
    Video480p,
    #[serde(rename = "video-720p")]
    Video720p,
    #[serde(rename = "video-1080p")]
    Video1080p,
}

/// Encoder parameters a profile resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProfileParams {
    Audio {
        bitrate_kbps: u32,
    },
    Video {
        height: u32,
        crf: u32,
        preset: &'static str,
        audio_bitrate_kbps: u32,
    },
}

impl Profile {
    /// Every profile, audio first, in ascending quality.
    pub const ALL: [Profile; 7] = [
        Profile::Audio64k,
        Profile::Audio128k,
        Profile::Audio192k,
        Profile::Video360p,
        Profile::Video480p,
        Profile::Video720p,
        Profile::Video1080p,
    ];

    /// Stable identifier used at the profile-choice boundary.
    pub fn id(self) -> &'static str {
        match self {
            Self::Audio64k => "audio-64k",
            Self::Audio128k => "audio-128k",
            Self::Audio192k => "audio-192k",
            Self::Video360p => "video-360p",
            Self::Video480p => "video-480p",
            Self::Video720p => "video-720p",
            Self::Video1080p => "video-1080p",
        }
    }

    /// The media kind this profile encodes.
    pub fn kind(self) -> MediaKind {
        match self {
            Self::Audio64k | Self::Audio128k | Self::Audio192k => MediaKind::Audio,
            _ => MediaKind::Video,
        }
    }

    /// File extension of the encoded artifact.
    pub fn extension(self) -> &'static str {
        match self.kind() {
            MediaKind::Audio => "mp3",
            _ => "mp4",
        }
    }

    pub fn params(self) -> ProfileParams {
        let video = |height| ProfileParams::Video {
            height,
            crf: VIDEO_CRF,
            preset: VIDEO_PRESET,
            audio_bitrate_kbps: VIDEO_AUDIO_KBPS,
        };
        match self {
            Self::Audio64k => ProfileParams::Audio { bitrate_kbps: 64 },
            Self::Audio128k => ProfileParams::Audio { bitrate_kbps: 128 },
            Self::Audio192k => ProfileParams::Audio { bitrate_kbps: 192 },
            Self::Video360p => video(360),
            Self::Video480p => video(480),
            Self::Video720p => video(720),
            Self::Video1080p => video(1080),
        }
    }

    /// Human-readable label for choice buttons.
    pub fn label(self) -> String {
        match self.params() {
            ProfileParams::Audio { bitrate_kbps } => format!("Audio {bitrate_kbps} kbps (mp3)"),
            ProfileParams::Video { height, .. } => format!("Video {height}p (mp4)"),
        }
    }

    /// Profiles offered for a job, given which media kinds its inputs contain.
    ///
    /// Audio-only inputs get audio profiles, video-only inputs get video
    /// profiles, and mixed inputs get both.
    pub fn offered_for(has_audio: bool, has_video: bool) -> Vec<Profile> {
        Self::ALL
            .into_iter()
            .filter(|p| match p.kind() {
                MediaKind::Audio => has_audio,
                MediaKind::Video => has_video,
                MediaKind::Ignored => false,
            })
            .collect()
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Profile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.id() == s)
            .ok_or_else(|| Error::InvalidProfile(format!("unknown profile id '{s}'")))
    }
}
