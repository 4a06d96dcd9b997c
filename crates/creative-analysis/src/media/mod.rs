pub mod frames;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use frames::{FfmpegDecoder, FrameDecoder, FrameSampler, SamplingParams};

/// Kind of creative asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
        }
    }

    /// Extension used for the local copy when the object path has no usable one.
    pub fn default_extension(&self) -> &'static str {
        match self {
            MediaType::Image => "jpg",
            MediaType::Video => "mp4",
        }
    }

    /// Whether `ext` names a file type of this media kind.
    pub fn accepts_extension(&self, ext: &str) -> bool {
        let top_level = match self {
            MediaType::Image => mime_guess::mime::IMAGE,
            MediaType::Video => mime_guess::mime::VIDEO,
        };
        mime_guess::from_ext(ext)
            .iter()
            .any(|m| m.type_() == top_level)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" => Ok(MediaType::Image),
            "video" => Ok(MediaType::Video),
            other => Err(format!("unknown media type '{}'", other)),
        }
    }
}
