use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local};
use std::fmt::Write;

use crate::frame::Frame;

/// Fixed-width, sortable: lexicographic order is chronological order.
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S-%6f";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactFormat {
    /// Motion-JPEG stream of every frame.
    Video,
    /// A single JPEG.
    Photo,
}

impl ArtifactFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Video => "mjpeg",
            Self::Photo => "jpg",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Photo => "photo",
        }
    }
}

/// A finished batch of frames ready to be encoded and stored.
///
/// Frames are in capture order. The artifact owns them exclusively; once a
/// session hands it off it never sees them again.
#[derive(Debug)]
pub struct Artifact {
    pub channel: String,
    pub format: ArtifactFormat,
    pub started_at: DateTime<Local>,
    /// File name without extension.
    pub stem: String,
    pub width: u32,
    pub height: u32,
    pub frames: Vec<Frame>,
}

impl Artifact {
    /// Start an artifact from its first frame.
    pub(crate) fn begin(
        channel: &str,
        format: ArtifactFormat,
        timestamp_format: &str,
        first: Frame,
    ) -> Self {
        let started_at = first.captured_at_time();
        let (width, height) = first.dimensions();
        Self {
            channel: channel.to_string(),
            format,
            started_at,
            stem: stem(&started_at, timestamp_format),
            width,
            height,
            frames: vec![first],
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.stem, self.format.extension())
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// True when chrono understands every specifier in `format` and the result
/// cannot be empty.
pub fn is_valid_timestamp_format(format: &str) -> bool {
    !format.trim().is_empty() && !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}

fn stem(at: &DateTime<Local>, format: &str) -> String {
    let mut stem = String::new();
    if write!(stem, "{}", at.format(format)).is_ok() && !stem.is_empty() {
        return stem;
    }
    log::warn!("invalid timestamp format '{format}', using '{DEFAULT_TIMESTAMP_FORMAT}'");
    at.format(DEFAULT_TIMESTAMP_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn name_comes_from_first_frame() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let frame = Frame::captured_at(vec![0; 12], 2, 2, at).unwrap();
        let artifact = Artifact::begin("door", ArtifactFormat::Video, DEFAULT_TIMESTAMP_FORMAT, frame);
        assert_eq!(artifact.file_name(), "2024-03-09-07-05-01-000000.mjpeg");
        assert_eq!((artifact.width, artifact.height), (2, 2));
        assert_eq!(artifact.len(), 1);
    }

    #[test]
    fn timestamps_sort_chronologically() {
        let early = Local.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap();
        let late = Local.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap();
        let a = early.format(DEFAULT_TIMESTAMP_FORMAT).to_string();
        let b = late.format(DEFAULT_TIMESTAMP_FORMAT).to_string();
        assert_eq!(a.len(), b.len());
        assert!(a < b);
    }

    #[test]
    fn bad_timestamp_format_falls_back_to_default() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let frame = Frame::captured_at(vec![0; 12], 2, 2, at).unwrap();
        let artifact = Artifact::begin("door", ArtifactFormat::Photo, "%Y-%Q", frame);
        assert_eq!(artifact.file_name(), "2024-03-09-07-05-01-000000.jpg");
    }

    #[test]
    fn timestamp_format_check() {
        assert!(is_valid_timestamp_format(DEFAULT_TIMESTAMP_FORMAT));
        assert!(is_valid_timestamp_format("%s"));
        assert!(!is_valid_timestamp_format("%Y-%Q"));
        assert!(!is_valid_timestamp_format("%"));
        assert!(!is_valid_timestamp_format(""));
    }
}
