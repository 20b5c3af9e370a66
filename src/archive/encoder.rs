use image::codecs::jpeg::JpegEncoder as ImageJpegEncoder;
use image::ExtendedColorType;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use crate::capture::{Artifact, ArtifactFormat};
use crate::error::EncodeError;
use crate::frame::Frame;

pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Turns an artifact into a file.
pub trait Encoder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Write every frame of `artifact`, in order, to `path`.
    fn encode(&self, artifact: &Artifact, path: &Path) -> Result<(), EncodeError>;
}

pub fn encoder_for(format: ArtifactFormat, quality: u8) -> Arc<dyn Encoder> {
    match format {
        ArtifactFormat::Photo => Arc::new(JpegEncoder { quality }),
        ArtifactFormat::Video => Arc::new(MjpegEncoder { quality }),
    }
}

/// Encode one frame as JPEG into memory.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut out = Vec::new();
    write_jpeg(&mut out, frame, quality)?;
    Ok(out)
}

fn write_jpeg<W: Write>(out: &mut W, frame: &Frame, quality: u8) -> Result<(), image::ImageError> {
    let mut encoder = ImageJpegEncoder::new_with_quality(out, quality.clamp(1, 100));
    encoder.encode(
        frame.pixels(),
        frame.width(),
        frame.height(),
        ExtendedColorType::Rgb8,
    )
}

/// Reject artifacts whose frames disagree with the artifact geometry.
fn check_frames(artifact: &Artifact) -> Result<(), EncodeError> {
    if artifact.frames.is_empty() {
        return Err(EncodeError::Empty);
    }
    for (index, frame) in artifact.frames.iter().enumerate() {
        let (width, height) = frame.dimensions();
        if (width, height) != (artifact.width, artifact.height) {
            return Err(EncodeError::DimensionMismatch {
                index,
                expected_width: artifact.width,
                expected_height: artifact.height,
                actual_width: width,
                actual_height: height,
            });
        }
    }
    Ok(())
}

/// Run `write` against a fresh file, removing it if anything fails.
fn write_file<F>(path: &Path, write: F) -> Result<(), EncodeError>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<(), EncodeError>,
{
    let result = File::create(path).map_err(EncodeError::from).and_then(|file| {
        let mut out = BufWriter::new(file);
        write(&mut out)?;
        out.flush()?;
        Ok(())
    });
    if result.is_err() {
        let _ = std::fs::remove_file(path);
    }
    result
}

/// Single still image.
pub struct JpegEncoder {
    pub quality: u8,
}

impl Encoder for JpegEncoder {
    fn name(&self) -> &'static str {
        "jpeg"
    }

    fn encode(&self, artifact: &Artifact, path: &Path) -> Result<(), EncodeError> {
        check_frames(artifact)?;
        if artifact.frames.len() != 1 {
            return Err(EncodeError::FrameCount {
                format: self.name(),
                expected: 1,
                actual: artifact.frames.len(),
            });
        }
        write_file(path, |out| {
            write_jpeg(out, &artifact.frames[0], self.quality)?;
            Ok(())
        })
    }
}

/// Motion-JPEG: every frame as a complete JPEG, back to back.
pub struct MjpegEncoder {
    pub quality: u8,
}

impl Encoder for MjpegEncoder {
    fn name(&self) -> &'static str {
        "mjpeg"
    }

    fn encode(&self, artifact: &Artifact, path: &Path) -> Result<(), EncodeError> {
        check_frames(artifact)?;
        write_file(path, |out| {
            for frame in &artifact.frames {
                write_jpeg(out, frame, self.quality)?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureSession, SessionSettings};
    use crate::detect::DetectionKind;

    fn artifact(frames: &[Frame]) -> Artifact {
        let mut session = CaptureSession::new(
            "test",
            SessionSettings {
                max_frames: 1_000,
                ..SessionSettings::default()
            },
        );
        for frame in frames {
            session.handle_frame(DetectionKind::Movement, frame);
        }
        session.finalize().unwrap()
    }

    fn jpeg_count(bytes: &[u8]) -> usize {
        bytes.windows(3).filter(|w| *w == [0xFF, 0xD8, 0xFF]).count()
    }

    #[test]
    fn mjpeg_holds_every_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mjpeg");
        let frames: Vec<Frame> = (0..5u8)
            .map(|i| Frame::filled(16, 8, [i * 40, 10, 10]).unwrap())
            .collect();
        MjpegEncoder { quality: 80 }
            .encode(&artifact(&frames), &path)
            .unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(jpeg_count(&bytes), 5);
        let first = image::load_from_memory(&bytes).unwrap();
        assert_eq!((first.width(), first.height()), (16, 8));
    }

    #[test]
    fn mismatched_frame_is_rejected_and_file_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mjpeg");
        let frames = vec![
            Frame::filled(16, 8, [0, 0, 0]).unwrap(),
            Frame::filled(8, 8, [0, 0, 0]).unwrap(),
        ];
        let err = MjpegEncoder { quality: 80 }
            .encode(&artifact(&frames), &path)
            .unwrap_err();
        assert!(matches!(err, EncodeError::DimensionMismatch { index: 1, .. }));
        assert!(!path.exists());
    }

    #[test]
    fn photo_requires_exactly_one_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.jpg");
        let frames = vec![Frame::filled(4, 4, [0, 0, 0]).unwrap(); 2];
        assert!(matches!(
            JpegEncoder { quality: 80 }.encode(&artifact(&frames), &path),
            Err(EncodeError::FrameCount { expected: 1, actual: 2, .. })
        ));

        JpegEncoder { quality: 80 }
            .encode(&artifact(&frames[..1]), &path)
            .unwrap();
        let image = image::open(&path).unwrap();
        assert_eq!(image.width(), 4);
    }

    #[test]
    fn snapshot_bytes_decode() {
        let frame = Frame::filled(10, 6, [200, 100, 50]).unwrap();
        let bytes = encode_jpeg(&frame, DEFAULT_JPEG_QUALITY).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (10, 6));
    }
}
