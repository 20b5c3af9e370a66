//! Durable storage of finished artifacts.
//!
//! Each artifact gets its own worker thread: encode to the destination (or a
//! scratch directory when the destination is remote), upload, and on upload
//! failure move the file into the backup directory. The capture loop never
//! waits on any of it.

mod destination;
mod encoder;
mod uploader;
mod writer;

pub use destination::{expand_date, Destination};
pub use encoder::{encode_jpeg, encoder_for, Encoder, JpegEncoder, MjpegEncoder, DEFAULT_JPEG_QUALITY};
pub use uploader::{uploader_for, FtpUploader, HttpUploader, Uploader, DEFAULT_UPLOAD_TIMEOUT};
pub use writer::{ArchiveOutcome, ArchiveSettings, ArchiveWriter};
