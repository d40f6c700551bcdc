//! Content-addressed storage for media that arrives inline as base64.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha2::{Digest, Sha256};

use crate::error::MediaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Record,
    Video,
}

impl MediaKind {
    pub fn extension(self) -> &'static str {
        match self {
            MediaKind::Image => "jpg",
            MediaKind::Record => "mp3",
            MediaKind::Video => "mp4",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaStore {
    image_dir: PathBuf,
    record_dir: PathBuf,
    video_dir: PathBuf,
}

impl MediaStore {
    pub fn new(
        image_dir: impl Into<PathBuf>,
        record_dir: impl Into<PathBuf>,
        video_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            image_dir: image_dir.into(),
            record_dir: record_dir.into(),
            video_dir: video_dir.into(),
        }
    }

    pub fn dir(&self, kind: MediaKind) -> &Path {
        match kind {
            MediaKind::Image => &self.image_dir,
            MediaKind::Record => &self.record_dir,
            MediaKind::Video => &self.video_dir,
        }
    }

    /// Decodes `payload` and writes it under `<sha256>.<ext>`. Identical
    /// payloads land on the same path.
    pub fn store_base64(&self, kind: MediaKind, payload: &str) -> Result<PathBuf, MediaError> {
        let bytes = STANDARD.decode(payload.trim())?;
        let dir = self.dir(kind);
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.{}", sha256_hex(&bytes), kind.extension()));

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.write_all(&bytes)?;
        Ok(path)
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_store(tag: &str) -> MediaStore {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let root = std::env::temp_dir().join(format!("cqbridge-media-{tag}-{nanos}"));
        MediaStore::new(root.join("image"), root.join("record"), root.join("video"))
    }

    #[test]
    fn stores_under_digest_name() {
        let store = temp_store("digest");
        let path = store.store_base64(MediaKind::Image, "aGVsbG8=").unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824.jpg"
        );
        assert_eq!(fs::read(&path).unwrap(), b"hello");
        assert!(path.starts_with(store.dir(MediaKind::Image)));
    }

    #[test]
    fn identical_payloads_share_a_path() {
        let store = temp_store("dedupe");
        let a = store.store_base64(MediaKind::Record, "aGVsbG8=").unwrap();
        let b = store.store_base64(MediaKind::Record, "aGVsbG8=").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.extension().unwrap(), "mp3");
    }

    #[test]
    fn invalid_base64_is_a_decode_error() {
        let store = temp_store("invalid");
        let err = store.store_base64(MediaKind::Video, "***").unwrap_err();
        assert!(matches!(err, MediaError::Decode(_)));
        assert!(!store.dir(MediaKind::Video).exists());
    }
}
