//! Single-slot store for the most recently uploaded image.
//!
//! Models "latest known good frame", not a log: every upload fully replaces
//! the previous one. The in-memory record is authoritative; when configured,
//! the latest bytes are also mirrored to disk under a fixed name so operators
//! can look at the file the way the old Express setup served
//! `public/images/latest.jpg`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::clock::Clock;

#[derive(Debug, Error)]
pub enum SlotError {
    /// Upload with a zero-length body; the caller should retry with real data.
    #[error("empty image payload")]
    EmptyPayload,
    /// No upload has ever happened; not fatal, just "no image yet".
    #[error("no image has been uploaded")]
    NotFound,
}

/// The most recent upload, as one immutable unit.
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub stored_at: DateTime<Utc>,
}

/// Where the disk mirror lands. The temp file sits next to the final name so
/// the rename stays on one filesystem and therefore atomic.
#[derive(Debug, Clone)]
pub struct MirrorTarget {
    pub dir: PathBuf,
    pub filename: String,
}

impl MirrorTarget {
    fn final_path(&self) -> PathBuf {
        self.dir.join(&self.filename)
    }

    /// Each write gets its own temp file. Concurrent replaces must never
    /// share a temp path: a second truncating open mid-write would let the
    /// rename publish a torn mix of two uploads.
    fn temp_path(&self, seq: u64) -> PathBuf {
        self.dir.join(format!(".{}.{}.tmp", self.filename, seq))
    }
}

/// Holds at most one image; replaced wholesale on every upload.
pub struct ImageSlot {
    current: RwLock<Option<Arc<ImageRecord>>>,
    clock: Arc<dyn Clock>,
    mirror: Option<MirrorTarget>,
    /// `stored_at` of the record currently published to the mirror. The
    /// mutex serializes renames so a slow early upload cannot overwrite a
    /// newer one on disk.
    mirrored_at: Mutex<Option<DateTime<Utc>>>,
    temp_seq: AtomicU64,
}

impl ImageSlot {
    pub fn new(clock: Arc<dyn Clock>, mirror: Option<MirrorTarget>) -> Self {
        Self {
            current: RwLock::new(None),
            clock,
            mirror,
            mirrored_at: Mutex::new(None),
            temp_seq: AtomicU64::new(0),
        }
    }

    /// Install a new image, replacing whatever was there. The write lock is
    /// held only around the pointer swap; the disk mirror happens after, so
    /// concurrent reads never wait on disk latency. Concurrent replaces are
    /// last-write-wins at the swap point.
    pub async fn replace(
        &self,
        bytes: Vec<u8>,
        content_type: impl Into<String>,
    ) -> Result<DateTime<Utc>, SlotError> {
        if bytes.is_empty() {
            return Err(SlotError::EmptyPayload);
        }

        let record = Arc::new(ImageRecord {
            bytes,
            content_type: content_type.into(),
            stored_at: self.clock.now(),
        });

        {
            let mut current = self.current.write().await;
            *current = Some(record.clone());
        }

        if let Some(mirror) = &self.mirror {
            // Best effort: the in-memory record is already installed, and
            // cross-restart durability is not something callers rely on.
            self.write_mirror(mirror, &record).await;
        }

        Ok(record.stored_at)
    }

    /// Write the record to its own temp file, then publish it under the
    /// fixed name with an atomic rename. The rename is serialized through
    /// `mirrored_at` and skipped when a newer record already landed, so the
    /// mirror file is always one complete upload and never goes backwards.
    async fn write_mirror(&self, mirror: &MirrorTarget, record: &ImageRecord) {
        let temp = mirror.temp_path(self.temp_seq.fetch_add(1, Ordering::Relaxed));
        if let Err(e) = tokio::fs::write(&temp, &record.bytes).await {
            warn!("Disk mirror write failed: {}", e);
            return;
        }

        let mut mirrored_at = self.mirrored_at.lock().await;
        if mirrored_at.is_some_and(|at| at > record.stored_at) {
            let _ = tokio::fs::remove_file(&temp).await;
            return;
        }
        match tokio::fs::rename(&temp, mirror.final_path()).await {
            Ok(()) => {
                *mirrored_at = Some(record.stored_at);
                debug!(path = %mirror.final_path().display(), "Mirrored latest image");
            }
            Err(e) => warn!("Disk mirror rename failed: {}", e),
        }
    }

    /// Snapshot of the current image, or `NotFound` before the first upload.
    pub async fn read(&self) -> Result<Arc<ImageRecord>, SlotError> {
        let current = self.current.read().await;
        current.clone().ok_or(SlotError::NotFound)
    }

    /// Presence and timestamp without cloning the bytes, for status reporting.
    pub async fn stored_at(&self) -> Option<DateTime<Utc>> {
        let current = self.current.read().await;
        current.as_ref().map(|record| record.stored_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn slot() -> ImageSlot {
        let clock = Arc::new(ManualClock::new(
            "2026-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap(),
        ));
        ImageSlot::new(clock, None)
    }

    #[tokio::test]
    async fn read_before_any_upload_is_not_found() {
        let slot = slot();
        assert!(matches!(slot.read().await, Err(SlotError::NotFound)));
        assert!(slot.stored_at().await.is_none());
    }

    #[tokio::test]
    async fn replace_then_read_round_trips() {
        let slot = slot();
        let jpeg_magic = vec![0xFF, 0xD8, 0xFF, 0xE0];

        let stored_at = slot
            .replace(jpeg_magic.clone(), "image/jpeg")
            .await
            .unwrap();

        let record = slot.read().await.unwrap();
        assert_eq!(record.bytes, jpeg_magic);
        assert_eq!(record.content_type, "image/jpeg");
        assert_eq!(record.stored_at, stored_at);
    }

    #[tokio::test]
    async fn second_replace_fully_wins() {
        let slot = slot();
        slot.replace(vec![1, 1, 1], "image/png").await.unwrap();
        slot.replace(vec![2, 2], "image/jpeg").await.unwrap();

        let record = slot.read().await.unwrap();
        assert_eq!(record.bytes, vec![2, 2]);
        assert_eq!(record.content_type, "image/jpeg");
    }

    #[tokio::test]
    async fn empty_payload_is_rejected_and_changes_nothing() {
        let slot = slot();
        assert!(matches!(
            slot.replace(Vec::new(), "image/jpeg").await,
            Err(SlotError::EmptyPayload)
        ));
        assert!(matches!(slot.read().await, Err(SlotError::NotFound)));

        // With a prior record, the rejection leaves it intact.
        slot.replace(vec![9, 9], "image/png").await.unwrap();
        assert!(matches!(
            slot.replace(Vec::new(), "image/jpeg").await,
            Err(SlotError::EmptyPayload)
        ));
        let record = slot.read().await.unwrap();
        assert_eq!(record.bytes, vec![9, 9]);
        assert_eq!(record.content_type, "image/png");
    }

    #[tokio::test]
    async fn mirror_writes_latest_bytes_to_fixed_name() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(
            "2026-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap(),
        ));
        let slot = ImageSlot::new(
            clock,
            Some(MirrorTarget {
                dir: dir.path().to_path_buf(),
                filename: "latest.jpg".to_string(),
            }),
        );

        slot.replace(vec![1, 2, 3], "image/jpeg").await.unwrap();
        slot.replace(vec![4, 5, 6, 7], "image/jpeg").await.unwrap();

        let on_disk = std::fs::read(dir.path().join("latest.jpg")).unwrap();
        assert_eq!(on_disk, vec![4, 5, 6, 7]);
        // Temp files never linger after a successful rename.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.unwrap().file_name().into_string().ok())
            .filter(|name| name.ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "stray temp files: {:?}", leftovers);
    }

    #[tokio::test]
    async fn concurrent_replaces_mirror_one_complete_record() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(
            "2026-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap(),
        ));
        let slot = Arc::new(ImageSlot::new(
            clock,
            Some(MirrorTarget {
                dir: dir.path().to_path_buf(),
                filename: "latest.jpg".to_string(),
            }),
        ));

        let mut handles = Vec::new();
        for i in 1u8..=16 {
            let slot = slot.clone();
            handles.push(tokio::spawn(async move {
                slot.replace(vec![i; i as usize], "image/jpeg").await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Racing uploads each write their own temp file, so the published
        // file is exactly one upload's bytes, never an interleaving of two.
        let on_disk = std::fs::read(dir.path().join("latest.jpg")).unwrap();
        let i = on_disk[0];
        assert_eq!(on_disk, vec![i; i as usize]);

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.unwrap().file_name().into_string().ok())
            .filter(|name| name.ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "stray temp files: {:?}", leftovers);
    }

    #[tokio::test]
    async fn concurrent_replaces_settle_on_one_whole_record() {
        let clock = Arc::new(ManualClock::new(
            "2026-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap(),
        ));
        let slot = Arc::new(ImageSlot::new(clock, None));

        let mut handles = Vec::new();
        for i in 1u8..=16 {
            let slot = slot.clone();
            handles.push(tokio::spawn(async move {
                slot.replace(vec![i; i as usize], format!("image/test-{}", i))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Whichever replace won, the record is internally consistent.
        let record = slot.read().await.unwrap();
        let i = record.bytes[0];
        assert_eq!(record.bytes, vec![i; i as usize]);
        assert_eq!(record.content_type, format!("image/test-{}", i));
    }
}
