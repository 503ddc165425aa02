//! Durable room backups.
//!
//! The whole document is persisted as one small file so a device that
//! restarts can rejoin its room with history intact even when it was the
//! last replica alive. On-disk layout:
//!
//! ```text
//! base64( bincode( Container { magic, version, room_code, saved_at_ms,
//!                              lz4(full yrs update) } ) )
//! ```
//!
//! The base64 body is wrapped into fixed-width lines to keep the file
//! friendly to tooling that chokes on single multi-megabyte lines. Writes
//! go through a temp file and an atomic rename, so a crash mid-save leaves
//! the previous backup untouched.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use auxparty_core::{GameDoc, RoomCode};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const MAGIC: [u8; 4] = *b"APTY";
const FORMAT_VERSION: u16 = 1;
/// Width of one base64 line in the snapshot file.
const CHUNK_LEN: usize = 0x8000;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("could not encode snapshot: {0}")]
    Encode(String),
    #[error("corrupt snapshot: {0}")]
    Corrupt(String),
    #[error("snapshot format v{0} is not supported")]
    UnsupportedVersion(u16),
}

#[derive(Serialize, Deserialize)]
struct Container {
    magic: [u8; 4],
    version: u16,
    room_code: String,
    saved_at_ms: i64,
    /// LZ4 block-compressed full document update (v1 encoding).
    doc: Vec<u8>,
}

/// One snapshot file per room code under a storage directory.
pub struct SnapshotStore {
    code: RoomCode,
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl AsRef<Path>, code: RoomCode) -> Self {
        let path = dir.as_ref().join(format!("room-{}.snapshot", code.as_str()));
        Self { code, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the current document state, replacing any previous backup.
    pub fn save(&self, doc: &GameDoc, now_ms: i64) -> Result<(), SnapshotError> {
        let container = Container {
            magic: MAGIC,
            version: FORMAT_VERSION,
            room_code: self.code.as_str().to_string(),
            saved_at_ms: now_ms,
            doc: lz4_flex::compress_prepend_size(&doc.save()),
        };
        let packed = bincode::serde::encode_to_vec(&container, bincode::config::standard())
            .map_err(|e| SnapshotError::Encode(e.to_string()))?;

        let encoded = STANDARD.encode(&packed);
        let mut body = String::with_capacity(encoded.len() + encoded.len() / CHUNK_LEN + 1);
        for chunk in encoded.as_bytes().chunks(CHUNK_LEN) {
            // Chunks come from an ASCII string, so this cannot fail.
            body.push_str(std::str::from_utf8(chunk).unwrap_or_default());
            body.push('\n');
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("snapshot.tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.path)?;
        debug!("saved snapshot to {}", self.path.display());
        Ok(())
    }

    /// Loads the backup for this room, or `None` when there is none or it
    /// belongs to a different room.
    pub fn restore(&self) -> Result<Option<GameDoc>, SnapshotError> {
        let body = match fs::read_to_string(&self.path) {
            Ok(body) => body,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let joined: String = body.split_whitespace().collect();
        let packed = STANDARD
            .decode(joined)
            .map_err(|e| SnapshotError::Corrupt(e.to_string()))?;
        let (container, _): (Container, _) =
            bincode::serde::decode_from_slice(&packed, bincode::config::standard())
                .map_err(|e| SnapshotError::Corrupt(e.to_string()))?;

        if container.magic != MAGIC {
            return Err(SnapshotError::Corrupt("bad magic".into()));
        }
        if container.version != FORMAT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(container.version));
        }
        if container.room_code != self.code.as_str() {
            warn!(
                "snapshot at {} is for room {}, ignoring",
                self.path.display(),
                container.room_code
            );
            return Ok(None);
        }

        let update = lz4_flex::decompress_size_prepended(&container.doc)
            .map_err(|e| SnapshotError::Corrupt(e.to_string()))?;
        let doc = GameDoc::load(&update).map_err(|e| SnapshotError::Corrupt(e.to_string()))?;
        debug!(
            "restored snapshot from {} (saved at {})",
            self.path.display(),
            container.saved_at_ms
        );
        Ok(Some(doc))
    }

    /// Restore, but treat unreadable backups as absent. This is the join
    /// path: a corrupt file must never keep anyone out of their room.
    pub fn restore_or_fresh(&self) -> Option<GameDoc> {
        match self.restore() {
            Ok(doc) => doc,
            Err(e) => {
                warn!("discarding unusable snapshot {}: {e}", self.path.display());
                None
            }
        }
    }

    /// Removes the backup, if any.
    pub fn wipe(&self) -> Result<(), SnapshotError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
