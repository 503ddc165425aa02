//! Stable device identity.
//!
//! Player identity survives restarts and reconnects through one uuid kept
//! in a plain text file next to the snapshots. Transport-level peer ids
//! change on every connection; this one never does.

use std::fs;
use std::io;
use std::path::Path;

use log::debug;
use thiserror::Error;
use uuid::Uuid;

const FILE_NAME: &str = "device-id";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Reads the device id from `dir`, minting and persisting a fresh one on
/// first run (or when the file has been scribbled over).
pub fn load_or_create_device_id(dir: impl AsRef<Path>) -> Result<Uuid, IdentityError> {
    let dir = dir.as_ref();
    let path = dir.join(FILE_NAME);
    match fs::read_to_string(&path) {
        Ok(text) => {
            if let Ok(id) = Uuid::parse_str(text.trim()) {
                return Ok(id);
            }
            debug!("device id file unreadable, minting a new one");
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    let id = Uuid::new_v4();
    fs::create_dir_all(dir)?;
    fs::write(&path, id.to_string())?;
    Ok(id)
}
