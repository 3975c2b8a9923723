use crate::SNAPSHOT_VERSION;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SNAPSHOT_FILE: &str = "ledger_snapshot.json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("snapshot io at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("snapshot encoding: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("snapshot digest mismatch: recorded {recorded}, computed {computed}")]
    DigestMismatch { recorded: String, computed: String },
    #[error("unsupported snapshot version {0}")]
    Version(u8),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope<S> {
    version: u8,
    /// sha256 over the compact JSON encoding of `state`.
    digest: String,
    state: S,
}

/// Hex sha256 of the compact JSON encoding of `state`.
pub fn state_digest<S: Serialize>(state: &S) -> Result<String, StorageError> {
    let bytes = serde_json::to_vec(state)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Single-file JSON snapshot, replaced atomically on save.
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Snapshot under `data_dir`, creating the directory if needed.
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self, StorageError> {
        let dir = data_dir.as_ref();
        fs::create_dir_all(dir).map_err(io_err(dir))?;
        Ok(Self {
            path: dir.join(SNAPSHOT_FILE),
        })
    }

    /// Snapshot at an explicit file path.
    pub fn at<P: AsRef<Path>>(file: P) -> Self {
        Self {
            path: file.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load<S: Serialize + DeserializeOwned>(&self) -> Result<Option<S>, StorageError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = fs::read(&self.path).map_err(io_err(&self.path))?;
        let envelope: Envelope<S> = serde_json::from_slice(&data)?;
        if envelope.version != SNAPSHOT_VERSION {
            return Err(StorageError::Version(envelope.version));
        }
        let computed = state_digest(&envelope.state)?;
        if computed != envelope.digest {
            return Err(StorageError::DigestMismatch {
                recorded: envelope.digest,
                computed,
            });
        }
        Ok(Some(envelope.state))
    }

    pub fn save<S: Serialize>(&self, state: &S) -> Result<(), StorageError> {
        let envelope = Envelope {
            version: SNAPSHOT_VERSION,
            digest: state_digest(state)?,
            state,
        };
        let data = serde_json::to_vec_pretty(&envelope)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, data).map_err(io_err(&tmp_path))?;
        fs::rename(&tmp_path, &self.path).map_err(io_err(&self.path))?;
        Ok(())
    }
}
