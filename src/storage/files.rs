//! Whole-document file I/O: optional reads and atomic, time-bounded writes.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use super::StorageError;

/// Read a whole file. A missing file is `Ok(None)`; any other failure is an error.
pub async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::io(path, e)),
    }
}

/// A document written and synced to a temp file next to its target, waiting
/// to be renamed into place.
#[derive(Debug)]
pub struct StagedWrite {
    temp: PathBuf,
    target: PathBuf,
    timeout: Duration,
}

impl StagedWrite {
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Atomically replace the target with the staged document.
    pub async fn commit(self) -> Result<(), StorageError> {
        let rename = fs::rename(&self.temp, &self.target);
        match tokio::time::timeout(self.timeout, rename).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                let err = StorageError::io(&self.target, e);
                self.discard().await;
                Err(err)
            }
            Err(_) => {
                let err = StorageError::Timeout {
                    path: self.target.clone(),
                    after: self.timeout,
                };
                self.discard().await;
                Err(err)
            }
        }
    }

    /// Remove the temp file, leaving the target untouched.
    pub async fn discard(self) {
        if let Err(e) = fs::remove_file(&self.temp).await {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %self.temp.display(), error = %e, "Failed to remove temp file");
            }
        }
    }
}

fn temp_path(target: &Path) -> PathBuf {
    target.with_extension("tmp")
}

/// Write `data` to a temp file beside `target` and fsync it.
pub async fn stage(target: &Path, data: &[u8], timeout: Duration) -> Result<StagedWrite, StorageError> {
    let temp = temp_path(target);

    let write = async {
        let mut file = fs::File::create(&temp).await?;
        file.write_all(data).await?;
        file.sync_all().await
    };

    let result = tokio::time::timeout(timeout, write).await;
    let staged = StagedWrite {
        temp,
        target: target.to_path_buf(),
        timeout,
    };
    match result {
        Ok(Ok(())) => Ok(staged),
        Ok(Err(e)) => {
            let err = StorageError::io(&staged.temp, e);
            staged.discard().await;
            Err(err)
        }
        Err(_) => {
            staged.discard().await;
            Err(StorageError::Timeout {
                path: target.to_path_buf(),
                after: timeout,
            })
        }
    }
}

/// Replace `target` with `data` so that readers see either the old or the new
/// document, never a truncated one.
pub async fn write_atomic(target: &Path, data: &[u8], timeout: Duration) -> Result<(), StorageError> {
    stage(target, data, timeout).await?.commit().await
}

/// Failure of [`write_pair`]. When `first_replaced` is set the first target
/// already holds its new document and the caller must restore it.
#[derive(Debug)]
pub struct PairWriteError {
    pub source: StorageError,
    pub first_replaced: bool,
}

/// Write two documents as one unit. Both are staged before either is
/// renamed, so a failure while staging leaves both targets unchanged.
pub async fn write_pair(
    first: (&Path, &[u8]),
    second: (&Path, &[u8]),
    timeout: Duration,
) -> Result<(), PairWriteError> {
    let staged_first = stage(first.0, first.1, timeout)
        .await
        .map_err(|source| PairWriteError {
            source,
            first_replaced: false,
        })?;

    let staged_second = match stage(second.0, second.1, timeout).await {
        Ok(staged) => staged,
        Err(source) => {
            staged_first.discard().await;
            return Err(PairWriteError {
                source,
                first_replaced: false,
            });
        }
    };

    if let Err(source) = staged_first.commit().await {
        staged_second.discard().await;
        return Err(PairWriteError {
            source,
            first_replaced: false,
        });
    }

    staged_second.commit().await.map_err(|source| PairWriteError {
        source,
        first_replaced: true,
    })
}
