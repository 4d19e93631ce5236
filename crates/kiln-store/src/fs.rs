//! Filesystem log store.
//!
//! Each log is written to `<id>.log.partial` and renamed to `<id>.log` once
//! the source is exhausted, so readers never observe a log being written.
//! Partial files left by a previous process are removed on open.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use kiln_core::store::{LogReader, LogStore};
use kiln_core::{Error, Result};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{self, AsyncWriteExt};
use tracing::{debug, warn};

const PARTIAL_SUFFIX: &str = ".log.partial";

pub struct FsLogStore {
    root: PathBuf,
}

impl FsLogStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    ///
    /// Only one store may be open on a directory at a time.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        remove_partials(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn paths(&self, id: &str) -> Result<(PathBuf, PathBuf)> {
        validate_id(id)?;
        Ok((
            self.root.join(format!("{}.log", id)),
            self.root.join(format!("{}{}", id, PARTIAL_SUFFIX)),
        ))
    }
}

async fn remove_partials(root: &Path) -> Result<()> {
    let mut entries = fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let stale = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(PARTIAL_SUFFIX));
        if stale {
            warn!(path = %path.display(), "Removing interrupted log");
            fs::remove_file(&path).await?;
        }
    }
    Ok(())
}

fn validate_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("invalid log id: {:?}", id)))
    }
}

#[async_trait]
impl LogStore for FsLogStore {
    async fn place(&self, id: &str, mut src: LogReader) -> Result<()> {
        let (final_path, partial_path) = self.paths(id)?;
        if fs::try_exists(&final_path).await? {
            return Err(Error::AlreadyExists(format!("log {}", id)));
        }

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&partial_path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::AlreadyExists(format!("log {}", id)));
            }
            Err(e) => return Err(e.into()),
        };

        let written = async {
            let bytes = io::copy(&mut src, &mut file).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok::<_, std::io::Error>(bytes)
        }
        .await;

        match written {
            Ok(bytes) => {
                drop(file);
                fs::rename(&partial_path, &final_path).await?;
                debug!(id, bytes, "Stored log");
                Ok(())
            }
            Err(e) => {
                drop(file);
                if let Err(cleanup) = fs::remove_file(&partial_path).await {
                    warn!(id, error = %cleanup, "Failed to remove partial log");
                }
                Err(e.into())
            }
        }
    }

    async fn read(&self, id: &str) -> Result<LogReader> {
        let (final_path, _) = self.paths(id)?;
        match File::open(&final_path).await {
            Ok(file) => Ok(Box::pin(file)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(Error::NotFound(format!("log {}", id)))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

    async fn read_all(mut reader: LogReader) -> String {
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_place_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsLogStore::open(dir.path()).await.unwrap();

        assert!(store.read("kiln-1").await.err().unwrap().is_not_found());
        store
            .place("kiln-1", Box::pin(&b"line 1\nline 2\n"[..]))
            .await
            .unwrap();

        assert_eq!(read_all(store.read("kiln-1").await.unwrap()).await, "line 1\nline 2\n");
        assert!(dir.path().join("kiln-1.log").exists());
        assert!(!dir.path().join("kiln-1.log.partial").exists());
    }

    #[tokio::test]
    async fn test_place_is_write_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsLogStore::open(dir.path()).await.unwrap();

        store.place("kiln-1", Box::pin(&b"first"[..])).await.unwrap();
        let err = store
            .place("kiln-1", Box::pin(&b"second"[..]))
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(read_all(store.read("kiln-1").await.unwrap()).await, "first");
    }

    #[tokio::test]
    async fn test_not_readable_while_writing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsLogStore::open(dir.path()).await.unwrap());

        let (mut tx, rx) = tokio::io::duplex(64);
        let placing = {
            let store = store.clone();
            tokio::spawn(async move { store.place("kiln-2", Box::pin(rx)).await })
        };

        tx.write_all(b"partial").await.unwrap();
        tokio::task::yield_now().await;
        assert!(store.read("kiln-2").await.err().unwrap().is_not_found());

        drop(tx);
        placing.await.unwrap().unwrap();
        assert_eq!(read_all(store.read("kiln-2").await.unwrap()).await, "partial");
    }

    struct FailingReader;

    impl AsyncRead for FailingReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Err(std::io::Error::other("stream reset")))
        }
    }

    #[tokio::test]
    async fn test_failed_source_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsLogStore::open(dir.path()).await.unwrap();

        assert!(store.place("kiln-3", Box::pin(FailingReader)).await.is_err());
        assert!(store.read("kiln-3").await.err().unwrap().is_not_found());
        assert!(!dir.path().join("kiln-3.log.partial").exists());

        store.place("kiln-3", Box::pin(&b"retry"[..])).await.unwrap();
        assert_eq!(read_all(store.read("kiln-3").await.unwrap()).await, "retry");
    }

    #[tokio::test]
    async fn test_open_clears_interrupted_writes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("kiln-9.log.partial"), b"half a lo").unwrap();
        std::fs::write(dir.path().join("kiln-8.log"), b"kept").unwrap();

        let store = FsLogStore::open(dir.path()).await.unwrap();
        assert!(!dir.path().join("kiln-9.log.partial").exists());
        assert!(store.read("kiln-9").await.err().unwrap().is_not_found());

        store.place("kiln-9", Box::pin(&b"full log"[..])).await.unwrap();
        assert_eq!(read_all(store.read("kiln-9").await.unwrap()).await, "full log");
        assert_eq!(read_all(store.read("kiln-8").await.unwrap()).await, "kept");
    }

    #[tokio::test]
    async fn test_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsLogStore::open(dir.path()).await.unwrap();

        for id in ["", "../escape", "a/b", ".hidden"] {
            let err = store.read(id).await.err().unwrap();
            assert!(matches!(err, Error::InvalidInput(_)), "{id:?} accepted");
        }
    }
}
