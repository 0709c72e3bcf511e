//! Directory-backed store
//!
//! Each backing object is a regular file under the root directory. Object
//! names are escaped so that `/` and `%` cannot escape the root or collide.

use super::{BackingStore, StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use objectio_common::ObjectStat;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

/// [`BackingStore`] keeping one file per backing object
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Open a store rooted at `root`, creating the directory if needed
    pub async fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        debug!("Opened directory store at {}", root.display());
        Ok(Self { root })
    }

    /// Root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(escape_name(name))
    }
}

/// Escape an object name into a single path component
fn escape_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            '\\' => out.push_str("%5C"),
            _ => out.push(c),
        }
    }
    if out == "." || out == ".." {
        out = out.replace('.', "%2E");
    }
    out
}

#[async_trait]
impl BackingStore for DirStore {
    async fn write(&self, name: &str, data: &[u8], offset: u64) -> StoreResult<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.path_of(name))
            .await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn write_full(&self, name: &str, data: &[u8]) -> StoreResult<()> {
        if data.is_empty() {
            return Err(StoreError::InvalidArgument(
                "zero-length full write".to_string(),
            ));
        }
        // Write aside and rename; escaped names never contain "%t"
        let path = self.path_of(name);
        let tmp = self.root.join(format!("%tmp-{}", escape_name(name)));
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn append(&self, name: &str, data: &[u8]) -> StoreResult<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.path_of(name))
            .await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read(&self, name: &str, offset: u64, length: usize) -> StoreResult<Vec<u8>> {
        let mut file = fs::File::open(self.path_of(name)).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = Vec::with_capacity(length);
        file.take(length as u64).read_to_end(&mut buf).await?;
        Ok(buf)
    }

    async fn remove(&self, name: &str) -> StoreResult<()> {
        fs::remove_file(self.path_of(name)).await?;
        Ok(())
    }

    async fn stat(&self, name: &str) -> StoreResult<ObjectStat> {
        let meta = fs::metadata(self.path_of(name)).await?;
        let mtime: DateTime<Utc> = meta.modified()?.into();
        Ok(ObjectStat::new(meta.len(), mtime))
    }

    async fn truncate(&self, name: &str, size: u64) -> StoreResult<()> {
        let file = OpenOptions::new()
            .write(true)
            .open(self.path_of(name))
            .await?;
        file.set_len(size).await?;
        Ok(())
    }

    async fn create(&self, name: &str) -> StoreResult<()> {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.path_of(name))
            .await?;
        Ok(())
    }
}
