//! In-memory backing store
//!
//! Holds every object in a map. Faults can be injected per object and
//! operation, every call is recorded, and an artificial delay can be added,
//! which is what the striper tests use to exercise partial failures,
//! fail-fast dispatch and cancellation.

use super::{BackingStore, StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use objectio_common::ObjectStat;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::time::Duration;

/// Backing store operation kinds, for fault injection and call logs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FaultOp {
    Write,
    WriteFull,
    Append,
    Read,
    Remove,
    Stat,
    Truncate,
    Create,
}

#[derive(Debug, Clone)]
struct MemoryObject {
    data: Vec<u8>,
    mtime: DateTime<Utc>,
}

impl MemoryObject {
    fn empty() -> Self {
        Self {
            data: Vec::new(),
            mtime: Utc::now(),
        }
    }

    fn touch(&mut self) {
        self.mtime = Utc::now();
    }
}

#[derive(Debug, Clone)]
struct Fault {
    op: FaultOp,
    object: String,
    error: StoreError,
    delay: Option<Duration>,
}

/// In-memory [`BackingStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, MemoryObject>>,
    faults: RwLock<Vec<Fault>>,
    calls: RwLock<Vec<(FaultOp, String)>>,
    reject_empty_write_full: bool,
    delay: Option<Duration>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject zero-length full writes with `InvalidArgument`
    #[must_use]
    pub const fn rejecting_empty_write_full(mut self) -> Self {
        self.reject_empty_write_full = true;
        self
    }

    /// Sleep before serving each call
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make `op` on `object` fail with `error` until faults are cleared
    pub fn fail_on(&self, op: FaultOp, object: impl Into<String>, error: StoreError) {
        self.faults.write().push(Fault {
            op,
            object: object.into(),
            error,
            delay: None,
        });
    }

    /// Like [`fail_on`](Self::fail_on), but the failing call first stalls
    /// for `delay` while other calls proceed
    pub fn fail_slowly_on(
        &self,
        op: FaultOp,
        object: impl Into<String>,
        error: StoreError,
        delay: Duration,
    ) {
        self.faults.write().push(Fault {
            op,
            object: object.into(),
            error,
            delay: Some(delay),
        });
    }

    /// Remove all injected faults
    pub fn clear_faults(&self) {
        self.faults.write().clear();
    }

    /// Names of all stored objects, sorted
    #[must_use]
    pub fn object_names(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }

    /// Content of one object
    #[must_use]
    pub fn object_data(&self, name: &str) -> Option<Vec<u8>> {
        self.objects.read().get(name).map(|o| o.data.clone())
    }

    /// Every call served so far, in arrival order
    #[must_use]
    pub fn calls(&self) -> Vec<(FaultOp, String)> {
        self.calls.read().clone()
    }

    /// Number of calls of one kind
    #[must_use]
    pub fn call_count(&self, op: FaultOp) -> usize {
        self.calls.read().iter().filter(|(o, _)| *o == op).count()
    }

    /// Forget the call log
    pub fn reset_calls(&self) {
        self.calls.write().clear();
    }

    async fn enter(&self, op: FaultOp, name: &str) -> StoreResult<()> {
        self.calls.write().push((op, name.to_string()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let fault = self
            .faults
            .read()
            .iter()
            .find(|f| f.op == op && f.object == name)
            .cloned();
        match fault {
            Some(fault) => {
                if let Some(delay) = fault.delay {
                    tokio::time::sleep(delay).await;
                }
                Err(fault.error)
            }
            None => Ok(()),
        }
    }
}

fn write_at(buf: &mut Vec<u8>, data: &[u8], offset: u64) {
    let start = offset as usize;
    let end = start + data.len();
    if buf.len() < end {
        buf.resize(end, 0);
    }
    buf[start..end].copy_from_slice(data);
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn write(&self, name: &str, data: &[u8], offset: u64) -> StoreResult<()> {
        self.enter(FaultOp::Write, name).await?;
        let mut objects = self.objects.write();
        let object = objects
            .entry(name.to_string())
            .or_insert_with(MemoryObject::empty);
        write_at(&mut object.data, data, offset);
        object.touch();
        Ok(())
    }

    async fn write_full(&self, name: &str, data: &[u8]) -> StoreResult<()> {
        self.enter(FaultOp::WriteFull, name).await?;
        if data.is_empty() && self.reject_empty_write_full {
            return Err(StoreError::InvalidArgument(
                "zero-length full write".to_string(),
            ));
        }
        self.objects.write().insert(
            name.to_string(),
            MemoryObject {
                data: data.to_vec(),
                mtime: Utc::now(),
            },
        );
        Ok(())
    }

    async fn append(&self, name: &str, data: &[u8]) -> StoreResult<()> {
        self.enter(FaultOp::Append, name).await?;
        let mut objects = self.objects.write();
        let object = objects
            .entry(name.to_string())
            .or_insert_with(MemoryObject::empty);
        object.data.extend_from_slice(data);
        object.touch();
        Ok(())
    }

    async fn read(&self, name: &str, offset: u64, length: usize) -> StoreResult<Vec<u8>> {
        self.enter(FaultOp::Read, name).await?;
        let objects = self.objects.read();
        let object = objects.get(name).ok_or(StoreError::NotFound)?;
        let start = (offset as usize).min(object.data.len());
        let end = start.saturating_add(length).min(object.data.len());
        Ok(object.data[start..end].to_vec())
    }

    async fn remove(&self, name: &str) -> StoreResult<()> {
        self.enter(FaultOp::Remove, name).await?;
        self.objects
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn stat(&self, name: &str) -> StoreResult<ObjectStat> {
        self.enter(FaultOp::Stat, name).await?;
        self.objects
            .read()
            .get(name)
            .map(|o| ObjectStat::new(o.data.len() as u64, o.mtime))
            .ok_or(StoreError::NotFound)
    }

    async fn truncate(&self, name: &str, size: u64) -> StoreResult<()> {
        self.enter(FaultOp::Truncate, name).await?;
        let mut objects = self.objects.write();
        let object = objects.get_mut(name).ok_or(StoreError::NotFound)?;
        object.data.resize(size as usize, 0);
        object.touch();
        Ok(())
    }

    async fn create(&self, name: &str) -> StoreResult<()> {
        self.enter(FaultOp::Create, name).await?;
        self.objects
            .write()
            .entry(name.to_string())
            .or_insert_with(MemoryObject::empty);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_extends_with_zeros() {
        let store = MemoryStore::new();
        store.write("obj", b"abc", 5).await.unwrap();
        assert_eq!(store.object_data("obj").unwrap(), b"\0\0\0\0\0abc");
        assert_eq!(store.stat("obj").await.unwrap().size, 8);
    }

    #[tokio::test]
    async fn test_read_is_short_at_end() {
        let store = MemoryStore::new();
        store.write_full("obj", b"hello").await.unwrap();
        assert_eq!(store.read("obj", 3, 10).await.unwrap(), b"lo");
        assert!(store.read("obj", 9, 10).await.unwrap().is_empty());
        assert_eq!(store.read("missing", 0, 1).await, Err(StoreError::NotFound));
    }

    #[tokio::test]
    async fn test_append_truncate_create() {
        let store = MemoryStore::new();
        store.append("obj", b"ab").await.unwrap();
        store.append("obj", b"cd").await.unwrap();
        assert_eq!(store.object_data("obj").unwrap(), b"abcd");

        store.truncate("obj", 1).await.unwrap();
        assert_eq!(store.object_data("obj").unwrap(), b"a");
        assert_eq!(store.truncate("missing", 0).await, Err(StoreError::NotFound));

        store.create("obj").await.unwrap();
        assert_eq!(store.object_data("obj").unwrap(), b"a");
        store.create("fresh").await.unwrap();
        assert_eq!(store.stat("fresh").await.unwrap().size, 0);
    }

    #[tokio::test]
    async fn test_remove() {
        let store = MemoryStore::new();
        store.create("obj").await.unwrap();
        store.remove("obj").await.unwrap();
        assert_eq!(store.remove("obj").await, Err(StoreError::NotFound));
    }

    #[tokio::test]
    async fn test_empty_write_full() {
        let store = MemoryStore::new();
        store.write_full("obj", b"").await.unwrap();
        assert_eq!(store.stat("obj").await.unwrap().size, 0);

        let strict = MemoryStore::new().rejecting_empty_write_full();
        assert!(matches!(
            strict.write_full("obj", b"").await,
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_fault_injection_and_call_log() {
        let store = MemoryStore::new();
        store.fail_on(FaultOp::Write, "bad", StoreError::backend(-5, "EIO"));

        assert!(store.write("good", b"x", 0).await.is_ok());
        assert_eq!(
            store.write("bad", b"x", 0).await,
            Err(StoreError::backend(-5, "EIO"))
        );
        // Other operations on the same object are unaffected
        assert!(store.write_full("bad", b"x").await.is_ok());

        assert_eq!(store.call_count(FaultOp::Write), 2);
        assert_eq!(store.calls()[1], (FaultOp::Write, "bad".to_string()));

        store.clear_faults();
        assert!(store.write("bad", b"y", 0).await.is_ok());

        store.reset_calls();
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_slow_fault_lets_other_calls_through() {
        let store = MemoryStore::new();
        store.fail_slowly_on(
            FaultOp::Write,
            "slow",
            StoreError::backend(-5, "EIO"),
            Duration::from_millis(50),
        );

        let (slow, fast) = tokio::join!(store.write("slow", b"x", 0), store.write("fast", b"y", 0));
        assert_eq!(slow, Err(StoreError::backend(-5, "EIO")));
        assert!(fast.is_ok());
        assert!(store.object_data("slow").is_none());
        assert_eq!(store.object_data("fast").unwrap(), b"y");
    }
}
