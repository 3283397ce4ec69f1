//! File access for metadata and payloads.

use crate::awaitable::Awaitable;
use crate::error::{ResourceError, Result};
use ahash::AHashMap;
use crossbeam::channel::{self, Sender};
use parking_lot::{Mutex, RwLock};
use std::fs;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Storage the loader reads from and writes to
pub trait FileIo: Send + Sync {
    /// Read `size` bytes at `offset`; `size == 0` reads to the end
    fn read(&self, path: &str, offset: u64, size: u64) -> Result<Vec<u8>>;

    fn write(&self, path: &str, bytes: &[u8]) -> Result<()>;

    /// File names (not paths) with the given extension
    fn list(&self, extension: &str) -> Result<Vec<String>>;

    fn exists(&self, path: &str) -> bool;
}

fn check_window(path: &str, len: usize, offset: u64, size: u64) -> Result<(usize, usize)> {
    let start = usize::try_from(offset).unwrap_or(usize::MAX);
    if start > len {
        return Err(ResourceError::CorruptPayload(format!(
            "{path}: offset {offset} past end of file ({len} bytes)"
        )));
    }
    let end = if size == 0 {
        len
    } else {
        start.saturating_add(usize::try_from(size).unwrap_or(usize::MAX))
    };
    if end > len {
        return Err(ResourceError::CorruptPayload(format!(
            "{path}: payload window {offset}+{size} exceeds {len} bytes"
        )));
    }
    Ok((start, end))
}

/// Filesystem rooted at the resource directory
pub struct FsIo {
    root: PathBuf,
}

impl FsIo {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

impl FileIo for FsIo {
    fn read(&self, path: &str, offset: u64, size: u64) -> Result<Vec<u8>> {
        let full = self.resolve(path);
        let mut file = fs::File::open(&full).map_err(|e| match e.kind() {
            ErrorKind::NotFound => ResourceError::FileNotFound(full.display().to_string()),
            _ => ResourceError::Io(format!("Failed to open {}: {e}", full.display())),
        })?;
        let len = file.metadata()?.len();
        let len = usize::try_from(len).unwrap_or(usize::MAX);
        let (start, end) = check_window(path, len, offset, size)?;

        file.seek(SeekFrom::Start(start as u64))?;
        let mut bytes = vec![0u8; end - start];
        file.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    fn write(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&full, bytes)
            .map_err(|e| ResourceError::Io(format!("Failed to write {}: {e}", full.display())))
    }

    fn list(&self, extension: &str) -> Result<Vec<String>> {
        let mut files = Vec::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(files),
            Err(e) => {
                return Err(ResourceError::Io(format!(
                    "Failed to read directory {}: {e}",
                    self.root.display()
                )))
            }
        };

        for entry in entries {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|ext| ext.to_str()) != Some(extension) {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
                files.push(name.to_string());
            }
        }
        files.sort();
        Ok(files)
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_file()
    }
}

/// In-memory files, for tests and tools
#[derive(Default)]
pub struct MemoryIo {
    files: RwLock<AHashMap<String, Arc<Vec<u8>>>>,
}

impl MemoryIo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<String>, bytes: Vec<u8>) {
        self.files.write().insert(path.into(), Arc::new(bytes));
    }

    pub fn remove(&self, path: &str) -> bool {
        self.files.write().remove(path).is_some()
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

impl FileIo for MemoryIo {
    fn read(&self, path: &str, offset: u64, size: u64) -> Result<Vec<u8>> {
        let file = self
            .files
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| ResourceError::FileNotFound(path.to_string()))?;
        let (start, end) = check_window(path, file.len(), offset, size)?;
        Ok(file[start..end].to_vec())
    }

    fn write(&self, path: &str, bytes: &[u8]) -> Result<()> {
        self.insert(path, bytes.to_vec());
        Ok(())
    }

    fn list(&self, extension: &str) -> Result<Vec<String>> {
        let suffix = format!(".{extension}");
        let mut files: Vec<_> = self
            .files
            .read()
            .keys()
            .filter(|name| name.ends_with(&suffix) && !name.contains('/'))
            .cloned()
            .collect();
        files.sort();
        Ok(files)
    }

    fn exists(&self, path: &str) -> bool {
        self.files.read().contains_key(path)
    }
}

#[derive(Default)]
struct ReadSlot {
    done: AtomicBool,
    result: Mutex<Option<Result<Vec<u8>>>>,
}

impl ReadSlot {
    fn complete(&self, result: Result<Vec<u8>>) {
        *self.result.lock() = Some(result);
        self.done.store(true, Ordering::Release);
    }
}

/// Background read in progress
pub struct PendingRead {
    slot: Arc<ReadSlot>,
}

impl PendingRead {
    fn completed(result: Result<Vec<u8>>) -> Self {
        let slot = Arc::new(ReadSlot::default());
        slot.complete(result);
        Self { slot }
    }

    pub fn is_ready(&self) -> bool {
        self.slot.done.load(Ordering::Acquire)
    }

    /// Suspension point that becomes ready with the read
    pub fn awaitable(&self) -> ReadReady {
        ReadReady {
            slot: Arc::clone(&self.slot),
        }
    }

    /// Take the bytes once ready
    pub fn take(self) -> Result<Vec<u8>> {
        if !self.is_ready() {
            return Err(ResourceError::Io("read taken before completion".to_string()));
        }
        self.slot
            .result
            .lock()
            .take()
            .unwrap_or(Err(ResourceError::Disposed))
    }
}

/// Awaitable view of a [`PendingRead`]
pub struct ReadReady {
    slot: Arc<ReadSlot>,
}

impl Awaitable for ReadReady {
    fn ready(&mut self) -> bool {
        self.slot.done.load(Ordering::Acquire)
    }
}

struct ReadJob {
    path: String,
    offset: u64,
    size: u64,
    slot: Arc<ReadSlot>,
}

struct IoQueueInner {
    io: Arc<dyn FileIo>,
    sender: Mutex<Option<Sender<ReadJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl IoQueueInner {
    fn shutdown(&self) {
        // closing the channel ends every worker loop
        self.sender.lock().take();
        let current = thread::current().id();
        for worker in self.workers.lock().drain(..) {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                warn!("io worker panicked");
            }
        }
    }
}

impl Drop for IoQueueInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Runs reads on background threads
#[derive(Clone)]
pub struct IoQueue {
    inner: Arc<IoQueueInner>,
}

impl IoQueue {
    /// `threads == 0` performs every read inline
    pub fn new(io: Arc<dyn FileIo>, threads: usize) -> Self {
        let mut workers = Vec::with_capacity(threads);
        let sender = if threads == 0 {
            None
        } else {
            let (sender, receiver) = channel::unbounded::<ReadJob>();
            for index in 0..threads {
                let receiver = receiver.clone();
                let io = Arc::clone(&io);
                let spawned = thread::Builder::new()
                    .name(format!("resource-io-{index}"))
                    .spawn(move || {
                        for job in receiver.iter() {
                            let result = io.read(&job.path, job.offset, job.size);
                            job.slot.complete(result);
                        }
                    });
                match spawned {
                    Ok(handle) => workers.push(handle),
                    Err(e) => warn!(error = %e, "failed to spawn io worker"),
                }
            }
            // without any worker the queue falls back to inline reads
            (!workers.is_empty()).then_some(sender)
        };
        debug!(threads = workers.len(), "io queue started");

        Self {
            inner: Arc::new(IoQueueInner {
                io,
                sender: Mutex::new(sender),
                workers: Mutex::new(workers),
            }),
        }
    }

    pub fn io(&self) -> &Arc<dyn FileIo> {
        &self.inner.io
    }

    /// Synchronous read on the calling thread
    pub fn read(&self, path: &str, offset: u64, size: u64) -> Result<Vec<u8>> {
        self.inner.io.read(path, offset, size)
    }

    /// Start a read; inline when no workers run
    pub fn read_async(&self, path: &str, offset: u64, size: u64) -> PendingRead {
        let slot = Arc::new(ReadSlot::default());
        let sender = self.inner.sender.lock().clone();
        match sender {
            Some(sender) => {
                let job = ReadJob {
                    path: path.to_string(),
                    offset,
                    size,
                    slot: Arc::clone(&slot),
                };
                if let Err(err) = sender.send(job) {
                    err.into_inner().slot.complete(Err(ResourceError::Disposed));
                }
                PendingRead { slot }
            }
            None => PendingRead::completed(self.read(path, offset, size)),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.inner.workers.lock().len()
    }

    /// Stop the workers; later reads run inline
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}
