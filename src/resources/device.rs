//! GPU backend seam.
//!
//! Loads only record uploads and read two monotonically increasing frame
//! counters; completion is observed by polling, never signalled.

use crate::error::{ResourceError, Result};
use parking_lot::Mutex;
use slotmap::SlotMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

slotmap::new_key_type! {
    /// Backend-side object created by an upload
    pub struct DeviceHandle;
}

/// Receipt for a recorded upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadTicket {
    pub handle: DeviceHandle,
    /// Frame index the upload was recorded into
    pub frame: u64,
}

/// Minimal GPU backend surface used by resources
pub trait DeviceBackend: Send + Sync {
    /// Highest frame index handed to the GPU queue
    fn frames_submitted(&self) -> u64;

    /// Highest frame index the GPU has finished
    fn frames_completed(&self) -> u64;

    /// Record an upload into the frame currently being built
    fn record_upload(&self, label: &str, bytes: &[u8]) -> Result<UploadTicket>;

    /// Register in the bindless heap, returning the slot. Idempotent.
    fn bind(&self, handle: DeviceHandle) -> Result<u32>;

    /// Free the backend object; unknown handles are ignored
    fn release(&self, handle: DeviceHandle);
}

#[derive(Debug)]
struct HeadlessUpload {
    label: String,
    bytes: usize,
    bindless: Option<u32>,
}

/// In-process backend with explicit frame control, for tests and tools
pub struct HeadlessDevice {
    submitted: AtomicU64,
    completed: AtomicU64,
    next_bindless: AtomicU32,
    uploads: Mutex<SlotMap<DeviceHandle, HeadlessUpload>>,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self {
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            next_bindless: AtomicU32::new(0),
            uploads: Mutex::new(SlotMap::with_key()),
        }
    }

    /// Convenience for call sites that want the trait object
    pub fn shared() -> Arc<dyn DeviceBackend> {
        Arc::new(Self::new())
    }

    /// Submit the frame being recorded; returns its index
    pub fn end_frame(&self) -> u64 {
        self.submitted.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Mark every submitted frame up to `frame` as finished
    pub fn complete_through(&self, frame: u64) {
        let frame = frame.min(self.submitted.load(Ordering::Acquire));
        self.completed.fetch_max(frame, Ordering::AcqRel);
    }

    /// Submit the current frame and complete everything
    pub fn flush(&self) -> u64 {
        let frame = self.end_frame();
        self.complete_through(frame);
        frame
    }

    /// Live backend objects
    pub fn upload_count(&self) -> usize {
        self.uploads.lock().len()
    }

    pub fn uploaded_bytes(&self) -> usize {
        self.uploads.lock().values().map(|u| u.bytes).sum()
    }

    pub fn label(&self, handle: DeviceHandle) -> Option<String> {
        self.uploads.lock().get(handle).map(|u| u.label.clone())
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceBackend for HeadlessDevice {
    fn frames_submitted(&self) -> u64 {
        self.submitted.load(Ordering::Acquire)
    }

    fn frames_completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    fn record_upload(&self, label: &str, bytes: &[u8]) -> Result<UploadTicket> {
        // the frame being recorded is the one after the last submitted
        let frame = self.frames_submitted() + 1;
        let handle = self.uploads.lock().insert(HeadlessUpload {
            label: label.to_string(),
            bytes: bytes.len(),
            bindless: None,
        });
        Ok(UploadTicket { handle, frame })
    }

    fn bind(&self, handle: DeviceHandle) -> Result<u32> {
        let mut uploads = self.uploads.lock();
        let upload = uploads
            .get_mut(handle)
            .ok_or_else(|| ResourceError::Device(format!("unknown device handle {handle:?}")))?;
        if let Some(slot) = upload.bindless {
            return Ok(slot);
        }
        let slot = self.next_bindless.fetch_add(1, Ordering::Relaxed);
        upload.bindless = Some(slot);
        Ok(slot)
    }

    fn release(&self, handle: DeviceHandle) {
        self.uploads.lock().remove(handle);
    }
}

/// Owned backend object; released when dropped
pub struct DeviceUpload {
    device: Arc<dyn DeviceBackend>,
    ticket: UploadTicket,
    bindless: Option<u32>,
}

impl DeviceUpload {
    pub fn record(device: &Arc<dyn DeviceBackend>, label: &str, bytes: &[u8]) -> Result<Self> {
        let ticket = device.record_upload(label, bytes)?;
        Ok(Self {
            device: Arc::clone(device),
            ticket,
            bindless: None,
        })
    }

    pub fn handle(&self) -> DeviceHandle {
        self.ticket.handle
    }

    pub fn frame(&self) -> u64 {
        self.ticket.frame
    }

    pub fn bindless_slot(&self) -> Option<u32> {
        self.bindless
    }

    pub fn bind(&mut self) -> Result<u32> {
        let slot = self.device.bind(self.ticket.handle)?;
        self.bindless = Some(slot);
        Ok(slot)
    }
}

impl Drop for DeviceUpload {
    fn drop(&mut self) {
        self.device.release(self.ticket.handle);
    }
}

impl std::fmt::Debug for DeviceUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceUpload")
            .field("ticket", &self.ticket)
            .field("bindless", &self.bindless)
            .finish()
    }
}
