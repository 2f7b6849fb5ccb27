//! The recording buffer chain and its background provisioner.
//!
//! A [`RecordingChain`] is a doubly-linked list of fixed-capacity
//! [`RecordingBuffer`] nodes. The real-time capture callback
//! ([`capture_callback`]) is the sole writer of each buffer's samples and
//! `usage`, and the sole writer of the shared `current` cursor; it never
//! allocates. The [`Provisioner`] is an ordinary background thread that
//! keeps a free successor buffer linked in ahead of demand, so the
//! callback never has to allocate to keep up.

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How often the provisioner wakes to check whether the tail needs growing.
const PROVISIONER_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A fixed-capacity node in the recording chain. `prev` is set once at
/// construction time (before the node is published via `next`) and is
/// read-only thereafter, so it needs no atomic wrapper: any thread that
/// observes this node through an acquire-load of the atomic pointer that
/// published it also observes `prev` correctly, by the same
/// release/acquire edge.
pub struct RecordingBuffer {
    samples: UnsafeCell<Vec<f32>>,
    capacity: usize,
    usage: AtomicUsize,
    prev: *mut RecordingBuffer,
    next: AtomicPtr<RecordingBuffer>,
}

// SAFETY: `samples` is mutated only by the capture callback, which is the
// single producer for the buffer it currently holds the cursor to; all
// other access is read-only via the atomic `usage` happens-before edge.
unsafe impl Send for RecordingBuffer {}
unsafe impl Sync for RecordingBuffer {}

impl RecordingBuffer {
    fn new(capacity: usize, prev: *mut RecordingBuffer) -> Self {
        Self {
            samples: UnsafeCell::new(vec![0.0; capacity]),
            capacity,
            usage: AtomicUsize::new(0),
            prev,
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }

    pub fn usage(&self) -> usize {
        self.usage.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// A doubly-linked list of [`RecordingBuffer`] nodes. Owns the chain;
/// freed either by [`RecordingChain::drain`] (normal stop) or by `Drop`
/// (rollback before recording ever started consuming it).
pub struct RecordingChain {
    head: *mut RecordingBuffer,
    tail: Arc<AtomicPtr<RecordingBuffer>>,
}

// SAFETY: ownership of the chain's nodes is exclusive to whichever thread
// holds the `RecordingChain`; shared access to individual nodes during
// recording goes through `Arc<AtomicPtr<_>>` handles, not through this type.
unsafe impl Send for RecordingChain {}

impl RecordingChain {
    /// Allocate a chain with a single buffer of `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        let node = Box::into_raw(Box::new(RecordingBuffer::new(capacity, ptr::null_mut())));
        Self {
            head: node,
            tail: Arc::new(AtomicPtr::new(node)),
        }
    }

    /// Raw pointer to the first buffer — the initial value for the
    /// callback's `current_recording_buffer` cursor.
    pub fn head_ptr(&self) -> *mut RecordingBuffer {
        self.head
    }

    /// A cloneable handle to the tail pointer, shared with the
    /// [`Provisioner`] thread.
    pub fn tail_handle(&self) -> Arc<AtomicPtr<RecordingBuffer>> {
        Arc::clone(&self.tail)
    }

    /// Concatenate, head to tail, the first `usage` samples of each
    /// buffer, then free the whole chain. Must only be called after the
    /// capture callback and provisioner have both stopped running.
    pub fn drain(&mut self) -> Vec<f32> {
        let mut out = Vec::new();
        let mut ptr = self.head;
        while !ptr.is_null() {
            // SAFETY: no other thread touches the chain once capture and
            // the provisioner have been stopped and joined.
            let node = unsafe { Box::from_raw(ptr) };
            let usage = node.usage.load(Ordering::Acquire);
            let samples = unsafe { &*node.samples.get() };
            out.extend_from_slice(&samples[..usage]);
            ptr = node.next.load(Ordering::Acquire);
        }
        self.head = ptr::null_mut();
        self.tail.store(ptr::null_mut(), Ordering::Release);
        out
    }
}

impl Drop for RecordingChain {
    fn drop(&mut self) {
        let mut ptr = self.head;
        while !ptr.is_null() {
            // SAFETY: same as `drain` — exclusive ownership at drop time.
            let node = unsafe { Box::from_raw(ptr) };
            ptr = node.next.load(Ordering::Acquire);
        }
    }
}

/// Single-producer capture: copies `input` into the buffer chain starting
/// at the cursor's current position, advancing through filled buffers.
/// If the chain runs out (the provisioner hasn't kept up), tallies an
/// underflow and drops the remaining frames of this callback — it never
/// blocks or allocates.
pub fn capture_callback(current: &AtomicPtr<RecordingBuffer>, underflows: &AtomicU32, input: &[f32]) {
    let mut buf_ptr = current.load(Ordering::Acquire);
    let mut frame_index = 0usize;

    while frame_index < input.len() {
        // SAFETY: `buf_ptr` is always either the chain's head or a node
        // published through a prior buffer's `next`, and the chain
        // outlives every callback invoked between start and stop.
        let buf = unsafe { &*buf_ptr };
        let usage = buf.usage.load(Ordering::Relaxed);

        if usage == buf.capacity {
            let next = buf.next.load(Ordering::Acquire);
            if next.is_null() {
                underflows.fetch_add(1, Ordering::Relaxed);
                break;
            }
            buf_ptr = next;
            continue;
        }

        let copy_amount = (input.len() - frame_index).min(buf.capacity - usage);
        // SAFETY: this callback is the sole writer of `samples` for the
        // buffer it currently holds the cursor to.
        let dst = unsafe { &mut (*buf.samples.get())[usage..usage + copy_amount] };
        dst.copy_from_slice(&input[frame_index..frame_index + copy_amount]);
        buf.usage.store(usage + copy_amount, Ordering::Release);
        frame_index += copy_amount;
    }

    current.store(buf_ptr, Ordering::Release);
}

/// Walk backward from `current` via `prev`, filling the tail of a
/// length-`n` zero-initialized buffer with the most recently captured
/// samples. Valid only while recording is active.
pub fn latest_samples(current: &AtomicPtr<RecordingBuffer>, n: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; n];
    let mut remaining = n;
    let mut ptr = current.load(Ordering::Acquire);

    while remaining > 0 && !ptr.is_null() {
        // SAFETY: the chain is not freed while recording is active, and
        // this read-only walk never outlives the caller's borrow of it.
        let buf = unsafe { &*ptr };
        let usage = buf.usage.load(Ordering::Acquire);
        let samples = unsafe { &*buf.samples.get() };

        let take = remaining.min(usage);
        let src_start = usage - take;
        let dst_start = remaining - take;
        out[dst_start..dst_start + take].copy_from_slice(&samples[src_start..usage]);
        remaining -= take;

        ptr = buf.prev;
    }

    out
}

/// The background worker that appends fresh buffers to the tail of a
/// [`RecordingChain`] before the capture callback can run dry. Started
/// exactly on `start_recording_clip`, joined exactly on
/// `stop_recording_clip`.
pub struct Provisioner {
    terminate: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Provisioner {
    /// Spawn the worker. `capacity`/`padding` are sample counts (sample
    /// rate times seconds — see [`crate::engine`]'s recording constants).
    pub fn spawn(tail: Arc<AtomicPtr<RecordingBuffer>>, capacity: usize, padding: usize) -> Self {
        let terminate = Arc::new(AtomicBool::new(false));
        let worker_terminate = Arc::clone(&terminate);

        let handle = thread::spawn(move || {
            while !worker_terminate.load(Ordering::Acquire) {
                let tail_ptr = tail.load(Ordering::Acquire);
                if !tail_ptr.is_null() {
                    // SAFETY: the chain is kept alive for the provisioner's
                    // whole lifetime — it's joined before being freed.
                    let tail_buf = unsafe { &*tail_ptr };
                    let usage = tail_buf.usage.load(Ordering::Acquire);
                    if usage + padding >= capacity {
                        let new_node =
                            Box::into_raw(Box::new(RecordingBuffer::new(capacity, tail_ptr)));
                        tail_buf.next.store(new_node, Ordering::Release);
                        tail.store(new_node, Ordering::Release);
                    }
                }
                thread::sleep(PROVISIONER_POLL_INTERVAL);
            }
        });

        Self {
            terminate,
            handle: Some(handle),
        }
    }

    /// Signal termination and join. Blocks for at most one poll interval.
    pub fn join(mut self) {
        self.terminate.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Provisioner {
    fn drop(&mut self) {
        self.terminate.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
