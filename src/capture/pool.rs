//! Bounded pool of reusable frame buffers

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use crossbeam::queue::ArrayQueue;
use crossbeam::utils::CachePadded;

use super::frame::FrameFormat;
use crate::error::{Result, VcamError};

/// Default number of buffers that may be outstanding at once
pub const DEFAULT_POOL_THRESHOLD: usize = 5;

/// Fixed-format buffer pool with a hard cap on outstanding buffers.
///
/// Acquisition never blocks. Buffers come back through `Drop`, which may run
/// on any thread, so the outstanding count is atomic and the free list is a
/// lock-free queue.
#[derive(Clone)]
pub struct FramePool {
    shared: Arc<PoolShared>,
}

struct PoolShared {
    free: ArrayQueue<BytesMut>,
    outstanding: CachePadded<AtomicUsize>,
    allocated: AtomicUsize,
    threshold: usize,
    frame_size: usize,
    row_stride: usize,
    row_bytes: usize,
    width: u32,
    height: u32,
}

impl FramePool {
    pub fn new(format: &FrameFormat, threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            shared: Arc::new(PoolShared {
                free: ArrayQueue::new(threshold),
                outstanding: CachePadded::new(AtomicUsize::new(0)),
                allocated: AtomicUsize::new(0),
                threshold,
                frame_size: format.frame_size(),
                row_stride: format.row_stride(),
                row_bytes: format.packed_row_bytes(),
                width: format.width,
                height: format.height,
            }),
        }
    }

    /// Take a buffer, or fail immediately once `threshold` are outstanding
    pub fn acquire(&self) -> Result<FrameBuffer> {
        let shared = &self.shared;
        let reserved = shared
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < shared.threshold).then_some(n + 1)
            });
        if let Err(outstanding) = reserved {
            return Err(VcamError::PoolExhausted {
                outstanding,
                threshold: shared.threshold,
            });
        }

        let data = match shared.free.pop() {
            Some(data) => data,
            None => {
                shared.allocated.fetch_add(1, Ordering::Relaxed);
                BytesMut::zeroed(shared.frame_size)
            }
        };

        Ok(FrameBuffer {
            data: Some(data),
            pool: Arc::clone(&self.shared),
        })
    }

    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.load(Ordering::Acquire)
    }

    pub fn threshold(&self) -> usize {
        self.shared.threshold
    }

    /// Number of distinct allocations made so far
    pub fn allocated(&self) -> usize {
        self.shared.allocated.load(Ordering::Relaxed)
    }
}

/// Pooled pixel memory for one frame
pub struct FrameBuffer {
    data: Option<BytesMut>,
    pool: Arc<PoolShared>,
}

impl FrameBuffer {
    pub fn width(&self) -> u32 {
        self.pool.width
    }

    pub fn height(&self) -> u32 {
        self.pool.height
    }

    /// Bytes per row, padding included
    pub fn row_stride(&self) -> usize {
        self.pool.row_stride
    }

    /// Bytes of pixel data per row, padding excluded
    pub fn row_bytes(&self) -> usize {
        self.pool.row_bytes
    }

    pub fn as_slice(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().unwrap_or(&mut [])
    }

    /// Row `y`, padding included
    pub fn row(&self, y: usize) -> Option<&[u8]> {
        let stride = self.row_stride();
        self.as_slice().get(y * stride..(y + 1) * stride)
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            // Queue holds `threshold` slots, so this only fails if the pool
            // was shrunk underneath us; the buffer is then simply freed.
            let _ = self.pool.free.push(data);
        }
        self.pool.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}
