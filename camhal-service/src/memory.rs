// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

//! Buffer pool allocation.
//!
//! Pools are owned by the service layer; the adapter only tracks liveness by
//! buffer identity.

use camhal::{BufferId, Error, Result, YuvPlanes};
use log::warn;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// A buffer handed out by a memory manager.
#[derive(Clone, Copy, Debug)]
pub struct PoolBuffer {
    /// Arena identity, unique across pools for the manager's lifetime.
    pub id: BufferId,
    /// Plane references into the buffer.
    pub planes: YuvPlanes,
}

/// Allocates and frees the buffer pools backing each use case.
pub trait MemoryManager: Send + Sync {
    /// Allocates `count` buffers of `length` bytes each, under fresh ids.
    fn allocate(&self, count: usize, length: usize) -> Result<Vec<PoolBuffer>>;

    /// Releases buffers previously returned by `allocate`.
    fn free(&self, buffers: &[PoolBuffer]);
}

/// Heap-backed pools for bring-up and tests.
#[derive(Default)]
pub struct HeapMemoryManager {
    next_id: AtomicU32,
    heaps: Mutex<HashMap<u32, Vec<u8>>>,
}

impl HeapMemoryManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Default::default()
    }

    /// Buffers currently allocated.
    pub fn allocated(&self) -> usize {
        self.heaps.lock().unwrap().len()
    }
}

impl MemoryManager for HeapMemoryManager {
    fn allocate(&self, count: usize, length: usize) -> Result<Vec<PoolBuffer>> {
        if count == 0 || length == 0 {
            return Err(Error::User);
        }

        let mut heaps = self.heaps.lock().unwrap();
        let mut buffers = Vec::with_capacity(count);
        for _ in 0..count {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let heap = vec![0u8; length];

            // NV12: luma occupies the first two thirds of the buffer
            let y = heap.as_ptr() as u64;
            let planes = YuvPlanes {
                y,
                uv: y + (length as u64 * 2) / 3,
            };

            heaps.insert(id, heap);
            buffers.push(PoolBuffer {
                id: BufferId(id),
                planes,
            });
        }

        Ok(buffers)
    }

    fn free(&self, buffers: &[PoolBuffer]) {
        let mut heaps = self.heaps.lock().unwrap();
        for buffer in buffers {
            if heaps.remove(&buffer.id.0).is_none() {
                warn!("freeing unknown buffer {}", buffer.id);
            }
        }
    }
}
