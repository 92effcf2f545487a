// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

//! Per-buffer, per-class reference counting.
//!
//! Each frame-type class has its own table and its own lock, so completion
//! handling for one class never blocks another.  A count is seeded when the
//! buffer surfaces and drops as consumers return the buffer; the zero
//! crossing recycles the buffer to the pipeline exactly once.

use super::frame::TypeClass;
use super::types::BufferId;
use log::warn;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Outcome of releasing one reference.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Release {
    /// Other consumers still hold the buffer.
    Held,
    /// The combined count reached zero; requeue to the pipeline.
    Recycle,
    /// The count was already zero.  Caller bug; the buffer is not requeued.
    Underflow,
}

/// A consumer with a drain counter.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Consumer {
    Display,
    Encoder,
}

#[derive(Default)]
struct Table {
    counts: Vec<Option<u32>>,
}

impl Table {
    fn get(&self, id: BufferId) -> Option<u32> {
        self.counts.get(id.index()).copied().flatten()
    }

    fn set(&mut self, id: BufferId, count: u32) {
        if self.counts.len() <= id.index() {
            self.counts.resize(id.index() + 1, None);
        }
        self.counts[id.index()] = Some(count);
    }

    fn release(&mut self, id: BufferId, extra: u32) -> Release {
        let count = match self.get(id) {
            Some(count) if count > 0 => count - 1,
            _ => {
                warn!("buffer {} returned with no outstanding references", id);
                return Release::Underflow;
            }
        };
        self.set(id, count);

        if count + extra == 0 {
            Release::Recycle
        } else {
            Release::Held
        }
    }
}

#[derive(Default)]
struct DrainCounts {
    display: u32,
    encoder: u32,
}

/// Reference counts per frame-type class, plus consumer drain counters.
pub(crate) struct FrameRefCounter {
    tables: [Mutex<Table>; TypeClass::COUNT],
    drain: Mutex<DrainCounts>,
    drained: Condvar,
}

impl FrameRefCounter {
    pub fn new() -> Self {
        Self {
            tables: Default::default(),
            drain: Mutex::new(Default::default()),
            drained: Condvar::new(),
        }
    }

    /// Seeds counts for a freshly registered pool.  Slots past the queueable
    /// limit stay with the provider (count 1); the rest are available.
    pub fn register(&self, class: TypeClass, ids: &[BufferId], queueable: usize) {
        let mut table = self.tables[class.index()].lock().unwrap();
        for (i, &id) in ids.iter().enumerate() {
            table.set(id, u32::from(i >= queueable));
        }
    }

    /// Sets one class count at buffer-surfacing time.
    pub fn init(&self, class: TypeClass, id: BufferId, count: u32) {
        self.tables[class.index()].lock().unwrap().set(id, count);
    }

    #[cfg(test)]
    pub fn count(&self, class: TypeClass, id: BufferId) -> Option<u32> {
        self.tables[class.index()].lock().unwrap().get(id)
    }

    /// Drops one reference.  With `fold`, the cross-credited class count is
    /// added before the zero check, so a buffer shared between the two
    /// classes is not recycled while either side still holds it.  Both class
    /// locks are taken in discriminant order.
    pub fn release(&self, class: TypeClass, id: BufferId, fold: Option<TypeClass>) -> Release {
        let fold = match fold {
            Some(other) if other != class => other,
            _ => {
                let mut table = self.tables[class.index()].lock().unwrap();
                return table.release(id, 0);
            }
        };

        let (mut own, folded) = if class < fold {
            let own = self.tables[class.index()].lock().unwrap();
            let folded = self.tables[fold.index()].lock().unwrap();
            (own, folded)
        } else {
            let folded = self.tables[fold.index()].lock().unwrap();
            let own = self.tables[class.index()].lock().unwrap();
            (own, folded)
        };

        let extra = folded.get(id).unwrap_or(0);
        own.release(id, extra)
    }

    /// Drops one class table when its pool is torn down.
    pub fn clear(&self, class: TypeClass) {
        self.tables[class.index()].lock().unwrap().counts.clear();
    }

    pub fn consumer_acquired(&self, consumer: Consumer) {
        let mut drain = self.drain.lock().unwrap();
        match consumer {
            Consumer::Display => drain.display += 1,
            Consumer::Encoder => drain.encoder += 1,
        }
    }

    pub fn consumer_released(&self, consumer: Consumer) {
        let mut drain = self.drain.lock().unwrap();
        let count = match consumer {
            Consumer::Display => &mut drain.display,
            Consumer::Encoder => &mut drain.encoder,
        };
        *count = count.saturating_sub(1);
        self.drained.notify_all();
    }

    pub fn frames_with_display(&self) -> u32 {
        self.drain.lock().unwrap().display
    }

    pub fn frames_with_encoder(&self) -> u32 {
        self.drain.lock().unwrap().encoder
    }

    /// Waits until the consumer returned every frame it holds.
    pub fn wait_consumer_drained(&self, consumer: Consumer, timeout: Duration) -> bool {
        let drain = self.drain.lock().unwrap();
        let (_guard, res) = self
            .drained
            .wait_timeout_while(drain, timeout, |drain| match consumer {
                Consumer::Display => drain.display > 0,
                Consumer::Encoder => drain.encoder > 0,
            })
            .unwrap();
        !res.timed_out()
    }

    /// Waits until both consumers returned every frame they hold.
    pub fn wait_drained(&self, timeout: Duration) -> bool {
        let drain = self.drain.lock().unwrap();
        let (_guard, res) = self
            .drained
            .wait_timeout_while(drain, timeout, |drain| {
                drain.display > 0 || drain.encoder > 0
            })
            .unwrap();
        !res.timed_out()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_seeds_queueable() {
        let refs = FrameRefCounter::new();
        let ids = [BufferId(0), BufferId(1), BufferId(2), BufferId(3)];

        refs.register(TypeClass::Preview, &ids, 3);

        assert_eq!(refs.count(TypeClass::Preview, BufferId(0)), Some(0));
        assert_eq!(refs.count(TypeClass::Preview, BufferId(2)), Some(0));
        // past the queueable limit the provider still holds the buffer
        assert_eq!(refs.count(TypeClass::Preview, BufferId(3)), Some(1));
        assert_eq!(refs.count(TypeClass::Video, BufferId(0)), None);
    }

    #[test]
    fn test_release_recycles_exactly_once() {
        let refs = FrameRefCounter::new();
        let id = BufferId(5);

        refs.init(TypeClass::Capture, id, 3);

        assert_eq!(refs.release(TypeClass::Capture, id, None), Release::Held);
        assert_eq!(refs.release(TypeClass::Capture, id, None), Release::Held);
        assert_eq!(refs.release(TypeClass::Capture, id, None), Release::Recycle);

        // the count never goes below zero and never recycles twice
        assert_eq!(
            refs.release(TypeClass::Capture, id, None),
            Release::Underflow
        );
        assert_eq!(refs.count(TypeClass::Capture, id), Some(0));
    }

    #[test]
    fn test_release_unknown_buffer() {
        let refs = FrameRefCounter::new();
        assert_eq!(
            refs.release(TypeClass::Video, BufferId(9), None),
            Release::Underflow
        );
    }

    #[test]
    fn test_release_folds_cross_class() {
        let refs = FrameRefCounter::new();
        let id = BufferId(2);

        refs.init(TypeClass::Preview, id, 1);
        refs.init(TypeClass::Video, id, 1);

        // the video side drops first; the preview reference keeps it alive
        assert_eq!(
            refs.release(TypeClass::Video, id, Some(TypeClass::Preview)),
            Release::Held
        );
        assert_eq!(
            refs.release(TypeClass::Preview, id, Some(TypeClass::Video)),
            Release::Recycle
        );
    }

    #[test]
    fn test_release_without_fold_ignores_other_class() {
        let refs = FrameRefCounter::new();
        let id = BufferId(2);

        refs.init(TypeClass::Preview, id, 1);
        refs.init(TypeClass::Video, id, 1);

        assert_eq!(refs.release(TypeClass::Video, id, None), Release::Recycle);
    }

    #[test]
    fn test_clear() {
        let refs = FrameRefCounter::new();
        refs.init(TypeClass::FrameData, BufferId(0), 2);

        refs.clear(TypeClass::FrameData);
        assert_eq!(refs.count(TypeClass::FrameData, BufferId(0)), None);
    }

    #[test]
    fn test_drain_counters() {
        let refs = FrameRefCounter::new();

        refs.consumer_acquired(Consumer::Display);
        refs.consumer_acquired(Consumer::Display);
        refs.consumer_acquired(Consumer::Encoder);
        assert_eq!(refs.frames_with_display(), 2);
        assert_eq!(refs.frames_with_encoder(), 1);

        assert!(!refs.wait_drained(Duration::from_millis(10)));

        refs.consumer_released(Consumer::Display);
        refs.consumer_released(Consumer::Display);
        assert!(refs.wait_consumer_drained(Consumer::Display, Duration::from_millis(10)));
        assert!(!refs.wait_consumer_drained(Consumer::Encoder, Duration::from_millis(10)));

        refs.consumer_released(Consumer::Encoder);
        assert!(refs.wait_drained(Duration::from_millis(10)));

        // draining an empty counter saturates
        refs.consumer_released(Consumer::Encoder);
        assert_eq!(refs.frames_with_encoder(), 0);
    }
}
