// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

//! Completion routing on the hardware-callback thread.
//!
//! Runs concurrently with command dispatch on the application thread and
//! stays off the adapter state lock, so a slow command never stalls
//! completions.  Only the per-class reference-count locks and the subscriber
//! lock are taken here.

use super::frame::{FrameCompletion, FramePointerTable, FrameType, TypeClass};
use super::pipeline::Pipeline;
use super::refcount::{Consumer, FrameRefCounter, Release};
use super::subscribers::{ErrorSink, Event, EventKind, ImageReleaseCallback, SubscriberRegistry};
use super::types::{BufferId, Error};
use log::warn;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Fans completed frames out to subscribers and recycles returned buffers.
pub(crate) struct FrameRouter {
    pipeline: Arc<dyn Pipeline>,
    subscribers: Arc<SubscriberRegistry>,
    refs: Arc<FrameRefCounter>,
    pointers: Arc<FramePointerTable>,
    errors: Arc<ErrorSink>,
    recording: Arc<AtomicBool>,
    image_release: Mutex<Option<ImageReleaseCallback>>,
}

impl FrameRouter {
    pub fn new(
        pipeline: Arc<dyn Pipeline>,
        subscribers: Arc<SubscriberRegistry>,
        refs: Arc<FrameRefCounter>,
        pointers: Arc<FramePointerTable>,
        errors: Arc<ErrorSink>,
        recording: Arc<AtomicBool>,
    ) -> Self {
        Self {
            pipeline,
            subscribers,
            refs,
            pointers,
            errors,
            recording,
            image_release: Mutex::new(None),
        }
    }

    pub fn set_image_release(&self, callback: ImageReleaseCallback) {
        *self.image_release.lock().unwrap() = Some(callback);
    }

    /// Seeds per-class counts for a surfacing buffer, then dispatches each
    /// set bit in ascending order.
    pub fn dispatch(&self, completion: &FrameCompletion) {
        // seed every class before the first callback runs, so a subscriber
        // returning the frame from inside its callback sees final counts
        self.init_ref_counts(completion.id, completion.mask);

        let mut mask = completion.mask;
        for bit in completion.mask.iter() {
            let subscribers = self.subscribers.frame_subscribers(bit);
            if subscribers.is_empty() {
                // the producer and the subscriber bookkeeping diverged
                self.errors.raise(Error::NoSubscribers, false);
                mask.remove(bit);
                continue;
            }

            let mut frame = completion.to_frame(bit);
            if bit.intersects(FrameType::PREVIEW | FrameType::VIDEO | FrameType::SNAPSHOT) {
                match self.pointers.lookup(frame.id) {
                    Some(planes) => frame.planes = planes,
                    None => warn!("no plane references recorded for buffer {}", frame.id),
                }
            }

            if bit == FrameType::PREVIEW {
                self.refs.consumer_acquired(Consumer::Display);
            } else if bit == FrameType::VIDEO {
                self.refs.consumer_acquired(Consumer::Encoder);
            }

            for subscriber in &subscribers {
                subscriber.on_frame(frame);
            }
            mask.remove(bit);
        }

        debug_assert!(mask.is_empty());
    }

    /// Seeds each class count with the sum of the subscriber counts of that
    /// class's bits present in `mask`.
    pub fn init_ref_counts(&self, id: BufferId, mask: FrameType) {
        for class in TypeClass::ALL {
            let bits = mask & class.types();
            if bits.is_empty() {
                continue;
            }

            let count = bits
                .iter()
                .map(|bit| self.subscribers.frame_subscriber_count(bit) as u32)
                .sum();
            self.refs.init(class, id, count);
        }
    }

    /// A consumer hands a buffer back.  Recycles it to the pipeline when the
    /// combined count reaches zero; a return past zero is a logged no-op.
    pub fn return_frame(&self, id: BufferId, frame_type: FrameType) {
        if frame_type == FrameType::PREVIEW {
            self.refs.consumer_released(Consumer::Display);
        } else if frame_type == FrameType::VIDEO {
            self.refs.consumer_released(Consumer::Encoder);
        }

        // while recording, preview and video consumers share the buffer
        let class = frame_type.class();
        let fold = if self.recording.load(Ordering::Acquire) {
            match class {
                TypeClass::Preview => Some(TypeClass::Video),
                TypeClass::Video => Some(TypeClass::Preview),
                _ => None,
            }
        } else {
            None
        };

        match self.refs.release(class, id, fold) {
            Release::Held | Release::Underflow => (),
            Release::Recycle => {
                if let Err(err) = self.pipeline.fill_this_buffer(id, frame_type) {
                    self.errors.raise(err, false);
                }
                if class == TypeClass::Capture {
                    if let Some(callback) = &*self.image_release.lock().unwrap() {
                        callback(id);
                    }
                }
            }
        }
    }

    pub fn dispatch_event(&self, event: Event) {
        for subscriber in self.subscribers.event_subscribers(EventKind::of(&event)) {
            subscriber.on_event(event.clone());
        }
    }
}
