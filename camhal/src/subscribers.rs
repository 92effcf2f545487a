// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

//! Subscriber registry and observer interfaces.
//!
//! Frames and events fan out to registered observers, one bucket per
//! category.  Registration is guarded by a dedicated lock, distinct from the
//! reference-count locks and the adapter state lock, so the application
//! thread can register while the callback thread is mid-dispatch.

use super::frame::{Frame, FrameType};
use super::types::{BufferId, Error};
use log::warn;
use std::sync::{Arc, Mutex, RwLock};

bitflags::bitflags! {
    /// Message categories a subscriber can enable.
    ///
    /// The low bits mirror `FrameType`; the high bits select event
    /// categories.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct MessageMask: u32 {
        /// Preview frames.
        const PREVIEW_FRAME = 1 << 0;
        /// Video frames.
        const VIDEO_FRAME = 1 << 1;
        /// Processed still images.
        const IMAGE_FRAME = 1 << 2;
        /// Raw still images.
        const RAW_FRAME = 1 << 3;
        /// Snapshot frames.
        const SNAPSHOT_FRAME = 1 << 4;
        /// Preview metadata.
        const FRAME_DATA = 1 << 5;
        /// Focus events.
        const FOCUS = 1 << 8;
        /// Shutter events.
        const SHUTTER = 1 << 9;
        /// Smooth-zoom progress events.
        const ZOOM = 1 << 10;
        /// Face-detection events.
        const FACE = 1 << 11;

        /// Every frame category.
        const ALL_FRAMES = Self::PREVIEW_FRAME.bits()
            | Self::VIDEO_FRAME.bits()
            | Self::IMAGE_FRAME.bits()
            | Self::RAW_FRAME.bits()
            | Self::SNAPSHOT_FRAME.bits()
            | Self::FRAME_DATA.bits();
        /// Every event category.
        const ALL_EVENTS = Self::FOCUS.bits()
            | Self::SHUTTER.bits()
            | Self::ZOOM.bits()
            | Self::FACE.bits();
    }
}

impl MessageMask {
    /// The frame categories selected by this mask.
    pub fn frame_types(self) -> FrameType {
        FrameType::from_bits_truncate((self & Self::ALL_FRAMES).bits())
    }
}

impl From<FrameType> for MessageMask {
    fn from(types: FrameType) -> Self {
        Self::from_bits_truncate(types.bits())
    }
}

/// Identity of a subscriber, unique per category.
///
/// Re-registering an identity replaces its observer in place.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SubscriberId(pub u32);

/// A detected face in driver coordinates.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FaceRect {
    /// Left edge.
    pub left: i32,
    /// Top edge.
    pub top: i32,
    /// Right edge.
    pub right: i32,
    /// Bottom edge.
    pub bottom: i32,
    /// Detection confidence, driver defined.
    pub score: u32,
}

/// Events dispatched without buffer ownership.  Fire and forget.
#[derive(Clone, Debug)]
pub enum Event {
    /// Autofocus concluded.
    FocusComplete {
        /// Whether focus locked.
        success: bool,
    },
    /// The shutter fired.
    Shutter,
    /// Smooth zoom progressed by one index.
    Zoom {
        /// The zoom index reached.
        index: u32,
        /// Whether this is the requested target index.
        target_reached: bool,
    },
    /// Face detection produced a result set.
    Faces {
        /// The detected faces.
        faces: Vec<FaceRect>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum EventKind {
    Focus,
    Shutter,
    Zoom,
    Face,
}

impl EventKind {
    const COUNT: usize = 4;

    const ALL: [EventKind; Self::COUNT] = [
        EventKind::Focus,
        EventKind::Shutter,
        EventKind::Zoom,
        EventKind::Face,
    ];

    fn index(self) -> usize {
        self as usize
    }

    fn mask_bit(self) -> MessageMask {
        match self {
            EventKind::Focus => MessageMask::FOCUS,
            EventKind::Shutter => MessageMask::SHUTTER,
            EventKind::Zoom => MessageMask::ZOOM,
            EventKind::Face => MessageMask::FACE,
        }
    }

    pub fn of(event: &Event) -> EventKind {
        match event {
            Event::FocusComplete { .. } => EventKind::Focus,
            Event::Shutter => EventKind::Shutter,
            Event::Zoom { .. } => EventKind::Zoom,
            Event::Faces { .. } => EventKind::Face,
        }
    }
}

/// Receives frames for an enabled frame category.
///
/// Called on the hardware-callback thread.  Each received frame holds one
/// reference that must be given back through `return_frame`.
pub trait FrameObserver: Send + Sync {
    /// Delivers one frame.
    fn on_frame(&self, frame: Frame);
}

/// Receives fire-and-forget events on the hardware-callback thread.
pub trait EventObserver: Send + Sync {
    /// Delivers one event.
    fn on_event(&self, event: Event);
}

/// Receives asynchronous adapter errors that have no synchronous caller.
pub trait ErrorObserver: Send + Sync {
    /// Delivers one error.  A fatal error means the adapter must be torn
    /// down and rebuilt by its owner.
    fn on_error(&self, error: Error, fatal: bool);
}

/// Fired when a still-capture buffer is recycled.
pub type ImageReleaseCallback = Box<dyn Fn(BufferId) + Send + Sync>;

/// Fired when a still capture or bracket concludes.
pub type EndCaptureCallback = Box<dyn Fn() + Send + Sync>;

type FrameBucket = Vec<(SubscriberId, Arc<dyn FrameObserver>)>;
type EventBucket = Vec<(SubscriberId, Arc<dyn EventObserver>)>;

#[derive(Default)]
struct Buckets {
    frames: [FrameBucket; 6],
    events: [EventBucket; EventKind::COUNT],
}

fn frame_index(frame_type: FrameType) -> usize {
    frame_type.bits().trailing_zeros() as usize
}

/// Registration-ordered subscriber buckets, one per frame and event category.
pub(crate) struct SubscriberRegistry {
    buckets: RwLock<Buckets>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(Default::default()),
        }
    }

    /// Registers observers for every category in `mask`.  One mask may
    /// populate several buckets at once.
    pub fn enable(
        &self,
        mask: MessageMask,
        id: SubscriberId,
        frames: Option<Arc<dyn FrameObserver>>,
        events: Option<Arc<dyn EventObserver>>,
    ) {
        let mut buckets = self.buckets.write().unwrap();

        if let Some(observer) = frames {
            for bit in mask.frame_types().iter() {
                upsert(&mut buckets.frames[frame_index(bit)], id, &observer);
            }
        }

        if let Some(observer) = events {
            for kind in EventKind::ALL {
                if mask.contains(kind.mask_bit()) {
                    upsert(&mut buckets.events[kind.index()], id, &observer);
                }
            }
        }
    }

    /// Removes the identity from every category in `mask`.
    pub fn disable(&self, mask: MessageMask, id: SubscriberId) {
        let mut buckets = self.buckets.write().unwrap();

        for bit in mask.frame_types().iter() {
            buckets.frames[frame_index(bit)].retain(|(sid, _)| *sid != id);
        }

        for kind in EventKind::ALL {
            if mask.contains(kind.mask_bit()) {
                buckets.events[kind.index()].retain(|(sid, _)| *sid != id);
            }
        }
    }

    /// Snapshot of one frame bucket, in registration order.
    pub fn frame_subscribers(&self, frame_type: FrameType) -> Vec<Arc<dyn FrameObserver>> {
        let buckets = self.buckets.read().unwrap();
        buckets.frames[frame_index(frame_type)]
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect()
    }

    pub fn frame_subscriber_count(&self, frame_type: FrameType) -> usize {
        self.buckets.read().unwrap().frames[frame_index(frame_type)].len()
    }

    pub fn event_subscribers(&self, kind: EventKind) -> Vec<Arc<dyn EventObserver>> {
        let buckets = self.buckets.read().unwrap();
        buckets.events[kind.index()]
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect()
    }

    /// The frame categories with at least one subscriber.
    pub fn enabled_frame_types(&self) -> FrameType {
        let buckets = self.buckets.read().unwrap();
        let mut types = FrameType::empty();
        for bit in FrameType::all().iter() {
            if !buckets.frames[frame_index(bit)].is_empty() {
                types |= bit;
            }
        }
        types
    }
}

fn upsert<T: ?Sized>(bucket: &mut Vec<(SubscriberId, Arc<T>)>, id: SubscriberId, observer: &Arc<T>) {
    for entry in bucket.iter_mut() {
        if entry.0 == id {
            entry.1 = Arc::clone(observer);
            return;
        }
    }
    bucket.push((id, Arc::clone(observer)));
}

/// Destination for errors detected on the callback thread.
pub(crate) struct ErrorSink {
    observer: Mutex<Option<Arc<dyn ErrorObserver>>>,
}

impl ErrorSink {
    pub fn new() -> Self {
        Self {
            observer: Mutex::new(None),
        }
    }

    pub fn set(&self, observer: Arc<dyn ErrorObserver>) {
        *self.observer.lock().unwrap() = Some(observer);
    }

    pub fn raise(&self, error: Error, fatal: bool) {
        warn!("adapter error: {} (fatal: {})", error, fatal);

        let observer = self.observer.lock().unwrap().clone();
        if let Some(observer) = observer {
            observer.on_error(error, fatal);
        }
    }
}
