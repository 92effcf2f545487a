// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

//! Frame types.
//!
//! A completed hardware buffer is classified by a bitmask of frame types.  A
//! single buffer may satisfy several roles at once, e.g. a snapshot frame is
//! also a preview-sync frame while recording.

use super::types::BufferId;
use std::collections::HashMap;
use std::sync::Mutex;

bitflags::bitflags! {
    /// Roles a completed buffer satisfies simultaneously.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct FrameType: u32 {
        /// A preview frame destined for the display.
        const PREVIEW = 1 << 0;
        /// A video frame destined for the encoder.
        const VIDEO = 1 << 1;
        /// A processed still image.
        const IMAGE = 1 << 2;
        /// An unprocessed still image.
        const RAW = 1 << 3;
        /// The preview frame shown while a still capture is in flight.
        const SNAPSHOT = 1 << 4;
        /// Preview metadata for metering and face detection.
        const FRAME_DATA = 1 << 5;
    }
}

impl FrameType {
    /// Returns the reference-count class of a frame type.
    pub fn class(self) -> TypeClass {
        if self.intersects(Self::IMAGE | Self::RAW) {
            TypeClass::Capture
        } else if self.intersects(Self::PREVIEW | Self::SNAPSHOT) {
            TypeClass::Preview
        } else if self.intersects(Self::FRAME_DATA) {
            TypeClass::FrameData
        } else {
            TypeClass::Video
        }
    }
}

/// Lock classes for reference counting.
///
/// Completion handling for one class never blocks another.  The discriminant
/// order fixes the acquisition order when two class locks are held together.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum TypeClass {
    /// Still-capture buffers, processed or raw.
    Capture,
    /// Preview and snapshot buffers.
    Preview,
    /// Preview-metadata buffers.
    FrameData,
    /// Video buffers held by the encoder.
    Video,
}

impl TypeClass {
    pub(crate) const COUNT: usize = 4;

    pub(crate) const ALL: [TypeClass; Self::COUNT] = [
        TypeClass::Capture,
        TypeClass::Preview,
        TypeClass::FrameData,
        TypeClass::Video,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    pub(crate) fn types(self) -> FrameType {
        match self {
            TypeClass::Capture => FrameType::IMAGE | FrameType::RAW,
            TypeClass::Preview => FrameType::PREVIEW | FrameType::SNAPSHOT,
            TypeClass::FrameData => FrameType::FRAME_DATA,
            TypeClass::Video => FrameType::VIDEO,
        }
    }
}

/// Y/UV plane references into a buffer.  Weak, not owned.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct YuvPlanes {
    /// Opaque reference to the luma plane.
    pub y: u64,
    /// Opaque reference to the interleaved chroma plane.
    pub uv: u64,
}

/// A frame dispatched to one subscriber category.
#[derive(Clone, Copy, Debug)]
pub struct Frame {
    /// Identity of the underlying buffer.
    pub id: BufferId,
    /// The single type bit this dispatch is for.
    pub frame_type: FrameType,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Row stride in bytes.
    pub stride: u32,
    /// Payload offset in bytes.
    pub offset: u32,
    /// Capture timestamp.
    pub timestamp_ns: i64,
    /// Plane references, resolved from the pointer side table.
    pub planes: YuvPlanes,
}

/// A completed buffer as reported by the hardware pipeline.
#[derive(Clone, Copy, Debug)]
pub struct FrameCompletion {
    /// Identity of the completed buffer.
    pub id: BufferId,
    /// All type bits this buffer satisfies.
    pub mask: FrameType,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Row stride in bytes.
    pub stride: u32,
    /// Payload offset in bytes.
    pub offset: u32,
    /// Capture timestamp.
    pub timestamp_ns: i64,
}

impl FrameCompletion {
    pub(crate) fn to_frame(self, frame_type: FrameType) -> Frame {
        Frame {
            id: self.id,
            frame_type,
            width: self.width,
            height: self.height,
            stride: self.stride,
            offset: self.offset,
            timestamp_ns: self.timestamp_ns,
            planes: YuvPlanes::default(),
        }
    }
}

/// Side table of plane references, keyed by buffer identity.
///
/// The raw completion event does not carry plane references for every frame
/// type; they are recorded when the buffer is first associated with the
/// display pipeline.
#[derive(Default)]
pub(crate) struct FramePointerTable {
    entries: Mutex<HashMap<BufferId, YuvPlanes>>,
}

impl FramePointerTable {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn insert(&self, id: BufferId, planes: YuvPlanes) {
        self.entries.lock().unwrap().insert(id, planes);
    }

    pub fn lookup(&self, id: BufferId) -> Option<YuvPlanes> {
        self.entries.lock().unwrap().get(&id).copied()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class() {
        assert_eq!(FrameType::IMAGE.class(), TypeClass::Capture);
        assert_eq!(FrameType::RAW.class(), TypeClass::Capture);
        assert_eq!(FrameType::PREVIEW.class(), TypeClass::Preview);
        assert_eq!(FrameType::SNAPSHOT.class(), TypeClass::Preview);
        assert_eq!(FrameType::FRAME_DATA.class(), TypeClass::FrameData);
        assert_eq!(FrameType::VIDEO.class(), TypeClass::Video);
    }

    #[test]
    fn test_class_types_roundtrip() {
        for class in TypeClass::ALL {
            for bit in class.types().iter() {
                assert_eq!(bit.class(), class);
            }
        }
    }

    #[test]
    fn test_mask_iterates_ascending() {
        let mask = FrameType::SNAPSHOT | FrameType::PREVIEW | FrameType::VIDEO;
        let bits: Vec<FrameType> = mask.iter().collect();
        assert_eq!(
            bits,
            vec![FrameType::PREVIEW, FrameType::VIDEO, FrameType::SNAPSHOT]
        );
    }

    #[test]
    fn test_to_frame() {
        let completion = FrameCompletion {
            id: BufferId(3),
            mask: FrameType::PREVIEW | FrameType::VIDEO,
            width: 640,
            height: 480,
            stride: 640,
            offset: 0,
            timestamp_ns: 1_000,
        };

        let frame = completion.to_frame(FrameType::VIDEO);
        assert_eq!(frame.id, BufferId(3));
        assert_eq!(frame.frame_type, FrameType::VIDEO);
        assert_eq!(frame.width, 640);
        assert_eq!(frame.planes, YuvPlanes::default());
    }

    #[test]
    fn test_pointer_table() {
        let table = FramePointerTable::new();
        let planes = YuvPlanes { y: 0x1000, uv: 0x2000 };

        assert_eq!(table.lookup(BufferId(0)), None);

        table.insert(BufferId(0), planes);
        assert_eq!(table.lookup(BufferId(0)), Some(planes));

        table.clear();
        assert_eq!(table.lookup(BufferId(0)), None);
    }
}
