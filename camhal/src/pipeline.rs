// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

//! The hardware-pipeline interface.

use super::frame::{FrameType, TypeClass};
use super::types::{BufferId, Error, OpStatus, Result};

/// Destination pool of a buffer-registration command.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BufferMode {
    /// The preview pool.
    Preview,
    /// The preview-metadata pool.
    PreviewData,
    /// The still-capture pool.
    ImageCapture,
    /// The video pool.
    VideoCapture,
}

impl BufferMode {
    pub(crate) fn class(self) -> TypeClass {
        match self {
            BufferMode::Preview => TypeClass::Preview,
            BufferMode::PreviewData => TypeClass::FrameData,
            BufferMode::ImageCapture => TypeClass::Capture,
            BufferMode::VideoCapture => TypeClass::Video,
        }
    }
}

/// The hardware pipeline the adapter commands and receives completions from.
///
/// Implementations wrap the actual OMX or V4L2 plumbing and run on their own
/// driver threads.  An operation either completes synchronously (`Done`),
/// fails, or returns `Pending` and concludes later through the notification
/// path.  Completed buffers are handed back with `fill_this_buffer` once
/// every consumer released them.
pub trait Pipeline: Send + Sync {
    /// Starts preview streaming.
    fn start_preview(&self) -> Result<OpStatus> {
        Error::unsupported()
    }

    /// Stops preview streaming and disables the preview port.
    fn stop_preview(&self) -> Result<OpStatus> {
        Error::unsupported()
    }

    /// Starts recording.
    fn start_video_capture(&self) -> Result<OpStatus> {
        Error::unsupported()
    }

    /// Stops recording.
    fn stop_video_capture(&self) -> Result<OpStatus> {
        Error::unsupported()
    }

    /// Starts a still capture.
    fn take_picture(&self) -> Result<OpStatus> {
        Error::unsupported()
    }

    /// Stops a still capture.
    fn stop_image_capture(&self) -> Result<OpStatus> {
        Error::unsupported()
    }

    /// Starts an exposure bracket over `range` stops.
    fn start_bracketing(&self, _range: u32) -> Result<OpStatus> {
        Error::unsupported()
    }

    /// Stops an exposure bracket.
    fn stop_bracketing(&self) -> Result<OpStatus> {
        Error::unsupported()
    }

    /// Starts autofocus.
    fn auto_focus(&self) -> Result<OpStatus> {
        Error::unsupported()
    }

    /// Cancels autofocus.
    fn cancel_auto_focus(&self) -> Result<OpStatus> {
        Error::unsupported()
    }

    /// Starts a smooth zoom toward `target`.
    fn start_smooth_zoom(&self, _target: u32) -> Result<OpStatus> {
        Error::unsupported()
    }

    /// Stops a smooth zoom at the current index.
    fn stop_smooth_zoom(&self) -> Result<OpStatus> {
        Error::unsupported()
    }

    /// Registers a buffer pool with the port backing `mode`.
    fn use_buffers(
        &self,
        _mode: BufferMode,
        _buffers: &[BufferId],
        _length: usize,
        _queueable: usize,
    ) -> Result<OpStatus> {
        Error::unsupported()
    }

    /// Requeues a drained buffer to the port backing `frame_type`.
    fn fill_this_buffer(&self, _id: BufferId, _frame_type: FrameType) -> Result<()> {
        Error::unsupported()
    }

    /// The preview frame size.
    fn frame_size(&self) -> Result<(u32, u32)> {
        Error::unsupported()
    }

    /// The preview-metadata buffer size for `count` buffers.
    fn frame_data_size(&self, _count: usize) -> Result<usize> {
        Error::unsupported()
    }

    /// The still-capture buffer size for `count` buffers.
    fn picture_buffer_size(&self, _count: usize) -> Result<usize> {
        Error::unsupported()
    }

    /// Starts face detection.
    fn start_face_detection(&self) -> Result<OpStatus> {
        Error::unsupported()
    }

    /// Stops face detection.
    fn stop_face_detection(&self) -> Result<OpStatus> {
        Error::unsupported()
    }

    /// Moves the pipeline to its executing state.
    fn switch_to_executing(&self) -> Result<OpStatus> {
        Error::unsupported()
    }

    /// Latest device orientation and tilt, for sensor-facing metadata.
    fn set_orientation(&self, _orientation: u32, _tilt: u32) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Null;

    impl Pipeline for Null {}

    #[test]
    fn test_defaults_are_unsupported() {
        let pipeline = Null;
        assert_eq!(pipeline.start_preview(), Err(Error::Unsupported));
        assert_eq!(pipeline.frame_size(), Err(Error::Unsupported));
        assert_eq!(
            pipeline.fill_this_buffer(BufferId(0), FrameType::PREVIEW),
            Err(Error::Unsupported)
        );
    }

    #[test]
    fn test_mode_class() {
        assert_eq!(BufferMode::Preview.class(), TypeClass::Preview);
        assert_eq!(BufferMode::PreviewData.class(), TypeClass::FrameData);
        assert_eq!(BufferMode::ImageCapture.class(), TypeClass::Capture);
        assert_eq!(BufferMode::VideoCapture.class(), TypeClass::Video);
    }
}
