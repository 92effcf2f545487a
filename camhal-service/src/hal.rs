// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

//! The camera HAL service layer.
//!
//! `CameraHal` owns the buffer pools and drives the adapter through the
//! use-buffers/start/stop sequence of each use case.  Pools are live only
//! while the corresponding adapter state is active: they are registered
//! before the start command and freed after the stop command commits and the
//! consumers drained.

use super::memory::{MemoryManager, PoolBuffer};
use camhal::{
    AdapterState, BufferId, BufferMode, CameraAdapter, Command, CommandReply, Error, ErrorObserver,
    Event, EventObserver, FrameObserver, FrameType, MessageMask, Result, StateFlags, SubscriberId,
};
use log::{debug, error, warn};
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// Identity of the service layer's internal focus observer.
const FOCUS_POLICY_ID: SubscriberId = SubscriberId(u32::MAX);

/// HAL tuning knobs.
#[derive(Clone, Copy, Debug)]
pub struct HalConfig {
    preview_buffer_count: usize,
    video_buffer_count: usize,
    image_buffer_count: usize,
    metadata_buffer_count: usize,
    max_queueable: usize,
    drain_timeout: Duration,
    metadata_stream: bool,
}

impl Default for HalConfig {
    fn default() -> Self {
        Self {
            preview_buffer_count: 6,
            video_buffer_count: 6,
            image_buffer_count: 2,
            metadata_buffer_count: 4,
            max_queueable: 4,
            drain_timeout: Duration::from_secs(1),
            metadata_stream: false,
        }
    }
}

impl HalConfig {
    /// Creates a config with defaults.
    pub fn new() -> Self {
        Default::default()
    }

    /// Preview pool size.
    pub fn preview_buffer_count(mut self, count: usize) -> Self {
        self.preview_buffer_count = count;
        self
    }

    /// Video pool size.
    pub fn video_buffer_count(mut self, count: usize) -> Self {
        self.video_buffer_count = count;
        self
    }

    /// Still-capture pool size.
    pub fn image_buffer_count(mut self, count: usize) -> Self {
        self.image_buffer_count = count;
        self
    }

    /// Preview-metadata pool size.
    pub fn metadata_buffer_count(mut self, count: usize) -> Self {
        self.metadata_buffer_count = count;
        self
    }

    /// How many preview buffers the display can queue; the rest stay with
    /// the provider.
    pub fn max_queueable(mut self, count: usize) -> Self {
        self.max_queueable = count;
        self
    }

    /// How long teardown waits for consumers to return their buffers.
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Whether to run the preview-metadata stream.
    pub fn metadata_stream(mut self, enable: bool) -> Self {
        self.metadata_stream = enable;
        self
    }
}

#[derive(Default)]
struct Pools {
    preview: Vec<PoolBuffer>,
    metadata: Vec<PoolBuffer>,
    video: Vec<PoolBuffer>,
    image: Vec<PoolBuffer>,
}

/// The camera-service-facing HAL layer.
pub struct CameraHal {
    adapter: Mutex<Arc<CameraAdapter>>,
    memory: Arc<dyn MemoryManager>,
    config: HalConfig,
    pools: Mutex<Pools>,
    poisoned: Arc<AtomicBool>,
}

/// Marks the HAL unusable once the adapter reports a fatal device error.
struct FatalGuard {
    poisoned: Arc<AtomicBool>,
}

impl ErrorObserver for FatalGuard {
    fn on_error(&self, err: Error, fatal: bool) {
        if fatal {
            error!("fatal adapter error: {}", err);
            self.poisoned.store(true, Ordering::Release);
        }
    }
}

/// Restores the preview-family state once focus concludes.  Cancellation is
/// command-specific and routes through the state machine like any command.
struct FocusPolicy {
    adapter: Weak<CameraAdapter>,
}

impl EventObserver for FocusPolicy {
    fn on_event(&self, event: Event) {
        let Event::FocusComplete { .. } = event else {
            return;
        };

        let Some(adapter) = self.adapter.upgrade() else {
            return;
        };

        if adapter.state().flags().contains(StateFlags::AF) {
            if let Err(err) = adapter.send_command(Command::CancelAutofocus) {
                warn!("focus teardown failed: {}", err);
            }
        }
    }
}

impl CameraHal {
    /// Creates a HAL over `adapter` with default tuning.
    pub fn new(adapter: Arc<CameraAdapter>, memory: Arc<dyn MemoryManager>) -> Self {
        Self::with_config(adapter, memory, HalConfig::new())
    }

    /// Creates a HAL over `adapter`.
    pub fn with_config(
        adapter: Arc<CameraAdapter>,
        memory: Arc<dyn MemoryManager>,
        config: HalConfig,
    ) -> Self {
        let poisoned = Arc::new(AtomicBool::new(false));
        Self::install_policies(&adapter, &poisoned);

        Self {
            adapter: Mutex::new(adapter),
            memory,
            config,
            pools: Mutex::new(Default::default()),
            poisoned,
        }
    }

    fn install_policies(adapter: &Arc<CameraAdapter>, poisoned: &Arc<AtomicBool>) {
        adapter.register_error_observer(Arc::new(FatalGuard {
            poisoned: Arc::clone(poisoned),
        }));
        adapter.enable_messages(
            MessageMask::FOCUS,
            FOCUS_POLICY_ID,
            None,
            Some(Arc::new(FocusPolicy {
                adapter: Arc::downgrade(adapter),
            })),
        );
    }

    /// The adapter currently backing this HAL.
    pub fn adapter(&self) -> Arc<CameraAdapter> {
        Arc::clone(&self.adapter.lock().unwrap())
    }

    /// Whether a fatal device error made this HAL unusable until `reset`.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// Installs a replacement adapter after a fatal device error.
    pub fn reset(&self, adapter: Arc<CameraAdapter>) {
        self.free_pools();
        Self::install_policies(&adapter, &self.poisoned);
        *self.adapter.lock().unwrap() = adapter;
        self.poisoned.store(false, Ordering::Release);
    }

    fn ensure_healthy(&self) -> Result<()> {
        if self.is_poisoned() {
            Err(Error::Device)
        } else {
            Ok(())
        }
    }

    /// Registers observers for the categories in `mask`.
    pub fn enable_messages(
        &self,
        mask: MessageMask,
        id: SubscriberId,
        frames: Option<Arc<dyn FrameObserver>>,
        events: Option<Arc<dyn EventObserver>>,
    ) {
        self.adapter().enable_messages(mask, id, frames, events);
    }

    /// Removes the identity from the categories in `mask`.
    pub fn disable_messages(&self, mask: MessageMask, id: SubscriberId) {
        self.adapter().disable_messages(mask, id);
    }

    /// A consumer hands a buffer back.
    pub fn return_frame(&self, id: BufferId, frame_type: FrameType) {
        self.adapter().return_frame(id, frame_type);
    }

    /// Forwards the device orientation to the pipeline.
    pub fn set_orientation(&self, orientation: u32, tilt: u32) {
        self.adapter().on_orientation_event(orientation, tilt);
    }

    /// Starts preview, loading the preview pools on first use.
    pub fn start_preview(&self) -> Result<()> {
        self.ensure_healthy()?;
        let adapter = self.adapter();

        let state = adapter.state();
        if state.flags().contains(StateFlags::PREVIEW) {
            debug!("preview already running");
            return Ok(());
        }

        if state == AdapterState::Initialized {
            self.load_preview_pool(&adapter)?;
        }
        adapter.send_command(Command::StartPreview)?;

        Ok(())
    }

    /// Stops preview and frees every pool.  Recording and captures are
    /// unwound first.
    pub fn stop_preview(&self) -> Result<()> {
        self.ensure_healthy()?;
        let adapter = self.adapter();

        let flags = adapter.state().flags();
        if !flags.intersects(StateFlags::PREVIEW | StateFlags::LOADED_PREVIEW) {
            return Ok(());
        }

        if flags.contains(StateFlags::VIDEO) {
            self.stop_recording()?;
        }
        loop {
            let state = adapter.state();
            if matches!(state, AdapterState::Preview | AdapterState::LoadedPreview) {
                break;
            }
            adapter.unwind_state()?;
        }

        adapter.send_command(Command::StopPreview)?;
        if !adapter.wait_consumers_drained(self.config.drain_timeout) {
            warn!("consumers did not drain before preview teardown");
        }
        self.free_pools();

        Ok(())
    }

    /// Starts recording.  Preview must be running.
    pub fn start_recording(&self) -> Result<()> {
        self.ensure_healthy()?;
        let adapter = self.adapter();

        if adapter.state().flags().contains(StateFlags::VIDEO) {
            return Ok(());
        }

        loop {
            let state = adapter.state();
            if state == AdapterState::Preview {
                break;
            }
            if !state.flags().contains(StateFlags::PREVIEW) {
                return Err(Error::InvalidOperation);
            }
            adapter.unwind_state()?;
        }

        self.load_video_pool(&adapter)?;
        adapter.send_command(Command::StartVideo)?;

        Ok(())
    }

    /// Stops recording and frees the video pool.
    pub fn stop_recording(&self) -> Result<()> {
        self.ensure_healthy()?;
        let adapter = self.adapter();

        if !adapter.state().flags().contains(StateFlags::VIDEO) {
            return Ok(());
        }

        loop {
            let state = adapter.state();
            if state == AdapterState::Video || !state.flags().contains(StateFlags::VIDEO) {
                break;
            }
            adapter.unwind_state()?;
        }

        adapter.send_command(Command::StopVideo)?;
        if !adapter.wait_encoder_drained(self.config.drain_timeout) {
            warn!("encoder did not drain before video teardown");
        }

        let video = mem::take(&mut self.pools.lock().unwrap().video);
        if !video.is_empty() {
            self.memory.free(&video);
        }

        Ok(())
    }

    /// Takes a still picture, or a video snapshot while recording.
    pub fn take_picture(&self) -> Result<()> {
        self.ensure_healthy()?;
        let adapter = self.adapter();

        let flags = adapter.state().flags();
        if !flags.contains(StateFlags::PREVIEW) {
            return Err(Error::InvalidOperation);
        }
        // a capture in flight rejects immediately rather than queueing
        if flags.intersects(StateFlags::CAPTURE | StateFlags::BRACKETING) {
            return Err(Error::InvalidOperation);
        }

        let state = self.quiesce_for_capture(&adapter)?;
        if !matches!(
            state,
            AdapterState::LoadedCapture | AdapterState::VideoLoadedCapture
        ) {
            self.load_image_pool(&adapter)?;
        }
        adapter.send_command(Command::StartImageCapture)?;

        Ok(())
    }

    /// Stops a capture or bracket in flight and frees the still pool.
    pub fn stop_image_capture(&self) -> Result<()> {
        self.ensure_healthy()?;
        let adapter = self.adapter();

        let flags = adapter.state().flags();
        if !flags.intersects(
            StateFlags::CAPTURE | StateFlags::LOADED_CAPTURE | StateFlags::BRACKETING,
        ) {
            return Ok(());
        }

        let cmd = if flags.contains(StateFlags::BRACKETING) {
            Command::StopBracketing
        } else {
            Command::StopImageCapture
        };
        adapter.send_command(cmd)?;

        let image = mem::take(&mut self.pools.lock().unwrap().image);
        if !image.is_empty() {
            self.memory.free(&image);
        }

        Ok(())
    }

    /// Starts an exposure bracket over `range` stops.
    pub fn start_bracketing(&self, range: u32) -> Result<()> {
        self.ensure_healthy()?;
        let adapter = self.adapter();

        let flags = adapter.state().flags();
        if !flags.contains(StateFlags::PREVIEW) || flags.contains(StateFlags::VIDEO) {
            return Err(Error::InvalidOperation);
        }
        if flags.intersects(StateFlags::CAPTURE | StateFlags::BRACKETING) {
            return Err(Error::InvalidOperation);
        }

        let state = self.quiesce_for_capture(&adapter)?;
        if state != AdapterState::LoadedCapture {
            self.load_image_pool(&adapter)?;
        }
        adapter.send_command(Command::StartBracketing { range })?;

        Ok(())
    }

    /// Stops an exposure bracket.
    pub fn stop_bracketing(&self) -> Result<()> {
        self.stop_image_capture()
    }

    /// Starts autofocus.
    pub fn auto_focus(&self) -> Result<()> {
        self.ensure_healthy()?;
        self.adapter()
            .send_command(Command::PerformAutofocus)
            .map(drop)
    }

    /// Cancels autofocus if it is running.
    pub fn cancel_auto_focus(&self) -> Result<()> {
        self.ensure_healthy()?;
        let adapter = self.adapter();

        if !adapter.state().flags().contains(StateFlags::AF) {
            return Ok(());
        }
        adapter.send_command(Command::CancelAutofocus).map(drop)
    }

    /// Starts a smooth zoom toward `target`.
    pub fn start_smooth_zoom(&self, target: u32) -> Result<()> {
        self.ensure_healthy()?;
        self.adapter()
            .send_command(Command::StartSmoothZoom { target })
            .map(drop)
    }

    /// Stops a smooth zoom if one is running.
    pub fn stop_smooth_zoom(&self) -> Result<()> {
        self.ensure_healthy()?;
        let adapter = self.adapter();

        if !adapter.state().flags().contains(StateFlags::ZOOM) {
            return Ok(());
        }
        adapter.send_command(Command::StopSmoothZoom).map(drop)
    }

    /// Starts face detection.
    pub fn start_face_detection(&self) -> Result<()> {
        self.ensure_healthy()?;
        self.adapter()
            .send_command(Command::StartFaceDetection)
            .map(drop)
    }

    /// Stops face detection.
    pub fn stop_face_detection(&self) -> Result<()> {
        self.ensure_healthy()?;
        self.adapter()
            .send_command(Command::StopFaceDetection)
            .map(drop)
    }

    /// Tears everything down and frees every pool.
    pub fn release(&self) {
        if !self.is_poisoned() {
            if let Err(err) = self.adapter().unwind_to_initialized() {
                warn!("teardown incomplete: {}", err);
            }
        }
        self.free_pools();
    }

    fn quiesce_for_capture(&self, adapter: &Arc<CameraAdapter>) -> Result<AdapterState> {
        loop {
            let state = adapter.state();
            match state {
                AdapterState::Preview
                | AdapterState::Video
                | AdapterState::LoadedCapture
                | AdapterState::VideoLoadedCapture => return Ok(state),
                _ if state.flags().contains(StateFlags::PREVIEW) => {
                    adapter.unwind_state()?;
                }
                _ => return Err(Error::InvalidOperation),
            }
        }
    }

    fn preview_frame_length(&self, adapter: &Arc<CameraAdapter>) -> Result<usize> {
        let reply = adapter.send_command(Command::QueryResolutionPreview)?;
        let (width, height) = match reply {
            CommandReply::FrameSize { width, height } => (width, height),
            _ => return Err(Error::Context("unexpected reply to resolution query")),
        };

        // NV12 worst case
        Ok((width as usize * height as usize * 3) / 2)
    }

    fn load_preview_pool(&self, adapter: &Arc<CameraAdapter>) -> Result<()> {
        let length = self.preview_frame_length(adapter)?;
        let buffers = self.memory.allocate(self.config.preview_buffer_count, length)?;

        for buffer in &buffers {
            adapter.add_frame_pointers(buffer.id, buffer.planes);
        }

        let ids: Vec<BufferId> = buffers.iter().map(|b| b.id).collect();
        let queueable = self.config.max_queueable.min(ids.len());
        if let Err(err) = adapter.send_command(Command::UseBuffers {
            mode: BufferMode::Preview,
            buffers: ids,
            length,
            queueable,
        }) {
            self.memory.free(&buffers);
            return Err(err);
        }
        self.pools.lock().unwrap().preview = buffers;

        if self.config.metadata_stream {
            // metering still works without the metadata stream
            if let Err(err) = self.load_metadata_pool(adapter) {
                warn!("preview metadata stream unavailable: {}", err);
            }
        }

        Ok(())
    }

    fn load_metadata_pool(&self, adapter: &Arc<CameraAdapter>) -> Result<()> {
        let count = self.config.metadata_buffer_count;
        let reply = adapter.send_command(Command::QueryBufferSizePreviewData { count })?;
        let length = match reply {
            CommandReply::BufferSize(length) => length,
            _ => return Err(Error::Context("unexpected reply to metadata query")),
        };

        let buffers = self.memory.allocate(count, length)?;
        let ids: Vec<BufferId> = buffers.iter().map(|b| b.id).collect();
        let queueable = ids.len();
        if let Err(err) = adapter.send_command(Command::UseBuffers {
            mode: BufferMode::PreviewData,
            buffers: ids,
            length,
            queueable,
        }) {
            self.memory.free(&buffers);
            return Err(err);
        }
        self.pools.lock().unwrap().metadata = buffers;

        Ok(())
    }

    fn load_video_pool(&self, adapter: &Arc<CameraAdapter>) -> Result<()> {
        let length = self.preview_frame_length(adapter)?;
        let buffers = self.memory.allocate(self.config.video_buffer_count, length)?;

        let ids: Vec<BufferId> = buffers.iter().map(|b| b.id).collect();
        let queueable = ids.len();
        if let Err(err) = adapter.send_command(Command::UseBuffers {
            mode: BufferMode::VideoCapture,
            buffers: ids,
            length,
            queueable,
        }) {
            self.memory.free(&buffers);
            return Err(err);
        }
        self.pools.lock().unwrap().video = buffers;

        Ok(())
    }

    fn load_image_pool(&self, adapter: &Arc<CameraAdapter>) -> Result<()> {
        let count = self.config.image_buffer_count;
        let reply = adapter.send_command(Command::QueryBufferSizeImageCapture { count })?;
        let length = match reply {
            CommandReply::BufferSize(length) => length,
            _ => return Err(Error::Context("unexpected reply to picture-size query")),
        };

        let buffers = self.memory.allocate(count, length)?;
        let ids: Vec<BufferId> = buffers.iter().map(|b| b.id).collect();
        let queueable = ids.len();
        if let Err(err) = adapter.send_command(Command::UseBuffers {
            mode: BufferMode::ImageCapture,
            buffers: ids,
            length,
            queueable,
        }) {
            self.memory.free(&buffers);
            return Err(err);
        }
        self.pools.lock().unwrap().image = buffers;

        Ok(())
    }

    fn free_pools(&self) {
        let pools = {
            let mut pools = self.pools.lock().unwrap();
            mem::take(&mut *pools)
        };

        for pool in [pools.preview, pools.metadata, pools.video, pools.image] {
            if !pool.is_empty() {
                self.memory.free(&pool);
            }
        }
    }
}

impl Drop for CameraHal {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HeapMemoryManager;
    use camhal::{
        AdapterConfig, Frame, FrameCompletion, Notification, OpStatus, Pipeline,
    };

    #[derive(Default)]
    struct MockPipeline {
        calls: Mutex<Vec<&'static str>>,
        fills: Mutex<Vec<(BufferId, FrameType)>>,
    }

    impl MockPipeline {
        fn op(&self, name: &'static str) -> camhal::Result<OpStatus> {
            self.calls.lock().unwrap().push(name);
            Ok(OpStatus::Done)
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Pipeline for MockPipeline {
        fn start_preview(&self) -> camhal::Result<OpStatus> {
            self.op("start_preview")
        }

        fn stop_preview(&self) -> camhal::Result<OpStatus> {
            self.op("stop_preview")
        }

        fn start_video_capture(&self) -> camhal::Result<OpStatus> {
            self.op("start_video_capture")
        }

        fn stop_video_capture(&self) -> camhal::Result<OpStatus> {
            self.op("stop_video_capture")
        }

        fn take_picture(&self) -> camhal::Result<OpStatus> {
            self.op("take_picture")
        }

        fn stop_image_capture(&self) -> camhal::Result<OpStatus> {
            self.op("stop_image_capture")
        }

        fn start_bracketing(&self, _range: u32) -> camhal::Result<OpStatus> {
            self.op("start_bracketing")
        }

        fn stop_bracketing(&self) -> camhal::Result<OpStatus> {
            self.op("stop_bracketing")
        }

        fn auto_focus(&self) -> camhal::Result<OpStatus> {
            self.op("auto_focus")
        }

        fn cancel_auto_focus(&self) -> camhal::Result<OpStatus> {
            self.op("cancel_auto_focus")
        }

        fn start_smooth_zoom(&self, _target: u32) -> camhal::Result<OpStatus> {
            self.op("start_smooth_zoom")
        }

        fn stop_smooth_zoom(&self) -> camhal::Result<OpStatus> {
            self.op("stop_smooth_zoom")
        }

        fn use_buffers(
            &self,
            _mode: BufferMode,
            _buffers: &[BufferId],
            _length: usize,
            _queueable: usize,
        ) -> camhal::Result<OpStatus> {
            self.op("use_buffers")
        }

        fn fill_this_buffer(&self, id: BufferId, frame_type: FrameType) -> camhal::Result<()> {
            self.fills.lock().unwrap().push((id, frame_type));
            Ok(())
        }

        fn frame_size(&self) -> camhal::Result<(u32, u32)> {
            Ok((64, 48))
        }

        fn frame_data_size(&self, count: usize) -> camhal::Result<usize> {
            Ok(count * 16)
        }

        fn picture_buffer_size(&self, count: usize) -> camhal::Result<usize> {
            Ok(count * 1024)
        }

        fn start_face_detection(&self) -> camhal::Result<OpStatus> {
            self.op("start_face_detection")
        }

        fn stop_face_detection(&self) -> camhal::Result<OpStatus> {
            self.op("stop_face_detection")
        }

        fn switch_to_executing(&self) -> camhal::Result<OpStatus> {
            self.op("switch_to_executing")
        }
    }

    #[derive(Default)]
    struct Display {
        frames: Mutex<Vec<Frame>>,
    }

    impl FrameObserver for Display {
        fn on_frame(&self, frame: Frame) {
            self.frames.lock().unwrap().push(frame);
        }
    }

    struct Fixture {
        hal: CameraHal,
        adapter: Arc<CameraAdapter>,
        pipeline: Arc<MockPipeline>,
        memory: Arc<HeapMemoryManager>,
        display: Arc<Display>,
    }

    fn fixture() -> Fixture {
        fixture_with(HalConfig::new().drain_timeout(Duration::from_millis(20)))
    }

    fn fixture_with(config: HalConfig) -> Fixture {
        let pipeline = Arc::new(MockPipeline::default());
        let adapter = CameraAdapter::with_config(
            pipeline.clone(),
            AdapterConfig::new().first_frame_timeout(Duration::from_millis(50)),
        );
        let memory = Arc::new(HeapMemoryManager::new());
        let hal = CameraHal::with_config(adapter.clone(), memory.clone(), config);

        let display = Arc::new(Display::default());
        hal.enable_messages(
            MessageMask::PREVIEW_FRAME,
            SubscriberId(1),
            Some(display.clone()),
            None,
        );

        Fixture {
            hal,
            adapter,
            pipeline,
            memory,
            display,
        }
    }

    fn preview_frame(fx: &Fixture, id: u32) {
        fx.adapter
            .on_notification(Notification::FrameComplete(FrameCompletion {
                id: BufferId(id),
                mask: FrameType::PREVIEW,
                width: 64,
                height: 48,
                stride: 64,
                offset: 0,
                timestamp_ns: 1_000,
            }));
        fx.hal.return_frame(BufferId(id), FrameType::PREVIEW);
    }

    #[test]
    fn test_preview_lifecycle() {
        let fx = fixture();

        fx.hal.start_preview().unwrap();
        assert_eq!(fx.adapter.state(), AdapterState::Preview);
        assert_eq!(fx.memory.allocated(), 6);
        assert_eq!(fx.pipeline.calls(), vec!["use_buffers", "start_preview"]);

        // a second start is a no-op
        fx.hal.start_preview().unwrap();
        assert_eq!(fx.memory.allocated(), 6);

        preview_frame(&fx, 0);
        assert_eq!(fx.display.frames.lock().unwrap().len(), 1);

        fx.hal.stop_preview().unwrap();
        assert_eq!(fx.adapter.state(), AdapterState::Initialized);
        assert_eq!(fx.memory.allocated(), 0);
    }

    #[test]
    fn test_metadata_stream_pool() {
        let fx = fixture_with(
            HalConfig::new()
                .drain_timeout(Duration::from_millis(20))
                .metadata_stream(true),
        );

        fx.hal.start_preview().unwrap();
        assert_eq!(fx.memory.allocated(), 6 + 4);

        preview_frame(&fx, 0);
        fx.hal.stop_preview().unwrap();
        assert_eq!(fx.memory.allocated(), 0);
    }

    #[test]
    fn test_recording_lifecycle() {
        let fx = fixture();

        fx.hal.start_preview().unwrap();
        preview_frame(&fx, 0);

        fx.hal.start_recording().unwrap();
        assert_eq!(fx.adapter.state(), AdapterState::Video);
        assert_eq!(fx.memory.allocated(), 6 + 6);

        fx.hal.stop_recording().unwrap();
        assert_eq!(fx.adapter.state(), AdapterState::Preview);
        assert_eq!(fx.memory.allocated(), 6);

        fx.hal.stop_preview().unwrap();
        assert_eq!(fx.memory.allocated(), 0);
    }

    #[test]
    fn test_recording_requires_preview() {
        let fx = fixture();
        assert_eq!(fx.hal.start_recording(), Err(Error::InvalidOperation));
    }

    #[test]
    fn test_take_picture_flow() {
        let fx = fixture();

        fx.hal.start_preview().unwrap();
        preview_frame(&fx, 0);

        fx.hal.take_picture().unwrap();
        assert_eq!(fx.adapter.state(), AdapterState::Capture);
        assert_eq!(fx.memory.allocated(), 6 + 2);
        assert!(fx.pipeline.calls().contains(&"take_picture"));

        fx.hal.stop_image_capture().unwrap();
        assert_eq!(fx.adapter.state(), AdapterState::Preview);
        assert_eq!(fx.memory.allocated(), 6);
    }

    #[test]
    fn test_take_picture_rejected_mid_capture() {
        let fx = fixture();

        fx.hal.start_preview().unwrap();
        preview_frame(&fx, 0);
        fx.hal.take_picture().unwrap();

        assert_eq!(fx.hal.take_picture(), Err(Error::InvalidOperation));
    }

    #[test]
    fn test_video_snapshot() {
        let fx = fixture();

        fx.hal.start_preview().unwrap();
        preview_frame(&fx, 0);
        fx.hal.start_recording().unwrap();

        fx.hal.take_picture().unwrap();
        assert_eq!(fx.adapter.state(), AdapterState::VideoCapture);

        fx.hal.stop_image_capture().unwrap();
        assert_eq!(fx.adapter.state(), AdapterState::Video);
    }

    #[test]
    fn test_bracketing_flow() {
        let fx = fixture();

        fx.hal.start_preview().unwrap();
        preview_frame(&fx, 0);

        fx.hal.start_bracketing(3).unwrap();
        assert_eq!(fx.adapter.state(), AdapterState::Bracketing);

        fx.hal.stop_bracketing().unwrap();
        assert_eq!(fx.adapter.state(), AdapterState::Preview);
        assert!(fx.pipeline.calls().contains(&"stop_bracketing"));
    }

    #[test]
    fn test_focus_policy_restores_preview() {
        let fx = fixture();

        fx.hal.start_preview().unwrap();
        preview_frame(&fx, 0);

        fx.hal.auto_focus().unwrap();
        assert_eq!(fx.adapter.state(), AdapterState::Af);

        fx.adapter
            .on_notification(Notification::Event(Event::FocusComplete { success: true }));
        assert_eq!(fx.adapter.state(), AdapterState::Preview);
    }

    #[test]
    fn test_smooth_zoom() {
        let fx = fixture();

        fx.hal.start_preview().unwrap();
        preview_frame(&fx, 0);

        fx.hal.start_smooth_zoom(4).unwrap();
        assert_eq!(fx.adapter.state(), AdapterState::Zoom);

        // stop-preview unwinds the zoom first
        fx.hal.stop_preview().unwrap();
        assert_eq!(fx.adapter.state(), AdapterState::Initialized);
        assert!(fx.pipeline.calls().contains(&"stop_smooth_zoom"));
    }

    #[test]
    fn test_fatal_error_poisons_until_reset() {
        let fx = fixture();

        fx.hal.start_preview().unwrap();
        fx.adapter.on_notification(Notification::DeviceError);

        assert!(fx.hal.is_poisoned());
        assert_eq!(fx.hal.start_preview(), Err(Error::Device));

        let replacement: Arc<dyn Pipeline> = fx.pipeline.clone();
        fx.hal.reset(CameraAdapter::new(replacement));

        assert!(!fx.hal.is_poisoned());
        fx.hal.start_preview().unwrap();
        assert_eq!(fx.hal.adapter().state(), AdapterState::Preview);
    }
}
