// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

//! The camera adapter.
//!
//! `CameraAdapter` is the synchronous entry point between the camera service
//! and the hardware pipeline.  Every command runs the same cycle: state
//! check, hardware operation, commit or rollback.  Completions arrive on the
//! pipeline's callback thread through `on_notification` and are routed
//! without touching the adapter state lock.

use super::frame::{FrameCompletion, FramePointerTable, FrameType, TypeClass, YuvPlanes};
use super::pipeline::{BufferMode, Pipeline};
use super::refcount::{Consumer, FrameRefCounter};
use super::router::FrameRouter;
use super::state::{AdapterState, CommandKind, StateFlags, StateMachine, Transition};
use super::subscribers::{
    EndCaptureCallback, ErrorObserver, ErrorSink, Event, EventObserver, FrameObserver,
    ImageReleaseCallback, MessageMask, SubscriberId, SubscriberRegistry,
};
use super::types::{BufferId, Error, Result};
use log::warn;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::Duration;

/// Commands accepted by `CameraAdapter::send_command`.
#[derive(Clone, Debug)]
pub enum Command {
    /// Register a buffer pool with the pipeline.
    UseBuffers {
        /// Destination pool.
        mode: BufferMode,
        /// Identities of the buffers, in pool order.
        buffers: Vec<BufferId>,
        /// Byte length of each buffer.
        length: usize,
        /// How many buffers the consumer can queue; the rest stay with the
        /// provider.
        queueable: usize,
    },
    /// Start preview streaming.
    StartPreview,
    /// Stop preview streaming.
    StopPreview,
    /// Start recording.
    StartVideo,
    /// Stop recording.
    StopVideo,
    /// Start a still capture.
    StartImageCapture,
    /// Stop a still capture, or cancel a loaded one.
    StopImageCapture,
    /// Start an exposure bracket over `range` stops.
    StartBracketing {
        /// Bracket width in stops.
        range: u32,
    },
    /// Stop an exposure bracket.
    StopBracketing,
    /// Start autofocus.
    PerformAutofocus,
    /// Cancel autofocus.
    CancelAutofocus,
    /// Start a smooth zoom toward `target`.
    StartSmoothZoom {
        /// Target zoom index.
        target: u32,
    },
    /// Stop a smooth zoom.
    StopSmoothZoom,
    /// Query the preview resolution.
    QueryResolutionPreview,
    /// Query the still-capture buffer size for `count` buffers.
    QueryBufferSizeImageCapture {
        /// Number of buffers.
        count: usize,
    },
    /// Query the preview-metadata buffer size for `count` buffers.
    QueryBufferSizePreviewData {
        /// Number of buffers.
        count: usize,
    },
    /// Start face detection.
    StartFaceDetection,
    /// Stop face detection.
    StopFaceDetection,
    /// Move the pipeline to its executing state.
    SwitchToExecuting,
}

impl Command {
    /// The payload-free kind used for the legality lookup.
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::UseBuffers { mode, .. } => match mode {
                BufferMode::Preview => CommandKind::UseBuffersPreview,
                BufferMode::PreviewData => CommandKind::UseBuffersPreviewData,
                BufferMode::ImageCapture => CommandKind::UseBuffersImageCapture,
                BufferMode::VideoCapture => CommandKind::UseBuffersVideoCapture,
            },
            Command::StartPreview => CommandKind::StartPreview,
            Command::StopPreview => CommandKind::StopPreview,
            Command::StartVideo => CommandKind::StartVideo,
            Command::StopVideo => CommandKind::StopVideo,
            Command::StartImageCapture => CommandKind::StartImageCapture,
            Command::StopImageCapture => CommandKind::StopImageCapture,
            Command::StartBracketing { .. } => CommandKind::StartBracketing,
            Command::StopBracketing => CommandKind::StopBracketing,
            Command::PerformAutofocus => CommandKind::PerformAutofocus,
            Command::CancelAutofocus => CommandKind::CancelAutofocus,
            Command::StartSmoothZoom { .. } => CommandKind::StartSmoothZoom,
            Command::StopSmoothZoom => CommandKind::StopSmoothZoom,
            Command::QueryResolutionPreview => CommandKind::QueryResolutionPreview,
            Command::QueryBufferSizeImageCapture { .. } => CommandKind::QueryBufferSizeImageCapture,
            Command::QueryBufferSizePreviewData { .. } => CommandKind::QueryBufferSizePreviewData,
            Command::StartFaceDetection => CommandKind::StartFaceDetection,
            Command::StopFaceDetection => CommandKind::StopFaceDetection,
            Command::SwitchToExecuting => CommandKind::SwitchToExecuting,
        }
    }
}

/// Reply of a successfully dispatched command.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CommandReply {
    /// The command has no reply payload.
    None,
    /// Reply to the preview-resolution query.
    FrameSize {
        /// Width in pixels.
        width: u32,
        /// Height in pixels.
        height: u32,
    },
    /// Reply to a buffer-size query.
    BufferSize(usize),
}

/// Notifications delivered by the pipeline on its callback thread.
#[derive(Clone, Debug)]
pub enum Notification {
    /// A buffer completed.
    FrameComplete(FrameCompletion),
    /// A fire-and-forget event occurred.
    Event(Event),
    /// The device failed fatally.
    DeviceError,
}

/// Adapter tuning knobs.
#[derive(Clone, Copy, Debug)]
pub struct AdapterConfig {
    first_frame_timeout: Duration,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            first_frame_timeout: Duration::from_secs(1),
        }
    }
}

impl AdapterConfig {
    /// Creates a config with defaults.
    pub fn new() -> Self {
        Default::default()
    }

    /// How long capture, focus, and teardown wait for the first frame after
    /// preview starts.
    pub fn first_frame_timeout(mut self, timeout: Duration) -> Self {
        self.first_frame_timeout = timeout;
        self
    }
}

/// Counts frames since the last preview start, so capture and teardown never
/// race ahead of the first completion.
struct FrameGate {
    count: Mutex<u64>,
    arrived: Condvar,
}

impl FrameGate {
    fn new() -> Self {
        Self {
            count: Mutex::new(0),
            arrived: Condvar::new(),
        }
    }

    fn reset(&self) {
        *self.count.lock().unwrap() = 0;
    }

    fn on_frame(&self) {
        *self.count.lock().unwrap() += 1;
        self.arrived.notify_all();
    }

    fn wait_first(&self, timeout: Duration) -> bool {
        let count = self.count.lock().unwrap();
        let (_guard, res) = self
            .arrived
            .wait_timeout_while(count, timeout, |count| *count == 0)
            .unwrap();
        !res.timed_out()
    }
}

/// The adapter state machine and buffer life-cycle coordinator.
///
/// Construct one per opened camera with [`CameraAdapter::new`], register
/// subscribers, and drive it with [`CameraAdapter::send_command`].  The
/// pipeline's driver threads report back through the handle returned by
/// [`CameraAdapter::notification_sink`].
pub struct CameraAdapter {
    pipeline: Arc<dyn Pipeline>,
    machine: StateMachine,
    subscribers: Arc<SubscriberRegistry>,
    refs: Arc<FrameRefCounter>,
    pointers: Arc<FramePointerTable>,
    errors: Arc<ErrorSink>,
    router: FrameRouter,
    gate: FrameGate,
    recording: Arc<AtomicBool>,
    fatal: AtomicBool,
    config: AdapterConfig,
    end_capture: Mutex<Option<EndCaptureCallback>>,
}

impl CameraAdapter {
    /// Creates an adapter over `pipeline` with default tuning.
    pub fn new(pipeline: Arc<dyn Pipeline>) -> Arc<Self> {
        Self::with_config(pipeline, AdapterConfig::new())
    }

    /// Creates an adapter over `pipeline`.
    pub fn with_config(pipeline: Arc<dyn Pipeline>, config: AdapterConfig) -> Arc<Self> {
        let subscribers = Arc::new(SubscriberRegistry::new());
        let refs = Arc::new(FrameRefCounter::new());
        let pointers = Arc::new(FramePointerTable::new());
        let errors = Arc::new(ErrorSink::new());
        let recording = Arc::new(AtomicBool::new(false));

        let router = FrameRouter::new(
            Arc::clone(&pipeline),
            Arc::clone(&subscribers),
            Arc::clone(&refs),
            Arc::clone(&pointers),
            Arc::clone(&errors),
            Arc::clone(&recording),
        );

        Arc::new(Self {
            pipeline,
            machine: StateMachine::new(),
            subscribers,
            refs,
            pointers,
            errors,
            router,
            gate: FrameGate::new(),
            recording,
            fatal: AtomicBool::new(false),
            config,
            end_capture: Mutex::new(None),
        })
    }

    /// A completion-entry handle for the pipeline's driver threads.  Holding
    /// it does not keep the adapter alive.
    pub fn notification_sink(self: &Arc<Self>) -> NotificationSink {
        NotificationSink {
            adapter: Arc::downgrade(self),
        }
    }

    /// The committed state.
    pub fn state(&self) -> AdapterState {
        if self.fatal.load(Ordering::Acquire) {
            AdapterState::Invalid
        } else {
            self.machine.state()
        }
    }

    /// The tentative state; equals the committed state outside a transition.
    pub fn next_state(&self) -> AdapterState {
        if self.fatal.load(Ordering::Acquire) {
            AdapterState::Invalid
        } else {
            self.machine.next_state()
        }
    }

    /// Dispatches one command: state check, hardware operation, then commit
    /// on success or rollback on failure.
    ///
    /// Blocks for the duration of the hardware operation.  An illegal
    /// command is rejected before any hardware is touched and leaves the
    /// state unchanged.
    pub fn send_command(&self, cmd: Command) -> Result<CommandReply> {
        if self.fatal.load(Ordering::Acquire) {
            return Error::device();
        }

        let kind = cmd.kind();
        let transition = self.machine.begin(kind)?;
        self.gate_command(kind, &transition)?;

        let reply = self.invoke(&cmd)?;
        transition.commit();
        self.after_commit(kind);

        Ok(reply)
    }

    /// Capture and focus must see at least one frame after preview start, so
    /// the pipeline is never reconfigured mid-initialization.  Teardown
    /// waits too, but proceeds on timeout.
    fn gate_command(&self, kind: CommandKind, transition: &Transition<'_>) -> Result<()> {
        if !transition.current().flags().contains(StateFlags::PREVIEW) {
            return Ok(());
        }

        match kind {
            CommandKind::StartImageCapture | CommandKind::PerformAutofocus => {
                if !self.gate.wait_first(self.config.first_frame_timeout) {
                    return Err(Error::Timeout);
                }
            }
            CommandKind::StopPreview => {
                if !self.gate.wait_first(self.config.first_frame_timeout) {
                    warn!("stopping preview before the first frame arrived");
                }
            }
            _ => (),
        }

        Ok(())
    }

    fn invoke(&self, cmd: &Command) -> Result<CommandReply> {
        match cmd {
            Command::UseBuffers {
                mode,
                buffers,
                length,
                queueable,
            } => {
                if buffers.is_empty() || *queueable > buffers.len() {
                    return Error::user();
                }
                self.pipeline.use_buffers(*mode, buffers, *length, *queueable)?;
                // ref-count seeding shares the command's critical section
                self.refs.register(mode.class(), buffers, *queueable);
            }
            Command::StartPreview => {
                self.gate.reset();
                self.pipeline.start_preview()?;
            }
            Command::StopPreview => {
                self.pipeline.stop_preview()?;
                self.refs.clear(TypeClass::Preview);
                self.refs.clear(TypeClass::FrameData);
                self.pointers.clear();
            }
            Command::StartVideo => {
                self.pipeline.start_video_capture()?;
                self.recording.store(true, Ordering::Release);
            }
            Command::StopVideo => {
                self.pipeline.stop_video_capture()?;
                self.recording.store(false, Ordering::Release);
                self.refs.clear(TypeClass::Video);
            }
            Command::StartImageCapture => {
                self.pipeline.take_picture()?;
            }
            Command::StopImageCapture => {
                self.pipeline.stop_image_capture()?;
                self.refs.clear(TypeClass::Capture);
            }
            Command::StartBracketing { range } => {
                self.pipeline.start_bracketing(*range)?;
            }
            Command::StopBracketing => {
                self.pipeline.stop_bracketing()?;
                self.refs.clear(TypeClass::Capture);
            }
            Command::PerformAutofocus => {
                self.pipeline.auto_focus()?;
            }
            Command::CancelAutofocus => {
                self.pipeline.cancel_auto_focus()?;
            }
            Command::StartSmoothZoom { target } => {
                self.pipeline.start_smooth_zoom(*target)?;
            }
            Command::StopSmoothZoom => {
                self.pipeline.stop_smooth_zoom()?;
            }
            Command::QueryResolutionPreview => {
                let (width, height) = self.pipeline.frame_size()?;
                return Ok(CommandReply::FrameSize { width, height });
            }
            Command::QueryBufferSizeImageCapture { count } => {
                return Ok(CommandReply::BufferSize(
                    self.pipeline.picture_buffer_size(*count)?,
                ));
            }
            Command::QueryBufferSizePreviewData { count } => {
                return Ok(CommandReply::BufferSize(
                    self.pipeline.frame_data_size(*count)?,
                ));
            }
            Command::StartFaceDetection => {
                self.pipeline.start_face_detection()?;
            }
            Command::StopFaceDetection => {
                self.pipeline.stop_face_detection()?;
            }
            Command::SwitchToExecuting => {
                self.pipeline.switch_to_executing()?;
            }
        }

        Ok(CommandReply::None)
    }

    fn after_commit(&self, kind: CommandKind) {
        if matches!(
            kind,
            CommandKind::StopImageCapture | CommandKind::StopBracketing
        ) {
            if let Some(callback) = &*self.end_capture.lock().unwrap() {
                callback();
            }
        }
    }

    /// Registers observers for the categories in `mask`.  Safe to call while
    /// the callback thread is mid-dispatch.
    pub fn enable_messages(
        &self,
        mask: MessageMask,
        id: SubscriberId,
        frames: Option<Arc<dyn FrameObserver>>,
        events: Option<Arc<dyn EventObserver>>,
    ) {
        self.subscribers.enable(mask, id, frames, events);
    }

    /// Removes the identity from the categories in `mask`.
    pub fn disable_messages(&self, mask: MessageMask, id: SubscriberId) {
        self.subscribers.disable(mask, id);
    }

    /// The frame categories with at least one subscriber.  Producers must
    /// not mark other bits in a completion mask.
    pub fn enabled_frame_types(&self) -> FrameType {
        self.subscribers.enabled_frame_types()
    }

    /// A consumer hands a buffer back; recycled to the pipeline when every
    /// consumer released it.
    pub fn return_frame(&self, id: BufferId, frame_type: FrameType) {
        self.router.return_frame(id, frame_type);
    }

    /// Records plane references for a buffer before its first completion.
    pub fn add_frame_pointers(&self, id: BufferId, planes: YuvPlanes) {
        self.pointers.insert(id, planes);
    }

    /// Registers the destination for asynchronous errors.
    pub fn register_error_observer(&self, observer: Arc<dyn ErrorObserver>) {
        self.errors.set(observer);
    }

    /// Registers the callback fired when a still-capture buffer recycles.
    pub fn register_image_release_callback(&self, callback: ImageReleaseCallback) {
        self.router.set_image_release(callback);
    }

    /// Registers the callback fired when a capture or bracket concludes.
    pub fn register_end_capture_callback(&self, callback: EndCaptureCallback) {
        *self.end_capture.lock().unwrap() = Some(callback);
    }

    /// Forwards the device orientation to the pipeline.
    pub fn on_orientation_event(&self, orientation: u32, tilt: u32) {
        self.pipeline.set_orientation(orientation, tilt);
    }

    /// Frames currently held by the display.
    pub fn frames_with_display(&self) -> u32 {
        self.refs.frames_with_display()
    }

    /// Frames currently held by the encoder.
    pub fn frames_with_encoder(&self) -> u32 {
        self.refs.frames_with_encoder()
    }

    /// Waits until the display returned every frame it holds.
    pub fn wait_display_drained(&self, timeout: Duration) -> bool {
        self.refs.wait_consumer_drained(Consumer::Display, timeout)
    }

    /// Waits until the encoder returned every frame it holds.
    pub fn wait_encoder_drained(&self, timeout: Duration) -> bool {
        self.refs.wait_consumer_drained(Consumer::Encoder, timeout)
    }

    /// Waits until both consumers returned every frame they hold.
    pub fn wait_consumers_drained(&self, timeout: Duration) -> bool {
        self.refs.wait_drained(timeout)
    }

    /// Completion entry, invoked on the pipeline's callback thread.
    pub fn on_notification(&self, notification: Notification) {
        match notification {
            Notification::FrameComplete(completion) => {
                self.gate.on_frame();
                self.router.dispatch(&completion);
            }
            Notification::Event(event) => self.router.dispatch_event(event),
            Notification::DeviceError => {
                // unrecoverable; the owner tears the adapter down and
                // builds a new one
                self.fatal.store(true, Ordering::Release);
                self.errors.raise(Error::Device, true);
            }
        }
    }

    /// Issues the current state's stop command, one step toward
    /// `Initialized`.
    pub fn unwind_state(&self) -> Result<AdapterState> {
        let state = self.state();
        match state.exit_command() {
            Some(kind) => {
                self.send_command(stop_command(kind))?;
                Ok(self.state())
            }
            None if state == AdapterState::Initialized => Ok(state),
            None => Error::invalid_op(),
        }
    }

    /// Issues stop commands until `Initialized` is reached.  Terminates
    /// within the number of primitive facets of the starting state.
    pub fn unwind_to_initialized(&self) -> Result<()> {
        let steps = self.state().flags().bits().count_ones();
        for _ in 0..steps {
            if self.state() == AdapterState::Initialized {
                return Ok(());
            }
            self.unwind_state()?;
        }

        if self.state() == AdapterState::Initialized {
            Ok(())
        } else {
            Error::ctx("state did not unwind to initialized")
        }
    }
}

fn stop_command(kind: CommandKind) -> Command {
    match kind {
        CommandKind::StopPreview => Command::StopPreview,
        CommandKind::StopVideo => Command::StopVideo,
        CommandKind::StopImageCapture => Command::StopImageCapture,
        CommandKind::StopBracketing => Command::StopBracketing,
        CommandKind::CancelAutofocus => Command::CancelAutofocus,
        CommandKind::StopSmoothZoom => Command::StopSmoothZoom,
        _ => unreachable!(),
    }
}

/// Clonable completion-entry handle for driver threads.
#[derive(Clone)]
pub struct NotificationSink {
    adapter: Weak<CameraAdapter>,
}

impl NotificationSink {
    /// Delivers one notification; dropped silently once the adapter is gone.
    pub fn notify(&self, notification: Notification) {
        if let Some(adapter) = self.adapter.upgrade() {
            adapter.on_notification(notification);
        }
    }
}
