// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

//! Adapter states and the command legality table.
//!
//! The mode of the adapter is a closed set of named composite states with an
//! explicit `(state, command)` transition table.  A transition is two-phase:
//! `StateMachine::begin` stages a tentative state behind the adapter-wide
//! lock, and the returned guard either commits it or rolls it back.  The lock
//! is released when the guard goes out of scope on every path.

use super::types::{Error, Result};
use log::debug;
use std::sync::{Mutex, MutexGuard};

bitflags::bitflags! {
    /// Primitive facets of a composite state.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct StateFlags: u32 {
        /// The adapter is constructed and idle.
        const INITIALIZED = 1 << 0;
        /// Preview buffers are registered but streaming has not started.
        const LOADED_PREVIEW = 1 << 1;
        /// Preview streaming is active.
        const PREVIEW = 1 << 2;
        /// Still-capture buffers are registered.
        const LOADED_CAPTURE = 1 << 3;
        /// A still capture is in flight.
        const CAPTURE = 1 << 4;
        /// An exposure bracket is in flight.
        const BRACKETING = 1 << 5;
        /// Autofocus is running.
        const AF = 1 << 6;
        /// A smooth zoom is running.
        const ZOOM = 1 << 7;
        /// Recording is active.
        const VIDEO = 1 << 8;
    }
}

/// Composite adapter states.
///
/// Every state except `Invalid` carries `INITIALIZED`, and every state past
/// buffer registration carries `PREVIEW`; `flags` exposes that view.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AdapterState {
    /// Constructed, no buffers registered.
    Initialized,
    /// Preview buffers registered.
    LoadedPreview,
    /// Preview streaming.
    Preview,
    /// Preview with autofocus running.
    Af,
    /// Preview with smooth zoom running.
    Zoom,
    /// Preview with autofocus and smooth zoom running.
    AfZoom,
    /// Preview with still-capture buffers registered.
    LoadedCapture,
    /// Still capture in flight.
    Capture,
    /// Exposure bracket in flight.
    Bracketing,
    /// Recording.
    Video,
    /// Recording with autofocus running.
    VideoAf,
    /// Recording with smooth zoom running.
    VideoZoom,
    /// Recording with autofocus and smooth zoom running.
    VideoAfZoom,
    /// Recording with still-capture buffers registered.
    VideoLoadedCapture,
    /// Video snapshot in flight.
    VideoCapture,
    /// The device failed fatally; the owner must rebuild the adapter.
    Invalid,
}

/// Commands accepted by the dispatcher, without payloads.
///
/// Legality is keyed by `(AdapterState, CommandKind)`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CommandKind {
    /// Register the preview buffer pool.
    UseBuffersPreview,
    /// Register the preview-metadata buffer pool.
    UseBuffersPreviewData,
    /// Register the still-capture buffer pool.
    UseBuffersImageCapture,
    /// Register the video buffer pool.
    UseBuffersVideoCapture,
    /// Start preview streaming.
    StartPreview,
    /// Stop preview streaming and unload preview buffers.
    StopPreview,
    /// Start recording.
    StartVideo,
    /// Stop recording.
    StopVideo,
    /// Start a still capture.
    StartImageCapture,
    /// Stop a still capture, or cancel a loaded one.
    StopImageCapture,
    /// Start an exposure bracket.
    StartBracketing,
    /// Stop an exposure bracket.
    StopBracketing,
    /// Start autofocus.
    PerformAutofocus,
    /// Cancel autofocus.
    CancelAutofocus,
    /// Start a smooth zoom.
    StartSmoothZoom,
    /// Stop a smooth zoom.
    StopSmoothZoom,
    /// Query the preview resolution.
    QueryResolutionPreview,
    /// Query the still-capture buffer size.
    QueryBufferSizeImageCapture,
    /// Query the preview-metadata buffer size.
    QueryBufferSizePreviewData,
    /// Start face detection.
    StartFaceDetection,
    /// Stop face detection.
    StopFaceDetection,
    /// Move the pipeline to its executing state.
    SwitchToExecuting,
}

impl AdapterState {
    /// The primitive-bit view of a composite state.
    pub fn flags(self) -> StateFlags {
        use StateFlags as F;

        let streaming = F::INITIALIZED | F::PREVIEW;
        match self {
            AdapterState::Initialized => F::INITIALIZED,
            AdapterState::LoadedPreview => F::INITIALIZED | F::LOADED_PREVIEW,
            AdapterState::Preview => streaming,
            AdapterState::Af => streaming | F::AF,
            AdapterState::Zoom => streaming | F::ZOOM,
            AdapterState::AfZoom => streaming | F::AF | F::ZOOM,
            AdapterState::LoadedCapture => streaming | F::LOADED_CAPTURE,
            AdapterState::Capture => streaming | F::CAPTURE,
            AdapterState::Bracketing => streaming | F::BRACKETING,
            AdapterState::Video => streaming | F::VIDEO,
            AdapterState::VideoAf => streaming | F::VIDEO | F::AF,
            AdapterState::VideoZoom => streaming | F::VIDEO | F::ZOOM,
            AdapterState::VideoAfZoom => streaming | F::VIDEO | F::AF | F::ZOOM,
            AdapterState::VideoLoadedCapture => streaming | F::VIDEO | F::LOADED_CAPTURE,
            AdapterState::VideoCapture => streaming | F::VIDEO | F::CAPTURE,
            AdapterState::Invalid => F::empty(),
        }
    }

    /// Looks up the legality table.  `None` means the command is illegal in
    /// this state.
    pub fn transition(self, cmd: CommandKind) -> Option<AdapterState> {
        use AdapterState::*;
        use CommandKind::*;

        if self == Invalid {
            return None;
        }

        match cmd {
            // read-only queries flow through the same cycle for uniformity
            QueryResolutionPreview | QueryBufferSizeImageCapture | QueryBufferSizePreviewData => {
                return Some(self);
            }
            StartFaceDetection | StopFaceDetection => {
                let busy =
                    StateFlags::LOADED_CAPTURE | StateFlags::CAPTURE | StateFlags::BRACKETING;
                let flags = self.flags();
                return (flags.contains(StateFlags::PREVIEW) && !flags.intersects(busy))
                    .then_some(self);
            }
            SwitchToExecuting => {
                return matches!(self, Preview | Video).then_some(self);
            }
            _ => (),
        }

        match (self, cmd) {
            (Initialized, UseBuffersPreview) => Some(LoadedPreview),

            (LoadedPreview, StartPreview) => Some(Preview),
            (LoadedPreview, StopPreview) => Some(Initialized),
            (LoadedPreview, UseBuffersPreviewData) => Some(LoadedPreview),

            (Preview, StopPreview) => Some(Initialized),
            (Preview, PerformAutofocus) => Some(Af),
            (Preview, StartSmoothZoom) => Some(Zoom),
            (Preview, StartVideo) => Some(Video),
            (Preview, UseBuffersImageCapture) => Some(LoadedCapture),
            (Preview, UseBuffersVideoCapture) => Some(Preview),

            (Af, CancelAutofocus) => Some(Preview),
            (Af, PerformAutofocus) => Some(Af),
            (Af, StartSmoothZoom) => Some(AfZoom),
            (Af, StopPreview) => Some(Initialized),

            (Zoom, StopSmoothZoom) => Some(Preview),
            (Zoom, PerformAutofocus) => Some(AfZoom),
            (Zoom, StopPreview) => Some(Initialized),

            (AfZoom, StopSmoothZoom) => Some(Af),
            (AfZoom, CancelAutofocus) => Some(Zoom),

            (LoadedCapture, StartImageCapture) => Some(Capture),
            (LoadedCapture, StartBracketing) => Some(Bracketing),
            (LoadedCapture, StopImageCapture) => Some(Preview),

            (Capture, StopImageCapture) => Some(Preview),

            (Bracketing, StopBracketing) => Some(Preview),
            (Bracketing, StartImageCapture) => Some(Capture),

            (Video, StopVideo) => Some(Preview),
            (Video, PerformAutofocus) => Some(VideoAf),
            (Video, StartSmoothZoom) => Some(VideoZoom),
            (Video, UseBuffersImageCapture) => Some(VideoLoadedCapture),
            (Video, UseBuffersVideoCapture) => Some(Video),

            (VideoAf, CancelAutofocus) => Some(Video),
            (VideoAf, StartSmoothZoom) => Some(VideoAfZoom),

            (VideoZoom, StopSmoothZoom) => Some(Video),
            (VideoZoom, PerformAutofocus) => Some(VideoAfZoom),

            (VideoAfZoom, StopSmoothZoom) => Some(VideoAf),
            (VideoAfZoom, CancelAutofocus) => Some(VideoZoom),

            (VideoLoadedCapture, StartImageCapture) => Some(VideoCapture),
            (VideoLoadedCapture, StopImageCapture) => Some(Video),

            (VideoCapture, StopImageCapture) => Some(Video),

            _ => None,
        }
    }

    /// The stop command that unwinds one step toward `Initialized`.
    pub fn exit_command(self) -> Option<CommandKind> {
        use AdapterState::*;
        use CommandKind::*;

        match self {
            Initialized | Invalid => None,
            LoadedPreview | Preview => Some(StopPreview),
            Af | VideoAf => Some(CancelAutofocus),
            Zoom | AfZoom | VideoZoom | VideoAfZoom => Some(StopSmoothZoom),
            LoadedCapture | Capture | VideoLoadedCapture | VideoCapture => Some(StopImageCapture),
            Bracketing => Some(StopBracketing),
            Video => Some(StopVideo),
        }
    }

    #[cfg(test)]
    pub(crate) const ALL: [AdapterState; 16] = [
        AdapterState::Initialized,
        AdapterState::LoadedPreview,
        AdapterState::Preview,
        AdapterState::Af,
        AdapterState::Zoom,
        AdapterState::AfZoom,
        AdapterState::LoadedCapture,
        AdapterState::Capture,
        AdapterState::Bracketing,
        AdapterState::Video,
        AdapterState::VideoAf,
        AdapterState::VideoZoom,
        AdapterState::VideoAfZoom,
        AdapterState::VideoLoadedCapture,
        AdapterState::VideoCapture,
        AdapterState::Invalid,
    ];
}

struct StateCell {
    current: AdapterState,
    next: AdapterState,
}

/// The committed/tentative state pair behind the adapter-wide lock.
pub(crate) struct StateMachine {
    cell: Mutex<StateCell>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            cell: Mutex::new(StateCell {
                current: AdapterState::Initialized,
                next: AdapterState::Initialized,
            }),
        }
    }

    /// Starts a transition.  The returned guard owns the adapter-wide lock;
    /// dropping it without `commit` discards the tentative state.
    pub fn begin(&self, cmd: CommandKind) -> Result<Transition<'_>> {
        let mut cell = self.cell.lock().unwrap();

        let next = match cell.current.transition(cmd) {
            Some(next) => next,
            None => {
                debug!("rejecting {:?} in {:?}", cmd, cell.current);
                return Error::invalid_op();
            }
        };
        cell.next = next;

        Ok(Transition {
            cell,
            committed: false,
        })
    }

    pub fn state(&self) -> AdapterState {
        self.cell.lock().unwrap().current
    }

    pub fn next_state(&self) -> AdapterState {
        self.cell.lock().unwrap().next
    }
}

/// An in-flight state transition.
///
/// Exactly one of `commit`/`rollback` finishes the transition.  Dropping the
/// guard without committing is a rollback.
pub(crate) struct Transition<'a> {
    cell: MutexGuard<'a, StateCell>,
    committed: bool,
}

impl Transition<'_> {
    /// The committed state when the transition began.
    pub fn current(&self) -> AdapterState {
        self.cell.current
    }

    /// The tentative state this transition commits to.
    #[allow(dead_code)]
    pub fn next(&self) -> AdapterState {
        self.cell.next
    }

    pub fn commit(mut self) {
        debug!("commit {:?} -> {:?}", self.cell.current, self.cell.next);
        self.cell.current = self.cell.next;
        self.committed = true;
    }

    #[allow(dead_code)]
    pub fn rollback(self) {}
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        if !self.committed {
            debug!("rollback to {:?}", self.cell.current);
            self.cell.next = self.cell.current;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_COMMANDS: [CommandKind; 22] = [
        CommandKind::UseBuffersPreview,
        CommandKind::UseBuffersPreviewData,
        CommandKind::UseBuffersImageCapture,
        CommandKind::UseBuffersVideoCapture,
        CommandKind::StartPreview,
        CommandKind::StopPreview,
        CommandKind::StartVideo,
        CommandKind::StopVideo,
        CommandKind::StartImageCapture,
        CommandKind::StopImageCapture,
        CommandKind::StartBracketing,
        CommandKind::StopBracketing,
        CommandKind::PerformAutofocus,
        CommandKind::CancelAutofocus,
        CommandKind::StartSmoothZoom,
        CommandKind::StopSmoothZoom,
        CommandKind::QueryResolutionPreview,
        CommandKind::QueryBufferSizeImageCapture,
        CommandKind::QueryBufferSizePreviewData,
        CommandKind::StartFaceDetection,
        CommandKind::StopFaceDetection,
        CommandKind::SwitchToExecuting,
    ];

    #[test]
    fn test_flags() {
        for state in AdapterState::ALL {
            let flags = state.flags();
            if state == AdapterState::Invalid {
                assert!(flags.is_empty());
                continue;
            }

            assert!(flags.contains(StateFlags::INITIALIZED));
            if flags.intersects(
                StateFlags::VIDEO
                    | StateFlags::AF
                    | StateFlags::ZOOM
                    | StateFlags::CAPTURE
                    | StateFlags::BRACKETING
                    | StateFlags::LOADED_CAPTURE,
            ) {
                assert!(flags.contains(StateFlags::PREVIEW), "{:?}", state);
            }
        }
    }

    #[test]
    fn test_transitions() {
        let cases = [
            (
                AdapterState::Initialized,
                CommandKind::UseBuffersPreview,
                AdapterState::LoadedPreview,
            ),
            (
                AdapterState::LoadedPreview,
                CommandKind::StartPreview,
                AdapterState::Preview,
            ),
            (
                AdapterState::Preview,
                CommandKind::StartVideo,
                AdapterState::Video,
            ),
            (
                AdapterState::Preview,
                CommandKind::UseBuffersImageCapture,
                AdapterState::LoadedCapture,
            ),
            (
                AdapterState::LoadedCapture,
                CommandKind::StartBracketing,
                AdapterState::Bracketing,
            ),
            (
                AdapterState::Bracketing,
                CommandKind::StartImageCapture,
                AdapterState::Capture,
            ),
            (
                AdapterState::Video,
                CommandKind::UseBuffersImageCapture,
                AdapterState::VideoLoadedCapture,
            ),
            (
                AdapterState::VideoLoadedCapture,
                CommandKind::StartImageCapture,
                AdapterState::VideoCapture,
            ),
            (
                AdapterState::VideoCapture,
                CommandKind::StopImageCapture,
                AdapterState::Video,
            ),
            (
                AdapterState::VideoZoom,
                CommandKind::PerformAutofocus,
                AdapterState::VideoAfZoom,
            ),
            (
                AdapterState::AfZoom,
                CommandKind::StopSmoothZoom,
                AdapterState::Af,
            ),
        ];

        for (state, cmd, next) in cases {
            assert_eq!(state.transition(cmd), Some(next), "{:?} {:?}", state, cmd);
        }
    }

    #[test]
    fn test_illegal_transitions() {
        // the table is closed; a rejected command leaves no tentative state
        let cases = [
            (AdapterState::Capture, CommandKind::StartVideo),
            (AdapterState::Capture, CommandKind::StartImageCapture),
            (AdapterState::Initialized, CommandKind::StartPreview),
            (AdapterState::Initialized, CommandKind::StartImageCapture),
            (AdapterState::Preview, CommandKind::StopVideo),
            (AdapterState::Preview, CommandKind::StartImageCapture),
            (AdapterState::Video, CommandKind::StartVideo),
            (AdapterState::Video, CommandKind::StopPreview),
            (AdapterState::Bracketing, CommandKind::StartVideo),
            (AdapterState::VideoCapture, CommandKind::StopVideo),
            (AdapterState::LoadedPreview, CommandKind::PerformAutofocus),
        ];

        for (state, cmd) in cases {
            assert_eq!(state.transition(cmd), None, "{:?} {:?}", state, cmd);
        }

        for cmd in ALL_COMMANDS {
            assert_eq!(AdapterState::Invalid.transition(cmd), None);
        }
    }

    #[test]
    fn test_transition_closure() {
        // legal transitions never reach Invalid and never lose INITIALIZED
        for state in AdapterState::ALL {
            for cmd in ALL_COMMANDS {
                if let Some(next) = state.transition(cmd) {
                    assert_ne!(next, AdapterState::Invalid);
                    assert!(next.flags().contains(StateFlags::INITIALIZED));
                }
            }
        }
    }

    #[test]
    fn test_exit_commands_terminate() {
        // every state unwinds to Initialized within its primitive-bit count
        for state in AdapterState::ALL {
            if state == AdapterState::Invalid {
                assert_eq!(state.exit_command(), None);
                continue;
            }

            let mut current = state;
            let limit = current.flags().bits().count_ones();
            for _ in 0..limit {
                if current == AdapterState::Initialized {
                    break;
                }
                let cmd = current.exit_command().unwrap();
                current = current.transition(cmd).unwrap();
            }
            assert_eq!(current, AdapterState::Initialized, "from {:?}", state);
        }
    }

    #[test]
    fn test_machine_commit() {
        let machine = StateMachine::new();

        let transition = machine.begin(CommandKind::UseBuffersPreview).unwrap();
        assert_eq!(transition.current(), AdapterState::Initialized);
        assert_eq!(transition.next(), AdapterState::LoadedPreview);
        transition.commit();

        assert_eq!(machine.state(), AdapterState::LoadedPreview);
        assert_eq!(machine.next_state(), AdapterState::LoadedPreview);
    }

    #[test]
    fn test_machine_rollback_on_drop() {
        let machine = StateMachine::new();

        let transition = machine.begin(CommandKind::UseBuffersPreview).unwrap();
        drop(transition);

        assert_eq!(machine.state(), AdapterState::Initialized);
        assert_eq!(machine.next_state(), AdapterState::Initialized);

        // the lock is free again; a second transition proceeds
        let transition = machine.begin(CommandKind::UseBuffersPreview).unwrap();
        transition.rollback();
        assert_eq!(machine.state(), AdapterState::Initialized);
    }

    #[test]
    fn test_machine_rejects_illegal() {
        let machine = StateMachine::new();

        let err = match machine.begin(CommandKind::StartPreview) {
            Ok(_) => panic!("expected rejection"),
            Err(err) => err,
        };
        assert_eq!(err, Error::InvalidOperation);
        assert_eq!(machine.state(), AdapterState::Initialized);

        // a failed lookup does not wedge the lock
        let transition = machine.begin(CommandKind::UseBuffersPreview).unwrap();
        transition.commit();
        assert_eq!(machine.state(), AdapterState::LoadedPreview);
    }
}
