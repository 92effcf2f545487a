// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

#![warn(missing_docs)]

//! Camhal is a camera hardware adapter coordination layer.
//!
//! This crate provides the mode state machine, command dispatch, frame
//! reference counting, and completion fan-out that sit between a camera
//! service and an asynchronous hardware pipeline (OMX- or V4L2-backed).
//!
//! A command runs through three steps.  The state-check step looks the
//! command up in the legality table and stages a tentative state.  The
//! invoke step runs the hardware operation.  The commit step publishes the
//! tentative state, or rolls it back when the operation failed.  Completions
//! arrive on the pipeline's callback thread and fan out to subscribers, with
//! per-class reference counts deciding when each buffer is recycled to the
//! pipeline.

mod adapter;
mod frame;
mod pipeline;
mod refcount;
mod router;
mod state;
mod subscribers;
mod types;

pub use adapter::*;
pub use frame::*;
pub use pipeline::*;
pub use state::*;
pub use subscribers::*;
pub use types::*;
