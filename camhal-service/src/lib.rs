// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

#![warn(missing_docs)]

//! A camera HAL service layer based on camhal.
//!
//! This crate owns the buffer pools and sequences the camhal adapter through
//! each camera use case on behalf of the camera service.

mod hal;
mod memory;

pub use hal::*;
pub use memory::*;
