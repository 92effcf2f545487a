// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

//! Simple types.
//!
//! This module defines simple adapter-wide types.

use std::{fmt, result};

/// The error type for adapter operations.
#[derive(thiserror::Error, Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// A generic error with a descriptive message to provide the context.
    #[error("{0}")]
    Context(&'static str),
    /// A command that is not legal in the current adapter state.
    #[error("invalid operation")]
    InvalidOperation,
    /// A validation error indicating a bad user input.
    #[error("bad user input")]
    User,
    /// Indicates an unsupported operation.
    #[error("unsupported")]
    Unsupported,
    /// A runtime device error that may or may not be persistent.
    #[error("device error")]
    Device,
    /// A hardware acknowledgment that did not arrive in time.
    #[error("timed out")]
    Timeout,
    /// A frame type was marked in a completion mask with no subscribers.
    #[error("no subscribers for frame type")]
    NoSubscribers,
}

impl Error {
    pub(crate) fn ctx<T>(s: &'static str) -> Result<T> {
        Err(Error::Context(s))
    }

    pub(crate) fn invalid_op<T>() -> Result<T> {
        Err(Error::InvalidOperation)
    }

    pub(crate) fn user<T>() -> Result<T> {
        Err(Error::User)
    }

    pub(crate) fn unsupported<T>() -> Result<T> {
        Err(Error::Unsupported)
    }

    pub(crate) fn device<T>() -> Result<T> {
        Err(Error::Device)
    }
}

/// A specialized `Result` type for adapter operations.
pub type Result<T> = result::Result<T, Error>;

/// The completion mode of an accepted hardware operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OpStatus {
    /// The operation completed synchronously.
    Done,
    /// The operation was accepted and completes later via the notification
    /// path.
    Pending,
}

/// A stable small-integer identity for a hardware buffer.
///
/// Ids are assigned by the buffer provider at allocation time and index the
/// per-class reference-count tables directly.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct BufferId(pub u32);

impl BufferId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl<T> From<T> for BufferId
where
    T: Into<u32>,
{
    fn from(val: T) -> Self {
        Self(val.into())
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
