// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Error kinds shared by every subsystem. `Again` is a normal variant so
// backpressure travels through `?` like any other failure and callers can
// match on it without a side channel.

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed URL, unknown key, invalid parameter value.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown protocol, channel name or missing required entity.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate registration.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Value does not fit the destination or an offset is out of bounds.
    #[error("out of range: {0}")]
    RangeOverflow(String),

    /// Buffer smaller than the declared size.
    #[error("message size: {0}")]
    MessageSize(String),

    /// Temporarily unavailable, retry later.
    #[error("resource temporarily unavailable")]
    Again,

    /// OS-reported failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing violation on a transport.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Scheme converter failure with a field path.
    #[error(transparent)]
    Conversion(#[from] ConvertError),

    /// Channel is in a state that forbids the operation.
    #[error("invalid state: {0}")]
    State(String),
}

impl Error {
    pub fn is_again(&self) -> bool {
        matches!(self, Error::Again)
    }
}

/// One step of the converter error path: either a named field or a list
/// index inside it.
#[derive(Debug, Clone)]
pub enum ConvertStep {
    Field(String),
    Index(usize),
}

/// Converter failure carrying the stack of fields and indices leading to
/// the offending location. The stack is pushed innermost-first while the
/// error unwinds and rendered outermost-first as `root.field[3].leaf`.
#[derive(Debug, Clone)]
pub struct ConvertError {
    pub message: String,
    pub stack: Vec<ConvertStep>,
}

impl ConvertError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), stack: Vec::new() }
    }

    /// Push a field name onto the path (innermost first).
    pub fn field(mut self, name: &str) -> Self {
        self.stack.push(ConvertStep::Field(name.to_string()));
        self
    }

    /// Push a list index onto the path.
    pub fn index(mut self, idx: usize) -> Self {
        self.stack.push(ConvertStep::Index(idx));
        self
    }

    /// Render the accumulated path, outermost entry first.
    pub fn path(&self) -> String {
        let mut r = String::new();
        for step in self.stack.iter().rev() {
            match step {
                ConvertStep::Field(name) => {
                    if !r.is_empty() {
                        r.push('.');
                    }
                    r.push_str(name);
                }
                ConvertStep::Index(idx) => {
                    r.push('[');
                    r.push_str(&idx.to_string());
                    r.push(']');
                }
            }
        }
        r
    }
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = self.path();
        if path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", path, self.message)
        }
    }
}

impl std::error::Error for ConvertError {}
