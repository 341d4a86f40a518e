// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Pure Rust transport-layer channel framework. Channels are opaque
// bidirectional message endpoints created from URL descriptors, composed
// through prefixes and masters, driven by a cooperative loop and
// instrumented through a shared statistics bus.

pub mod config;
pub use config::{Config, Url};

pub mod error;
pub use error::{Error, Result};

pub mod msg;
pub use msg::{Message, MsgMask, MsgType};

pub mod ring;
pub use ring::{Ring, RingIter};

pub mod markerqueue;
pub use markerqueue::MarkerQueue;

pub mod stat;

pub mod scheme;
pub use scheme::Scheme;

pub mod channel;
pub use channel::context::Context;
pub use channel::{Caps, Channel, ChannelCallback, DCaps, State};
