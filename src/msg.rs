// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The message header passed through channels. Payload is borrowed: the
// bytes belong to the emitter until the callback returns, and the
// lifetime on `Message` enforces exactly that.

use bitflags::bitflags;

/// Message class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i16)]
pub enum MsgType {
    #[default]
    Data = 0,
    Control = 1,
    State = 2,
    Channel = 3,
}

bitflags! {
    /// Callback subscription mask over message classes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MsgMask: u32 {
        const DATA = 1 << 0;
        const CONTROL = 1 << 1;
        const STATE = 1 << 2;
        const CHANNEL = 1 << 3;
        const ALL = Self::DATA.bits() | Self::CONTROL.bits() | Self::STATE.bits() | Self::CHANNEL.bits();
    }
}

impl MsgType {
    pub fn mask(self) -> MsgMask {
        match self {
            MsgType::Data => MsgMask::DATA,
            MsgType::Control => MsgMask::CONTROL,
            MsgType::State => MsgMask::STATE,
            MsgType::Channel => MsgMask::CHANNEL,
        }
    }
}

/// Message ids of channel-class messages.
pub mod channel_msg {
    pub const UPDATE: i32 = 0;
    pub const ADD: i32 = 1;
    pub const DELETE: i32 = 2;
}

/// A flat message record. `data` is valid only for the duration of the
/// callback; callees that need the bytes later must copy them.
#[derive(Debug, Clone, Copy, Default)]
pub struct Message<'a> {
    pub msg_type: MsgType,
    pub msgid: i32,
    pub seq: i64,
    /// Opaque endpoint id, e.g. a client handle on a server channel.
    pub addr: u64,
    pub time: i64,
    pub flags: u16,
    pub data: &'a [u8],
}

impl<'a> Message<'a> {
    pub fn data(msgid: i32, data: &'a [u8]) -> Self {
        Self { msg_type: MsgType::Data, msgid, data, ..Default::default() }
    }

    pub fn control(msgid: i32, data: &'a [u8]) -> Self {
        Self { msg_type: MsgType::Control, msgid, data, ..Default::default() }
    }

    pub fn channel(msgid: i32, data: &'a [u8]) -> Self {
        Self { msg_type: MsgType::Channel, msgid, data, ..Default::default() }
    }

    pub fn state(msgid: i32) -> Self {
        Self { msg_type: MsgType::State, msgid, ..Default::default() }
    }

    pub fn with_seq(mut self, seq: i64) -> Self {
        self.seq = seq;
        self
    }

    pub fn with_addr(mut self, addr: u64) -> Self {
        self.addr = addr;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks() {
        assert_eq!(MsgType::Data.mask(), MsgMask::DATA);
        assert_eq!(MsgType::State.mask(), MsgMask::STATE);
        assert!(MsgMask::ALL.contains(MsgType::Channel.mask()));
        assert!(!(MsgMask::DATA | MsgMask::STATE).contains(MsgMask::CONTROL));
    }
}
