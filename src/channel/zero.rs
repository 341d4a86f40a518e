// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// `zero://` emits the same preallocated message on every process call,
// as fast as the loop can drain it. Benchmark source: `size` and `fill`
// shape the payload, `msgid` tags it, `pending=no` drops the pending
// hint so the loop falls back to polling.

use std::sync::Arc;

use crate::config::{Config, Url};
use crate::error::{Error, Result};
use crate::msg::Message;

use super::base::Base;
use super::context::Context;
use super::event::Event;
use super::{Channel, ChannelImpl, DCaps, ImplDesc, InitOutcome, Internal, State};

pub static ZERO_IMPL: ImplDesc = ImplDesc { name: "zero", create: || Box::new(Zero::default()) };

pub struct Zero {
    base: Base,
    event: Option<Event>,
    buf: Vec<u8>,
    msgid: i32,
    seq: i64,
    with_pending: bool,
    with_fd: bool,
}

impl Default for Zero {
    fn default() -> Self {
        Self {
            base: Base::default(),
            event: None,
            buf: Vec::new(),
            msgid: 0,
            seq: 0,
            with_pending: true,
            with_fd: true,
        }
    }
}

impl ChannelImpl for Zero {
    fn init(
        &mut self,
        internal: &Arc<Internal>,
        url: &Url,
        _master: Option<&Channel>,
        context: &Context,
    ) -> Result<InitOutcome> {
        self.base.init(internal, url, context)?;
        let size = url.get_size("size", 1024)?;
        self.with_pending = url.get_typed("pending", true)?;
        self.with_fd = url.get_typed("fd", true)?;
        self.msgid = url.get_typed("msgid", 0)?;
        let fill: char = url.get_typed("fill", '\0')?;
        self.buf = vec![fill as u8; size];
        Ok(InitOutcome::Ok)
    }

    fn open(&mut self, _cfg: &Config) -> Result<()> {
        self.base.open_begin()?;
        self.seq = 0;
        if self.with_fd {
            let event = Event::new()?;
            event.notify()?;
            self.base.internal().update_fd(event.fd());
            self.base.internal().dcaps_update(DCaps::POLLIN, DCaps::empty());
            self.event = Some(event);
        }
        self.base.internal().dcaps_update(DCaps::PROCESS, DCaps::empty());
        if self.with_pending {
            self.base.internal().dcaps_pending(true);
        }
        self.base.open_done()
    }

    fn close(&mut self, _force: bool) -> Result<()> {
        if !self.base.close_begin(true) {
            return Ok(());
        }
        self.event = None;
        self.base.close_done();
        Ok(())
    }

    fn process(&mut self) -> Result<()> {
        if self.base.state() != State::Active {
            return Err(Error::Again);
        }
        let msg = Message::data(self.msgid, &self.buf).with_seq(self.seq);
        self.seq += 1;
        self.base.internal().callback_data(&msg);
        Ok(())
    }

    fn post(&mut self, _msg: &Message<'_>) -> Result<()> {
        Ok(())
    }

    fn as_any(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
