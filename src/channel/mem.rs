// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// `mem://` moves messages between two in-process channels over a pair
// of SPSC rings, with an eventfd readiness notifier on each direction.
// The master side allocates the rings at open; the slave binds with
// `master=` and uses them crosswise. The `frame` parameter selects the
// record header before anything else happens: the registered `mem`
// implementation only inspects the URL and redirects to the short- or
// full-frame implementation through the init-replace step.

use std::sync::{Arc, Mutex, Weak};

use crate::config::{Config, Url};
use crate::error::{Error, Result};
use crate::msg::{Message, MsgType};
use crate::ring::Ring;

use super::base::Base;
use super::context::Context;
use super::event::{Event, Notify};
use super::{Channel, ChannelImpl, DCaps, ImplDesc, InitOutcome, Internal, State};

pub static MEM_IMPL: ImplDesc = ImplDesc { name: "mem", create: || Box::new(MemInit) };

static MEM_SHORT_IMPL: ImplDesc =
    ImplDesc { name: "mem", create: || Box::new(Mem::<ShortFrame>::default()) };

static MEM_FULL_IMPL: ImplDesc =
    ImplDesc { name: "mem", create: || Box::new(Mem::<FullFrame>::default()) };

/// Dispatcher: chooses the frame layout and hands initialization over.
struct MemInit;

impl ChannelImpl for MemInit {
    fn init(
        &mut self,
        _internal: &Arc<Internal>,
        url: &Url,
        _master: Option<&Channel>,
        _context: &Context,
    ) -> Result<InitOutcome> {
        let frame = url.get_typed("frame", String::from("normal"))?;
        match frame.as_str() {
            "normal" | "short" => Ok(InitOutcome::Replace(&MEM_SHORT_IMPL)),
            "full" => Ok(InitOutcome::Replace(&MEM_FULL_IMPL)),
            other => Err(Error::InvalidArgument(format!("invalid frame '{other}'"))),
        }
    }

    fn open(&mut self, _cfg: &Config) -> Result<()> {
        unreachable!("dispatcher never becomes a live channel")
    }

    fn close(&mut self, _force: bool) -> Result<()> {
        unreachable!("dispatcher never becomes a live channel")
    }

    fn post(&mut self, _msg: &Message<'_>) -> Result<()> {
        unreachable!("dispatcher never becomes a live channel")
    }

    fn as_any(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

/// On-ring record header.
pub trait Frame: Default + Send + 'static {
    const SIZE: usize;

    fn write(msg: &Message<'_>, buf: &mut [u8]);

    fn read(buf: &[u8]) -> Message<'_>;

    /// Whether this frame can carry the message class at all.
    fn carries(msg_type: MsgType) -> bool;
}

/// seq + msgid, data messages only.
#[derive(Default)]
pub struct ShortFrame;

impl Frame for ShortFrame {
    const SIZE: usize = 16;

    fn write(msg: &Message<'_>, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&msg.seq.to_le_bytes());
        buf[8..12].copy_from_slice(&msg.msgid.to_le_bytes());
        buf[12..16].fill(0);
    }

    fn read(buf: &[u8]) -> Message<'_> {
        Message {
            seq: i64::from_le_bytes(buf[0..8].try_into().unwrap()),
            msgid: i32::from_le_bytes(buf[8..12].try_into().unwrap()),
            ..Default::default()
        }
    }

    fn carries(msg_type: MsgType) -> bool {
        msg_type == MsgType::Data
    }
}

/// Full header: seq, msgid, type, flags, addr and timestamp survive the
/// crossing, so control traffic works too.
#[derive(Default)]
pub struct FullFrame;

impl Frame for FullFrame {
    const SIZE: usize = 32;

    fn write(msg: &Message<'_>, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&msg.seq.to_le_bytes());
        buf[8..12].copy_from_slice(&msg.msgid.to_le_bytes());
        buf[12..14].copy_from_slice(&(msg.msg_type as i16).to_le_bytes());
        buf[14..16].copy_from_slice(&msg.flags.to_le_bytes());
        buf[16..24].copy_from_slice(&msg.addr.to_le_bytes());
        buf[24..32].copy_from_slice(&msg.time.to_le_bytes());
    }

    fn read(buf: &[u8]) -> Message<'_> {
        let type_raw = i16::from_le_bytes(buf[12..14].try_into().unwrap());
        let msg_type = match type_raw {
            1 => MsgType::Control,
            2 => MsgType::State,
            3 => MsgType::Channel,
            _ => MsgType::Data,
        };
        Message {
            seq: i64::from_le_bytes(buf[0..8].try_into().unwrap()),
            msgid: i32::from_le_bytes(buf[8..12].try_into().unwrap()),
            msg_type,
            flags: u16::from_le_bytes(buf[14..16].try_into().unwrap()),
            addr: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            time: i64::from_le_bytes(buf[24..32].try_into().unwrap()),
            ..Default::default()
        }
    }

    fn carries(msg_type: MsgType) -> bool {
        matches!(msg_type, MsgType::Data | MsgType::Control)
    }
}

/// One direction: a ring plus the notifier of whoever reads it.
struct Half {
    ring: Ring,
    notify: Mutex<Option<Notify>>,
}

impl Half {
    fn new(size: usize) -> Arc<Half> {
        Arc::new(Half { ring: Ring::new(size), notify: Mutex::new(None) })
    }

    fn wake(&self) -> Result<()> {
        if let Some(notify) = self.notify.lock().unwrap().as_ref() {
            notify.notify()?;
        }
        Ok(())
    }
}

pub struct Mem<F: Frame> {
    base: Base,
    size: usize,
    child: bool,
    with_fd: bool,
    master: Option<Weak<super::ChannelShared>>,
    rin: Option<Arc<Half>>,
    rout: Option<Arc<Half>>,
    event: Option<Event>,
    _frame: std::marker::PhantomData<F>,
}

impl<F: Frame> Default for Mem<F> {
    fn default() -> Self {
        Self {
            base: Base::default(),
            size: 64 * 1024,
            child: false,
            with_fd: true,
            master: None,
            rin: None,
            rout: None,
            event: None,
            _frame: std::marker::PhantomData,
        }
    }
}

impl<F: Frame> Mem<F> {
    fn empty(&self) -> bool {
        match &self.rin {
            Some(half) => half.ring.read().is_err(),
            None => true,
        }
    }
}

impl<F: Frame> ChannelImpl for Mem<F> {
    fn init(
        &mut self,
        internal: &Arc<Internal>,
        url: &Url,
        master: Option<&Channel>,
        context: &Context,
    ) -> Result<InitOutcome> {
        self.base.init(internal, url, context)?;
        self.with_fd = url.get_typed("fd", true)?;
        match master {
            Some(master) => {
                {
                    let mut guard = master.shared.imp.lock().unwrap();
                    let sibling =
                        guard.as_any().downcast_mut::<Mem<F>>().ok_or_else(|| {
                            Error::InvalidArgument(format!(
                                "master '{}' must be a mem:// channel with the same frame",
                                master.name()
                            ))
                        })?;
                    self.with_fd = sibling.with_fd;
                }
                tracing::debug!(channel = %internal.name(), master = %master.name(), "init as mem slave");
                self.child = true;
                self.master = Some(Arc::downgrade(&master.shared));
            }
            None => {
                self.size = url.get_size("size", 64 * 1024)?;
            }
        }
        Ok(InitOutcome::Ok)
    }

    fn open(&mut self, _cfg: &Config) -> Result<()> {
        self.base.open_begin()?;

        if self.with_fd {
            let event = Event::new()?;
            self.base.internal().update_fd(event.fd());
            self.base.internal().dcaps_update(DCaps::POLLIN, DCaps::empty());
            self.event = Some(event);
        }

        if self.child {
            let master = self
                .master
                .as_ref()
                .and_then(|w| w.upgrade())
                .ok_or_else(|| Error::State("master channel already destroyed".into()))?;
            let mut guard = master.imp.lock().unwrap();
            let sibling = guard
                .as_any()
                .downcast_mut::<Mem<F>>()
                .ok_or_else(|| Error::State("master changed implementation".into()))?;
            let (rin, rout) = match (&sibling.rout, &sibling.rin) {
                (Some(rout), Some(rin)) => (rout.clone(), rin.clone()),
                _ => return Err(Error::State("master channel is not open".into())),
            };
            drop(guard);
            if let Some(event) = &self.event {
                *rin.notify.lock().unwrap() = Some(event.detach());
            }
            self.rin = Some(rin);
            self.rout = Some(rout);
        } else {
            let rin = Half::new(self.size);
            let rout = Half::new(self.size);
            if let Some(event) = &self.event {
                *rin.notify.lock().unwrap() = Some(event.detach());
            }
            self.rin = Some(rin);
            self.rout = Some(rout);
        }

        self.base.internal().dcaps_update(DCaps::PROCESS, DCaps::empty());
        if !self.empty() {
            tracing::debug!(channel = %self.base.name(), "pending data, arm notification");
            self.base.internal().dcaps_pending(true);
            if let Some(event) = &self.event {
                event.notify()?;
            }
        }
        self.base.open_done()
    }

    fn close(&mut self, _force: bool) -> Result<()> {
        if !self.base.close_begin(true) {
            return Ok(());
        }
        if let Some(rin) = &self.rin {
            *rin.notify.lock().unwrap() = None;
        }
        self.rin = None;
        self.rout = None;
        self.event = None;
        self.base.close_done();
        Ok(())
    }

    fn post(&mut self, msg: &Message<'_>) -> Result<()> {
        if !F::carries(msg.msg_type) {
            return Ok(());
        }
        if self.base.state() != State::Active {
            return Err(Error::State(format!(
                "post on '{}' in state {:?}",
                self.base.name(),
                self.base.state()
            )));
        }
        self.base.log_msg("out", msg);
        let rout = self.rout.as_ref().ok_or(Error::Again)?;
        let size = F::SIZE + msg.data.len();
        let mut w = rout.ring.write_begin(size)?;
        {
            let buf = w.data();
            F::write(msg, &mut buf[..F::SIZE]);
            buf[F::SIZE..size].copy_from_slice(msg.data);
        }
        rout.ring.write_end(w, size);
        rout.wake()
    }

    fn process(&mut self) -> Result<()> {
        let Some(rin) = self.rin.clone() else {
            return Err(Error::Again);
        };
        {
            let record = rin.ring.read()?;
            if record.len() < F::SIZE {
                return self.base.fail(Error::MessageSize(format!(
                    "invalid payload size {} < {}",
                    record.len(),
                    F::SIZE
                )));
            }
            let mut msg = F::read(&record[..F::SIZE]);
            msg.data = &record[F::SIZE..];
            self.base.log_msg("in", &msg);
            match msg.msg_type {
                MsgType::Data => self.base.internal().callback_data(&msg),
                _ => self.base.internal().callback(&msg),
            }
        }
        rin.ring.shift()?;

        let empty = self.empty();
        self.base.internal().dcaps_pending(!empty);
        if empty {
            if let Some(event) = &self.event {
                let rin = rin.clone();
                event.clear_race(move || rin.ring.read().is_ok())?;
            }
        }
        Ok(())
    }

    fn as_any(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trip() {
        let msg = Message::control(42, b"").with_seq(7).with_addr(9);
        let mut buf = [0u8; FullFrame::SIZE];
        FullFrame::write(&msg, &mut buf);
        let back = FullFrame::read(&buf);
        assert_eq!(back.msgid, 42);
        assert_eq!(back.seq, 7);
        assert_eq!(back.addr, 9);
        assert_eq!(back.msg_type, MsgType::Control);

        let mut buf = [0u8; ShortFrame::SIZE];
        ShortFrame::write(&Message::data(1, b"").with_seq(3), &mut buf);
        let back = ShortFrame::read(&buf);
        assert_eq!(back.msgid, 1);
        assert_eq!(back.seq, 3);
    }
}
