// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// `direct://` pairs two channels in process: whatever one side posts is
// delivered synchronously to the other side's data subscribers. The
// master side is created first, the slave binds to it via `master=`.
// With `notify-state=yes` the master also receives control messages
// describing the slave's state transitions.

use std::sync::{Arc, Mutex, Weak};

use crate::config::{Config, Url};
use crate::error::{Error, Result};
use crate::msg::{Message, MsgType};
use crate::scheme::SchemeRef;

use super::base::Base;
use super::context::Context;
use super::{Channel, ChannelImpl, ImplDesc, InitOutcome, Internal, State};

pub static DIRECT_IMPL: ImplDesc =
    ImplDesc { name: "direct", create: || Box::new(Direct::default()) };

/// Control message id for slave state updates.
pub const DIRECT_STATE_MSGID: i32 = 10;

const STATE_SCHEME: &str = "yamls://
- name: DirectStateUpdate
  id: 10
  fields:
    - {name: state, type: uint8, options.type: enum, enum: {Closed: 0, Opening: 1, Active: 2, Error: 3, Closing: 4, Destroy: 5}}
";

#[derive(Default)]
pub struct Direct {
    base: Base,
    sub: bool,
    notify_state: bool,
    sibling: Mutex<Option<Weak<Internal>>>,
    scheme_control: Option<SchemeRef>,
}

impl Direct {
    fn sibling(&self) -> Option<Arc<Internal>> {
        self.sibling.lock().unwrap().as_ref().and_then(|w| w.upgrade())
    }

    fn notify_sibling_state(&self, state: State) {
        if !self.notify_state {
            return;
        }
        let Some(sibling) = self.sibling() else {
            return;
        };
        if sibling.state() != State::Active {
            return;
        }
        let data = [state as u8];
        sibling.callback(&Message::control(DIRECT_STATE_MSGID, &data));
    }
}

impl ChannelImpl for Direct {
    fn init(
        &mut self,
        internal: &Arc<Internal>,
        url: &Url,
        master: Option<&Channel>,
        context: &Context,
    ) -> Result<InitOutcome> {
        self.base.init(internal, url, context)?;

        let master = match master {
            None => {
                self.notify_state = url.get_typed("notify-state", false)?;
                if self.notify_state {
                    self.scheme_control = Some(context.scheme_load(STATE_SCHEME)?);
                }
                return Ok(InitOutcome::Ok);
            }
            Some(master) => master,
        };

        self.sub = true;
        let mut guard = master.shared.imp.lock().unwrap();
        let sibling = guard
            .as_any()
            .downcast_mut::<Direct>()
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "master '{}' must be a direct:// channel",
                    master.name()
                ))
            })?;
        if sibling.sub {
            return Err(Error::InvalidArgument(format!(
                "master '{}' has its own master, can not bind",
                master.name()
            )));
        }
        tracing::debug!(channel = %internal.name(), master = %master.name(), "bind to master");
        self.notify_state = sibling.notify_state;
        *self.sibling.lock().unwrap() = Some(Arc::downgrade(master.internal()));
        *sibling.sibling.lock().unwrap() = Some(Arc::downgrade(internal));
        Ok(InitOutcome::Ok)
    }

    fn open(&mut self, _cfg: &Config) -> Result<()> {
        self.base.open_begin()?;
        self.base.open_done()?;
        if self.sub {
            self.notify_sibling_state(State::Active);
        }
        Ok(())
    }

    fn close(&mut self, _force: bool) -> Result<()> {
        if !self.base.close_begin(true) {
            return Ok(());
        }
        self.base.close_done();
        if self.sub {
            self.notify_sibling_state(State::Closed);
        }
        Ok(())
    }

    fn post(&mut self, msg: &Message<'_>) -> Result<()> {
        self.base.log_msg("out", msg);
        if self.base.state() != State::Active {
            return Err(Error::State(format!(
                "post on '{}' in state {:?}",
                self.base.name(),
                self.base.state()
            )));
        }
        let Some(sibling) = self.sibling() else {
            return Ok(());
        };
        if sibling.state() != State::Active {
            return Ok(());
        }
        match msg.msg_type {
            MsgType::Data => sibling.callback_data(msg),
            _ => sibling.callback(msg),
        }
        Ok(())
    }

    fn scheme(&self, msg_type: MsgType) -> Option<SchemeRef> {
        match msg_type {
            MsgType::Control => self.scheme_control.clone(),
            _ => self.base.scheme_get(msg_type),
        }
    }

    fn free(&mut self) {
        *self.sibling.lock().unwrap() = None;
    }

    fn as_any(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
