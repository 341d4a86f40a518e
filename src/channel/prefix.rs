// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Prefix channels wrap exactly one child created from the remainder of
// a `prefix+inner://` URL and forward the full channel API to it. The
// child's data and state streams pass through overridable hooks, so a
// concrete prefix only implements the transformation it exists for.

use std::sync::{Arc, Weak};

use crate::config::{Config, Url};
use crate::error::{Error, Result};
use crate::msg::{Message, MsgMask, MsgType};
use crate::scheme::SchemeRef;

use super::base::Base;
use super::context::Context;
use super::{Channel, ChannelCallback, ChannelImpl, InitOutcome, Internal, State};

/// Which scheme wins when both the prefix and the child declare one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemePolicy {
    /// Delegate to the child unless the prefix has its own.
    #[default]
    Child,
    /// The prefix scheme replaces the child's.
    Override,
}

/// Stream transformation hooks. Defaults forward everything unchanged.
pub trait PrefixHook: Send + Sync + 'static {
    fn on_data(&self, internal: &Internal, msg: &Message<'_>) {
        internal.callback_data(msg);
    }

    /// Child state transitions mapped onto the prefix state machine.
    fn on_state(&self, internal: &Internal, state: State) {
        match state {
            State::Active => {
                internal.set_state(State::Active);
            }
            State::Error => {
                internal.set_state(State::Error);
            }
            State::Closing => {
                if matches!(internal.state(), State::Opening | State::Active) {
                    internal.set_state(State::Closing);
                }
            }
            State::Closed => {
                if internal.state() == State::Closing {
                    internal.set_state(State::Closed);
                }
            }
            _ => {
                internal.set_state(state);
            }
        }
    }

    fn on_other(&self, internal: &Internal, msg: &Message<'_>) {
        internal.callback(msg);
    }
}

/// Identity hook.
pub struct ForwardHook;

impl PrefixHook for ForwardHook {}

struct ChildForward {
    internal: Weak<Internal>,
    hook: Arc<dyn PrefixHook>,
}

impl ChannelCallback for ChildForward {
    fn message(&self, msg: &Message<'_>) {
        let Some(internal) = self.internal.upgrade() else {
            return;
        };
        match msg.msg_type {
            MsgType::Data => self.hook.on_data(&internal, msg),
            MsgType::State => self.hook.on_state(&internal, State::from_u8(msg.msgid as u8)),
            _ => self.hook.on_other(&internal, msg),
        }
    }
}

/// Reusable prefix implementation; concrete prefixes supply a hook.
pub struct Prefix {
    pub base: Base,
    child: Option<Channel>,
    hook: Arc<dyn PrefixHook>,
    pub scheme_policy: SchemePolicy,
}

impl Prefix {
    pub fn new(hook: impl PrefixHook) -> Prefix {
        Prefix {
            base: Base::default(),
            child: None,
            hook: Arc::new(hook),
            scheme_policy: SchemePolicy::default(),
        }
    }

    pub fn child(&mut self) -> Result<&mut Channel> {
        self.child.as_mut().ok_or_else(|| Error::State("prefix child not initialized".into()))
    }
}

impl ChannelImpl for Prefix {
    fn init(
        &mut self,
        internal: &Arc<Internal>,
        url: &Url,
        master: Option<&Channel>,
        context: &Context,
    ) -> Result<InitOutcome> {
        self.base.init(internal, url, context)?;
        let (_, curl) = self.base.sub_url(url)?;
        let child = context.channel_url(&curl, master)?;

        let forward: Arc<dyn ChannelCallback> = Arc::new(ChildForward {
            internal: Arc::downgrade(internal),
            hook: self.hook.clone(),
        });
        child.callback_add(&forward, MsgMask::ALL);
        internal.child_add(child.internal(), Some(&url.proto()))?;
        self.child = Some(child);
        Ok(InitOutcome::Ok)
    }

    fn open(&mut self, cfg: &Config) -> Result<()> {
        self.base.open_begin()?;
        self.child()?.open_cfg(cfg)
    }

    fn close(&mut self, force: bool) -> Result<()> {
        if force {
            if let Some(child) = self.child.as_mut() {
                let _ = child.close(true);
            }
            self.base.close_done();
            return Ok(());
        }
        if !self.base.close_begin(false) {
            return Ok(());
        }
        self.child()?.close(false)
    }

    fn post(&mut self, msg: &Message<'_>) -> Result<()> {
        self.child()?.post(msg)
    }

    fn scheme(&self, msg_type: MsgType) -> Option<SchemeRef> {
        if self.scheme_policy == SchemePolicy::Override && msg_type == MsgType::Data {
            if let Some(scheme) = self.base.scheme.clone() {
                return Some(scheme);
            }
        }
        match self.child.as_ref().and_then(|c| c.scheme(msg_type)) {
            Some(scheme) => Some(scheme),
            None => self.base.scheme_get(msg_type),
        }
    }

    fn free(&mut self) {
        self.child = None;
    }

    fn as_any(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
