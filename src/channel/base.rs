// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Default behaviour shared by concrete channel implementations: holds
// the shared internal and context, reads the common init parameters
// (`scheme`, `stat`, `dump`), and wraps the open/close state dance so
// an implementation only fills in its own `_open`/`_close` logic.

use std::sync::Arc;

use crate::config::Url;
use crate::error::{Error, Result};
use crate::msg::{Message, MsgType};
use crate::scheme::SchemeRef;
use crate::stat;

use super::context::Context;
use super::{Caps, DCaps, Internal, State};

/// Common implementation state. Embed one and call [`Base::init`] first
/// thing from `ChannelImpl::init`.
pub struct Base {
    internal: Option<Arc<Internal>>,
    context: Option<Context>,
    pub scheme: Option<SchemeRef>,
    pub scheme_control: Option<SchemeRef>,
    /// Log posted/received messages when set via `dump=yes`.
    pub dump: bool,
}

impl Default for Base {
    fn default() -> Self {
        Self { internal: None, context: None, scheme: None, scheme_control: None, dump: false }
    }
}

impl Base {
    /// Bind to the shared internal and read the common parameters.
    pub fn init(&mut self, internal: &Arc<Internal>, url: &Url, context: &Context) -> Result<()> {
        self.internal = Some(internal.clone());
        self.context = Some(context.clone());
        self.dump = url.get_typed("dump", false)?;

        if let Some(dir) = url.get("dir") {
            let caps = match dir.as_str() {
                "r" | "in" => Caps::INPUT,
                "w" | "out" => Caps::OUTPUT,
                "rw" | "inout" => Caps::INOUT,
                other => {
                    return Err(Error::InvalidArgument(format!("invalid dir '{other}'")))
                }
            };
            internal.caps_set(caps);
        }

        if let Some(scheme_url) = url.get("scheme") {
            let scheme = context.scheme_load(&scheme_url)?;
            self.scheme = Some(scheme);
        }
        if url.get_typed("stat", false)? {
            internal.set_stat(Arc::new(stat::Block::channel(internal.name().to_string())));
        }
        Ok(())
    }

    /// Trace a message when `dump=yes` was requested at init.
    pub fn log_msg(&self, direction: &str, msg: &Message<'_>) {
        if !self.dump {
            return;
        }
        tracing::info!(
            channel = %self.name(),
            direction,
            msg_type = ?msg.msg_type,
            msgid = msg.msgid,
            seq = msg.seq,
            size = msg.data.len(),
            "message dump"
        );
    }

    pub fn internal(&self) -> &Arc<Internal> {
        self.internal.as_ref().expect("base used before init")
    }

    pub fn context(&self) -> &Context {
        self.context.as_ref().expect("base used before init")
    }

    pub fn name(&self) -> &str {
        self.internal().name()
    }

    pub fn state(&self) -> State {
        self.internal().state()
    }

    pub fn set_state(&self, state: State) -> State {
        self.internal().set_state(state)
    }

    /// Guard for operations only valid while closed.
    pub fn check_closed(&self, op: &str) -> Result<()> {
        let state = self.state();
        if state != State::Closed {
            return Err(Error::State(format!(
                "{op} on '{}' in state {state:?}",
                self.name()
            )));
        }
        Ok(())
    }

    /// Standard open entry: `Closed -> Opening`. The implementation
    /// either finishes with [`Base::open_done`] or arranges processing.
    pub fn open_begin(&self) -> Result<()> {
        self.check_closed("open")?;
        self.set_state(State::Opening);
        Ok(())
    }

    /// Finish opening: `Opening -> Active`.
    pub fn open_done(&self) -> Result<()> {
        let state = self.state();
        if state != State::Opening {
            return Err(Error::State(format!(
                "open finish on '{}' in state {state:?}",
                self.name()
            )));
        }
        self.set_state(State::Active);
        Ok(())
    }

    /// Standard close entry; returns `false` when there is nothing to do
    /// (already closed or closing without force).
    pub fn close_begin(&self, force: bool) -> bool {
        match self.state() {
            State::Closed | State::Destroy => false,
            State::Closing => force,
            _ => {
                self.set_state(State::Closing);
                true
            }
        }
    }

    /// Finish closing: drop scheduling hints and go `Closed`.
    pub fn close_done(&self) {
        let internal = self.internal();
        internal.dcaps_update(
            DCaps::empty(),
            DCaps::PROCESS | DCaps::PENDING | DCaps::POLLMASK,
        );
        internal.update_fd(-1);
        internal.set_state(State::Closed);
    }

    /// Fail into the terminal error state and return the error.
    pub fn fail<T>(&self, error: Error) -> Result<T> {
        tracing::error!(channel = %self.name(), %error, "channel error");
        self.set_state(State::Error);
        Err(error)
    }

    /// Default scheme accessor over the loaded data/control schemes.
    pub fn scheme_get(&self, msg_type: MsgType) -> Option<SchemeRef> {
        match msg_type {
            MsgType::Data => self.scheme.clone(),
            MsgType::Control => self.scheme_control.clone(),
            _ => None,
        }
    }

    /// Parse the child URL of a `prefix+inner://` proto: strip the first
    /// segment and rebuild the inner URL with an internal name.
    pub fn sub_url(&self, url: &Url) -> Result<(String, Url)> {
        let proto = url.proto();
        let Some(sep) = proto.find('+') else {
            return Err(Error::InvalidArgument(format!(
                "invalid prefix url '{proto}': no + found"
            )));
        };
        let prefix = proto[..sep].to_string();
        let curl = url.copy();
        curl.set_proto(&proto[sep + 1..]);
        curl.set("name", format!("{}/{}", self.name(), prefix));
        curl.set("tll.internal", "yes");
        Ok((prefix, curl))
    }
}

