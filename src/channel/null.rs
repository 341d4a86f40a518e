// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// `null://` swallows every post and never produces data. On open it
// publishes a `client` config block describing how a peer could mirror
// the channel, including the scheme by content hash when one is loaded.

use std::sync::Arc;

use crate::config::{Config, Url};
use crate::error::Result;
use crate::msg::{Message, MsgType};
use crate::scheme::SchemeRef;

use super::base::Base;
use super::context::Context;
use super::{Channel, ChannelImpl, ImplDesc, InitOutcome, Internal};

pub static NULL_IMPL: ImplDesc = ImplDesc { name: "null", create: || Box::new(Null::default()) };

#[derive(Default)]
pub struct Null {
    base: Base,
}

impl ChannelImpl for Null {
    fn init(
        &mut self,
        internal: &Arc<Internal>,
        url: &Url,
        _master: Option<&Channel>,
        context: &Context,
    ) -> Result<InitOutcome> {
        self.base.init(internal, url, context)?;
        Ok(InitOutcome::Ok)
    }

    fn open(&mut self, _cfg: &Config) -> Result<()> {
        self.base.open_begin()?;

        let client = Config::new();
        client.set("init.tll.proto", "null");
        if let Some(scheme) = &self.base.scheme {
            if let (Ok(hash), Ok(full)) = (scheme.dump("sha256"), scheme.dump("yamls+gz")) {
                client.set("init.scheme", hash.clone());
                client.set(&format!("scheme.{hash}"), full);
            }
        }
        self.base.internal().config().set_config("client", client);

        self.base.open_done()
    }

    fn close(&mut self, _force: bool) -> Result<()> {
        if !self.base.close_begin(true) {
            return Ok(());
        }
        self.base.internal().config().unlink("client");
        self.base.close_done();
        Ok(())
    }

    fn post(&mut self, _msg: &Message<'_>) -> Result<()> {
        Ok(())
    }

    fn scheme(&self, msg_type: MsgType) -> Option<SchemeRef> {
        self.base.scheme_get(msg_type)
    }

    fn as_any(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
