// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// `seq-check+` forwards everything and warns when the wrapped channel
// produces non-monotonic sequence numbers. Diagnostic prefix, no data
// transformation.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::msg::Message;

use super::prefix::{Prefix, PrefixHook};
use super::{ImplDesc, Internal};

pub static SEQ_CHECK_IMPL: ImplDesc = ImplDesc {
    name: "seq-check+",
    create: || Box::new(Prefix::new(SeqCheck::default())),
};

#[derive(Default)]
pub struct SeqCheck {
    last: AtomicI64,
}

impl PrefixHook for SeqCheck {
    fn on_data(&self, internal: &Internal, msg: &Message<'_>) {
        let last = self.last.swap(msg.seq, Ordering::Relaxed);
        if last != 0 && msg.seq <= last {
            tracing::warn!(
                channel = %internal.name(),
                seq = msg.seq,
                last,
                "non-monotonic sequence"
            );
        }
        internal.callback_data(msg);
    }
}
