// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Channel core: the handle, the shared bookkeeping (`Internal`), the
// state machine and the callback fabric. A channel is owned by its
// creator; the context and parent channels keep only weak references,
// so dropping the owning handle tears the channel down. Per-channel
// operations are single-threaded by contract; the pieces shared with
// other threads (stat blocks, rings, the notifier) synchronize
// themselves.

pub mod base;
pub mod context;
pub mod direct;
pub mod event;
pub mod mem;
pub mod module;
pub mod null;
pub mod prefix;
pub mod seqcheck;
pub mod zero;

use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use bitflags::bitflags;

use crate::config::{Config, Url};
use crate::error::{Error, Result};
use crate::msg::{channel_msg, Message, MsgMask, MsgType};
use crate::scheme::SchemeRef;
use crate::stat;

use context::Context;

/// Channel life cycle. `Opening` and `Closing` may persist across many
/// `process` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Closed = 0,
    Opening = 1,
    Active = 2,
    Error = 3,
    Closing = 4,
    Destroy = 5,
}

impl State {
    pub fn from_u8(v: u8) -> State {
        match v {
            1 => State::Opening,
            2 => State::Active,
            3 => State::Error,
            4 => State::Closing,
            5 => State::Destroy,
            _ => State::Closed,
        }
    }
}

bitflags! {
    /// Immutable capability bits, set at init.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Caps: u32 {
        const INPUT = 1 << 0;
        const OUTPUT = 1 << 1;
        const INOUT = Self::INPUT.bits() | Self::OUTPUT.bits();
        /// Internal channel: kept out of the context name index/config.
        const CUSTOM = 1 << 2;
    }
}

bitflags! {
    /// Mutable driver capabilities: runtime scheduling hints consumed by
    /// the event loop.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DCaps: u32 {
        const PROCESS = 1 << 0;
        const PENDING = 1 << 1;
        const SUSPEND = 1 << 2;
        const SUSPEND_PERMANENT = 1 << 3;
        const POLLIN = 1 << 4;
        const POLLOUT = 1 << 5;
        const POLLMASK = Self::POLLIN.bits() | Self::POLLOUT.bits();
    }
}

impl DCaps {
    /// Whether the loop should invoke `process`.
    pub fn need_process(self) -> bool {
        self.intersects(DCaps::PROCESS | DCaps::PENDING) && !self.contains(DCaps::SUSPEND)
    }
}

/// Subscriber interface. Implementations are registered as
/// `Arc<dyn ChannelCallback>`; the Arc identity doubles as the
/// subscription key, so adding the same object twice only widens its
/// mask.
pub trait ChannelCallback: Send + Sync {
    fn message(&self, msg: &Message<'_>);
}

/// Blanket adapter so plain closures subscribe directly.
pub struct CallbackFn<F: Fn(&Message<'_>) + Send + Sync>(pub F);

impl<F: Fn(&Message<'_>) + Send + Sync> ChannelCallback for CallbackFn<F> {
    fn message(&self, msg: &Message<'_>) {
        self.0(msg)
    }
}

#[derive(Clone)]
struct CbPair {
    cb: Arc<dyn ChannelCallback>,
    mask: MsgMask,
}

#[derive(Default)]
struct CbTable {
    entries: Vec<CbPair>,
}

impl CbTable {
    fn add(&mut self, cb: &Arc<dyn ChannelCallback>, mask: MsgMask) {
        for entry in &mut self.entries {
            if Arc::ptr_eq(&entry.cb, cb) {
                entry.mask |= mask;
                return;
            }
        }
        self.entries.push(CbPair { cb: cb.clone(), mask });
    }

    fn del(&mut self, cb: &Arc<dyn ChannelCallback>, mask: MsgMask) -> Result<()> {
        for entry in &mut self.entries {
            if Arc::ptr_eq(&entry.cb, cb) {
                entry.mask &= !mask;
                if entry.mask.is_empty() {
                    self.entries.retain(|e| !Arc::ptr_eq(&e.cb, cb));
                }
                return Ok(());
            }
        }
        Err(Error::NotFound("callback".into()))
    }

    /// Snapshot matching subscribers; dispatch happens outside the lock
    /// so callbacks may re-register freely.
    fn collect(&self, mask: MsgMask) -> Vec<Arc<dyn ChannelCallback>> {
        self.entries
            .iter()
            .filter(|e| e.mask.intersects(mask))
            .map(|e| e.cb.clone())
            .collect()
    }
}

struct Child {
    internal: Weak<Internal>,
}

/// Shared channel bookkeeping. Everything the callback fabric, the
/// context and parent channels need to see lives here behind fine
/// grained synchronization; the implementation state itself stays
/// exclusive to the owning handle.
pub struct Internal {
    name: String,
    state: AtomicU8,
    caps: AtomicU32,
    dcaps: AtomicU32,
    fd: AtomicI32,
    config: Config,
    stat: RwLock<Option<Arc<stat::Block>>>,
    data_cb: RwLock<CbTable>,
    cb: RwLock<CbTable>,
    children: Mutex<Vec<Child>>,
    parent: Mutex<Option<Weak<Internal>>>,
}

impl Internal {
    pub fn new(name: String, config: Config) -> Arc<Internal> {
        Arc::new(Internal {
            name,
            state: AtomicU8::new(State::Closed as u8),
            caps: AtomicU32::new(0),
            dcaps: AtomicU32::new(0),
            fd: AtomicI32::new(-1),
            config,
            stat: RwLock::new(None),
            data_cb: RwLock::new(CbTable::default()),
            cb: RwLock::new(CbTable::default()),
            children: Mutex::new(Vec::new()),
            parent: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Switch state and notify state-class subscribers.
    pub fn set_state(&self, state: State) -> State {
        let old = State::from_u8(self.state.swap(state as u8, Ordering::AcqRel));
        if old == state {
            return old;
        }
        tracing::debug!(channel = %self.name, ?old, new = ?state, "state change");
        self.callback(&Message::state(state as i32));
        old
    }

    pub fn caps(&self) -> Caps {
        Caps::from_bits_retain(self.caps.load(Ordering::Relaxed))
    }

    pub fn caps_set(&self, caps: Caps) {
        self.caps.fetch_or(caps.bits(), Ordering::Relaxed);
    }

    pub fn dcaps(&self) -> DCaps {
        DCaps::from_bits_retain(self.dcaps.load(Ordering::Acquire))
    }

    /// Update dcaps and emit a channel-class update carrying the old
    /// bits so loop adapters can diff registrations.
    pub fn dcaps_update(&self, set: DCaps, clear: DCaps) {
        let old = DCaps::from_bits_retain(
            self.dcaps.load(Ordering::Relaxed),
        );
        let new = (old | set) & !clear;
        if new == old {
            return;
        }
        self.dcaps.store(new.bits(), Ordering::Release);
        let bits = old.bits().to_le_bytes();
        self.callback(&Message::channel(channel_msg::UPDATE, &bits));
    }

    pub fn dcaps_pending(&self, pending: bool) {
        if pending {
            self.dcaps_update(DCaps::PENDING, DCaps::empty());
        } else {
            self.dcaps_update(DCaps::empty(), DCaps::PENDING);
        }
    }

    pub fn fd(&self) -> i32 {
        self.fd.load(Ordering::Relaxed)
    }

    /// Replace the polled descriptor, returning the previous one.
    pub fn update_fd(&self, fd: i32) -> i32 {
        let old = self.fd.swap(fd, Ordering::Relaxed);
        if old != fd {
            let bits = self.dcaps().bits().to_le_bytes();
            self.callback(&Message::channel(channel_msg::UPDATE, &bits));
        }
        old
    }

    pub fn stat(&self) -> Option<Arc<stat::Block>> {
        self.stat.read().unwrap().clone()
    }

    pub fn set_stat(&self, block: Arc<stat::Block>) {
        *self.stat.write().unwrap() = Some(block);
    }

    pub fn callback_add(&self, cb: &Arc<dyn ChannelCallback>, mask: MsgMask) {
        if mask.contains(MsgMask::DATA) {
            self.data_cb.write().unwrap().add(cb, MsgMask::DATA);
        }
        let rest = mask & !MsgMask::DATA;
        if !rest.is_empty() {
            self.cb.write().unwrap().add(cb, rest);
        }
    }

    pub fn callback_del(&self, cb: &Arc<dyn ChannelCallback>, mask: MsgMask) -> Result<()> {
        let mut found = false;
        if mask.contains(MsgMask::DATA) {
            found |= self.data_cb.write().unwrap().del(cb, MsgMask::DATA).is_ok();
        }
        let rest = mask & !MsgMask::DATA;
        if !rest.is_empty() {
            found |= self.cb.write().unwrap().del(cb, rest).is_ok();
        }
        if found {
            Ok(())
        } else {
            Err(Error::NotFound("callback".into()))
        }
    }

    /// Deliver a data message to the dedicated hot-path table and update
    /// rx statistics.
    pub fn callback_data(&self, msg: &Message<'_>) {
        if let Some(block) = self.stat.read().unwrap().as_ref() {
            let _ = block.update(|page| {
                page.field(0).update_int(1);
                page.field(1).update_int(msg.data.len() as i64);
            });
        }
        let targets = self.data_cb.read().unwrap().collect(MsgMask::DATA);
        for cb in targets {
            cb.message(msg);
        }
    }

    /// Deliver any message by class. Data goes through the hot path.
    pub fn callback(&self, msg: &Message<'_>) {
        if msg.msg_type == MsgType::Data {
            return self.callback_data(msg);
        }
        let targets = self.cb.read().unwrap().collect(msg.msg_type.mask());
        for cb in targets {
            cb.message(msg);
        }
    }

    /// Attach a child channel: track it, notify channel-class
    /// subscribers and publish its config under `tag` when given.
    pub fn child_add(self: &Arc<Self>, child: &Arc<Internal>, tag: Option<&str>) -> Result<()> {
        {
            let mut children = self.children.lock().unwrap();
            if children.iter().any(|c| c.internal.as_ptr() == Arc::as_ptr(child)) {
                return Err(Error::AlreadyExists(format!("child '{}'", child.name())));
            }
            children.push(Child { internal: Arc::downgrade(child) });
        }
        *child.parent.lock().unwrap() = Some(Arc::downgrade(self));
        self.callback(&Message::channel(channel_msg::ADD, child.name().as_bytes()));
        if let Some(tag) = tag.filter(|t| !t.is_empty()) {
            self.config.set_config(tag, child.config().clone());
        }
        Ok(())
    }

    pub fn child_del(&self, child: &Internal, tag: Option<&str>) -> Result<()> {
        {
            let mut children = self.children.lock().unwrap();
            let before = children.len();
            children.retain(|c| c.internal.as_ptr() != child as *const Internal);
            if children.len() == before {
                return Err(Error::NotFound(format!("child '{}'", child.name())));
            }
        }
        self.callback(&Message::channel(channel_msg::DELETE, child.name().as_bytes()));
        if let Some(tag) = tag.filter(|t| !t.is_empty()) {
            self.config.unlink(tag);
        }
        Ok(())
    }

    fn suspend_tree(&self) {
        let old = self.dcaps();
        if old.contains(DCaps::SUSPEND) {
            return;
        }
        self.dcaps_update(DCaps::SUSPEND, DCaps::empty());
        for child in self.children.lock().unwrap().iter() {
            if let Some(child) = child.internal.upgrade() {
                child.suspend_tree();
            }
        }
    }

    fn resume_tree(&self) {
        if self.dcaps().contains(DCaps::SUSPEND_PERMANENT) {
            return;
        }
        if !self.dcaps().contains(DCaps::SUSPEND) {
            return;
        }
        self.dcaps_update(DCaps::empty(), DCaps::SUSPEND);
        for child in self.children.lock().unwrap().iter() {
            if let Some(child) = child.internal.upgrade() {
                child.resume_tree();
            }
        }
    }

    /// Stop scheduling this channel and every transitive child.
    pub fn suspend(&self) {
        self.dcaps_update(DCaps::SUSPEND_PERMANENT, DCaps::empty());
        self.suspend_tree();
    }

    /// Resume this channel and children, except children pinned by their
    /// own `SUSPEND_PERMANENT`.
    pub fn resume(&self) {
        self.dcaps_update(DCaps::empty(), DCaps::SUSPEND_PERMANENT);
        self.resume_tree();
    }

    fn detach_from_parent(&self) {
        let parent = self.parent.lock().unwrap().take();
        if let Some(parent) = parent.and_then(|w| w.upgrade()) {
            let _ = parent.child_del(self, None);
        }
    }
}

/// Outcome of an implementation `init`: either done, or a request to
/// restart initialization with a different implementation.
pub enum InitOutcome {
    Ok,
    Replace(&'static ImplDesc),
}

/// Channel implementation interface. One boxed instance per channel;
/// `init` receives the shared internal and is expected to retain it
/// (via [`base::Base`]) for the later calls.
pub trait ChannelImpl: Send {
    fn init(
        &mut self,
        internal: &Arc<Internal>,
        url: &Url,
        master: Option<&Channel>,
        context: &Context,
    ) -> Result<InitOutcome>;

    fn open(&mut self, cfg: &Config) -> Result<()>;

    fn close(&mut self, force: bool) -> Result<()>;

    /// One step of progress. `Err(Again)` means nothing to do.
    fn process(&mut self) -> Result<()> {
        Err(Error::Again)
    }

    fn post(&mut self, msg: &Message<'_>) -> Result<()>;

    fn scheme(&self, msg_type: MsgType) -> Option<SchemeRef> {
        let _ = msg_type;
        None
    }

    /// Called once on destruction, after close.
    fn free(&mut self) {}

    fn as_any(&mut self) -> &mut dyn std::any::Any;
}

/// Implementation descriptor registered with the context.
pub struct ImplDesc {
    pub name: &'static str,
    pub create: fn() -> Box<dyn ChannelImpl>,
}

pub(crate) struct ChannelShared {
    pub(crate) internal: Arc<Internal>,
    pub(crate) imp: Mutex<Box<dyn ChannelImpl>>,
    pub(crate) impl_name: &'static str,
}

/// Channel handle. The handle returned by channel creation owns the
/// channel: dropping it force-closes the channel and removes it from
/// the context. Handles from [`Context::get`] are non-owning accessors.
pub struct Channel {
    pub(crate) shared: Arc<ChannelShared>,
    pub(crate) context: Context,
    pub(crate) owned: bool,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.shared.internal.name())
            .field("owned", &self.owned)
            .finish()
    }
}

impl Channel {
    pub fn name(&self) -> String {
        self.shared.internal.name().to_string()
    }

    pub fn state(&self) -> State {
        self.shared.internal.state()
    }

    pub fn caps(&self) -> Caps {
        self.shared.internal.caps()
    }

    pub fn dcaps(&self) -> DCaps {
        self.shared.internal.dcaps()
    }

    pub fn fd(&self) -> i32 {
        self.shared.internal.fd()
    }

    pub fn config(&self) -> Config {
        self.shared.internal.config().clone()
    }

    pub fn context(&self) -> Context {
        self.context.clone()
    }

    /// Name of the implementation serving this channel (after any
    /// init-replace).
    pub fn impl_name(&self) -> &'static str {
        self.shared.impl_name
    }

    pub(crate) fn internal(&self) -> &Arc<Internal> {
        &self.shared.internal
    }

    /// Open with a `key=value;key=value` parameter string.
    pub fn open(&mut self, props: &str) -> Result<()> {
        let cfg = if props.is_empty() { Config::new() } else { Url::parse_props(props)? };
        self.open_cfg(&cfg)
    }

    pub fn open_cfg(&mut self, cfg: &Config) -> Result<()> {
        self.shared.imp.lock().unwrap().open(cfg)
    }

    /// Close; without `force` the implementation may linger in `Closing`
    /// and finish over later `process` calls.
    pub fn close(&mut self, force: bool) -> Result<()> {
        self.shared.imp.lock().unwrap().close(force)
    }

    /// One processing step, gated on the `PROCESS`/`PENDING` dcaps.
    pub fn process(&mut self) -> Result<()> {
        if !self.shared.internal.dcaps().need_process() {
            return Err(Error::Again);
        }
        self.shared.imp.lock().unwrap().process()
    }

    /// Post a message; successful data posts update tx statistics.
    pub fn post(&mut self, msg: &Message<'_>) -> Result<()> {
        self.shared.imp.lock().unwrap().post(msg)?;
        if msg.msg_type == MsgType::Data {
            if let Some(block) = self.shared.internal.stat() {
                let _ = block.update(|page| {
                    page.field(2).update_int(1);
                    page.field(3).update_int(msg.data.len() as i64);
                });
            }
        }
        Ok(())
    }

    pub fn scheme(&self, msg_type: MsgType) -> Option<SchemeRef> {
        self.shared.imp.lock().unwrap().scheme(msg_type)
    }

    pub fn callback_add(&self, cb: &Arc<dyn ChannelCallback>, mask: MsgMask) {
        self.shared.internal.callback_add(cb, mask)
    }

    pub fn callback_del(&self, cb: &Arc<dyn ChannelCallback>, mask: MsgMask) -> Result<()> {
        self.shared.internal.callback_del(cb, mask)
    }

    pub fn suspend(&mut self) {
        self.shared.internal.suspend()
    }

    pub fn resume(&mut self) {
        self.shared.internal.resume()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        let internal = self.shared.internal.clone();
        let state = internal.state();
        if state != State::Destroy && state != State::Closed {
            let _ = self.shared.imp.lock().unwrap().close(true);
        }
        if let Some(block) = internal.stat() {
            let _ = self.context.stat_list().remove(&block);
        }
        self.context.forget(&internal);
        internal.detach_from_parent();
        internal.set_state(State::Destroy);
        let mut imp = self.shared.imp.lock().unwrap();
        imp.free();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dcaps_process_gate() {
        assert!(!DCaps::empty().need_process());
        assert!(DCaps::PROCESS.need_process());
        assert!(DCaps::PENDING.need_process());
        assert!(!(DCaps::PROCESS | DCaps::SUSPEND).need_process());
    }

    #[test]
    fn callback_mask_update() {
        let internal = Internal::new("test".into(), Config::new());
        let hits = Arc::new(std::sync::Mutex::new(Vec::new()));
        let h = hits.clone();
        let cb: Arc<dyn ChannelCallback> = Arc::new(CallbackFn(move |m: &Message<'_>| {
            h.lock().unwrap().push(m.msg_type);
        }));
        internal.callback_add(&cb, MsgMask::DATA | MsgMask::STATE);
        // Idempotent add widens instead of duplicating.
        internal.callback_add(&cb, MsgMask::STATE);

        internal.callback(&Message::data(1, b"x"));
        internal.callback(&Message::state(State::Active as i32));
        internal.callback(&Message::control(1, b""));
        assert_eq!(*hits.lock().unwrap(), vec![MsgType::Data, MsgType::State]);

        internal.callback_del(&cb, MsgMask::DATA).unwrap();
        internal.callback(&Message::data(1, b"x"));
        internal.callback(&Message::state(State::Closed as i32));
        assert_eq!(hits.lock().unwrap().len(), 3);
    }
}
