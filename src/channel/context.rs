// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The channel context: registry of implementations and aliases, channel
// name index, shared scheme cache and plugin module loading. Channels
// are created here: the URL's protocol resolves through the registry
// (expanding aliases, with loop detection), the implementation gets an
// init call and may redirect to another implementation once more
// (init-replace), and the finished channel is indexed, published under
// the context config and wired to the stat list.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};

use crate::config::{Config, Url};
use crate::error::{Error, Result};
use crate::msg::MsgType;
use crate::scheme::{Scheme, SchemeRef};
use crate::stat::StatList;

use super::module::{self, LoadedModule};
use super::{Channel, ChannelShared, ImplDesc, InitOutcome, Internal, State};

enum RegistryEntry {
    Impl(&'static ImplDesc),
    Alias(Url),
}

struct ContextInner {
    registry: RwLock<HashMap<String, RegistryEntry>>,
    channels: RwLock<HashMap<String, Weak<ChannelShared>>>,
    scheme_cache: RwLock<HashMap<String, SchemeRef>>,
    modules: Mutex<Vec<LoadedModule>>,
    stat_list: Arc<StatList>,
    config: Config,
    config_defaults: Config,
    noname_idx: AtomicUsize,
}

/// Shared channel context; clones refer to the same registry.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new(Config::new())
    }
}

impl Context {
    pub fn new(defaults: Config) -> Context {
        let ctx = Context {
            inner: Arc::new(ContextInner {
                registry: RwLock::new(HashMap::new()),
                channels: RwLock::new(HashMap::new()),
                scheme_cache: RwLock::new(HashMap::new()),
                modules: Mutex::new(Vec::new()),
                stat_list: Arc::new(StatList::new()),
                config: Config::new(),
                config_defaults: defaults,
                noname_idx: AtomicUsize::new(0),
            }),
        };
        for desc in [
            &super::direct::DIRECT_IMPL,
            &super::mem::MEM_IMPL,
            &super::null::NULL_IMPL,
            &super::seqcheck::SEQ_CHECK_IMPL,
            &super::zero::ZERO_IMPL,
        ] {
            let _ = ctx.register(desc);
        }
        ctx
    }

    /// Process-wide default context, built on first use.
    pub fn default_context() -> Context {
        static DEFAULT: OnceLock<Context> = OnceLock::new();
        DEFAULT.get_or_init(Context::default).clone()
    }

    /// Context-level config tree where channel configs are published.
    pub fn config(&self) -> Config {
        self.inner.config.clone()
    }

    pub fn config_defaults(&self) -> Config {
        self.inner.config_defaults.clone()
    }

    pub fn stat_list(&self) -> Arc<StatList> {
        self.inner.stat_list.clone()
    }

    /// Register an implementation, optionally under an alternate name.
    pub fn register(&self, desc: &'static ImplDesc) -> Result<()> {
        self.register_as(desc, desc.name)
    }

    pub fn register_as(&self, desc: &'static ImplDesc, name: &str) -> Result<()> {
        tracing::debug!(name, imp = desc.name, "register channel impl");
        let mut registry = self.inner.registry.write().unwrap();
        if registry.contains_key(name) {
            return Err(Error::AlreadyExists(format!("impl '{name}'")));
        }
        registry.insert(name.to_string(), RegistryEntry::Impl(desc));
        Ok(())
    }

    pub fn unregister(&self, desc: &'static ImplDesc, name: &str) -> Result<()> {
        let mut registry = self.inner.registry.write().unwrap();
        match registry.get(name) {
            None => Err(Error::NotFound(format!("impl '{name}'"))),
            Some(RegistryEntry::Alias(_)) => {
                Err(Error::InvalidArgument(format!("'{name}' is an alias, not an impl")))
            }
            Some(RegistryEntry::Impl(existing)) => {
                if !std::ptr::eq(*existing, desc) {
                    return Err(Error::InvalidArgument(format!(
                        "impl pointer mismatch for '{name}'"
                    )));
                }
                registry.remove(name);
                Ok(())
            }
        }
    }

    /// Register a URL alias. Alias URLs carry a protocol and parameters
    /// but never a host or name.
    pub fn alias_register(&self, name: &str, url: Url) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("empty alias name".into()));
        }
        for key in ["tll.host", "name"] {
            if url.get(key).map(|v| !v.is_empty()).unwrap_or(false) {
                return Err(Error::InvalidArgument(format!(
                    "alias '{name}' has non-empty field '{key}'"
                )));
            }
        }
        // The target protocol must resolve, possibly through other
        // aliases.
        let probe = url.copy();
        self.lookup(&probe)?;
        tracing::debug!(name, proto = %url.proto(), "register alias");
        let mut registry = self.inner.registry.write().unwrap();
        if registry.contains_key(name) {
            return Err(Error::AlreadyExists(format!("alias '{name}'")));
        }
        registry.insert(name.to_string(), RegistryEntry::Alias(url));
        Ok(())
    }

    pub fn alias_unregister(&self, name: &str) -> Result<()> {
        let mut registry = self.inner.registry.write().unwrap();
        match registry.get(name) {
            None => Err(Error::NotFound(format!("alias '{name}'"))),
            Some(RegistryEntry::Impl(_)) => {
                Err(Error::InvalidArgument(format!("'{name}' is an impl, not an alias")))
            }
            Some(RegistryEntry::Alias(_)) => {
                registry.remove(name);
                Ok(())
            }
        }
    }

    /// Load a plugin module: `path/name` resolves to
    /// `path/lib<name>.so`, the entry symbol contributes
    /// implementations.
    pub fn module_load(&self, path: &str, symbol: Option<&str>) -> Result<()> {
        let loaded = module::load(self, path, symbol)?;
        if let Some(loaded) = loaded {
            self.inner.modules.lock().unwrap().push(loaded);
        }
        Ok(())
    }

    /// Resolve `proto` to an implementation, expanding aliases and
    /// merging their parameters into `url`. Alias chains are cycle
    /// checked.
    pub(crate) fn lookup(&self, url: &Url) -> Result<&'static ImplDesc> {
        let registry = self.inner.registry.read().unwrap();
        let mut proto = url.proto();
        let mut seen = HashSet::new();
        loop {
            if !seen.insert(proto.clone()) {
                return Err(Error::InvalidArgument(format!(
                    "alias loop detected at '{proto}'"
                )));
            }
            let entry = match registry.get(&proto) {
                Some(entry) => entry,
                None => {
                    // Prefix channels register as `name+`.
                    let Some(sep) = proto.find('+') else {
                        return Err(Error::NotFound(format!("channel impl '{proto}'")));
                    };
                    registry
                        .get(&proto[..sep + 1])
                        .ok_or_else(|| Error::NotFound(format!("channel impl '{proto}'")))?
                }
            };
            match entry {
                RegistryEntry::Impl(desc) => return Ok(desc),
                RegistryEntry::Alias(alias) => {
                    let aproto = alias.proto();
                    tracing::debug!(alias = %aproto, proto = %proto, "expand alias");
                    let next = match proto.find('+') {
                        Some(sep) if aproto.ends_with('+') => {
                            format!("{aproto}{}", &proto[sep + 1..])
                        }
                        _ => aproto,
                    };
                    for (k, v) in alias.browse() {
                        if k == "tll.proto" || k == "tll.host" {
                            continue;
                        }
                        if url.has(&k) {
                            return Err(Error::InvalidArgument(format!(
                                "duplicate field '{k}': both in alias '{}' and in url",
                                alias.proto()
                            )));
                        }
                        url.set(&k, v);
                    }
                    url.set_proto(&next);
                    proto = next;
                }
            }
        }
    }

    /// Channel by name, as a non-owning accessor for master wiring.
    pub fn get(&self, name: &str) -> Option<Channel> {
        let shared = self.inner.channels.read().unwrap().get(name)?.upgrade()?;
        Some(Channel { shared, context: self.clone(), owned: false })
    }

    /// Create a channel from a URL string.
    pub fn channel(&self, url: &str) -> Result<Channel> {
        self.channel_url(&Url::parse(url)?, None)
    }

    /// Create a channel with an explicit master.
    pub fn channel_master(&self, url: &str, master: &Channel) -> Result<Channel> {
        self.channel_url(&Url::parse(url)?, Some(master))
    }

    pub fn channel_url(&self, url: &Url, master: Option<&Channel>) -> Result<Channel> {
        let url = url.copy();
        let mut desc = self.lookup(&url)?;

        let name = match url.get("name").filter(|n| !n.is_empty()) {
            Some(name) => name,
            None => {
                let idx = self.inner.noname_idx.fetch_add(1, Ordering::Relaxed);
                let name = format!("noname-{idx}");
                url.set("name", name.clone());
                name
            }
        };
        let internal_flag = url.get_typed("tll.internal", false)?;

        let resolved_master;
        let master = match (master, url.get("master")) {
            (Some(master), _) => Some(master),
            (None, Some(mname)) => {
                resolved_master = self.get(&mname).ok_or_else(|| {
                    Error::NotFound(format!("master '{mname}' for channel '{name}'"))
                })?;
                Some(&resolved_master)
            }
            (None, None) => None,
        };

        let mut seen: HashSet<*const ImplDesc> = HashSet::new();
        let shared = loop {
            let config = Config::new();
            config.set("url", url.to_string());
            config.set("state", "Closed");
            let internal = Internal::new(name.clone(), config);
            if internal_flag {
                internal.caps_set(super::Caps::CUSTOM);
            }
            let mut imp = (desc.create)();
            tracing::debug!(channel = %name, imp = desc.name, "initialize channel");
            match imp.init(&internal, &url, master, self) {
                Ok(InitOutcome::Ok) => {
                    break Arc::new(ChannelShared {
                        internal,
                        imp: Mutex::new(imp),
                        impl_name: desc.name,
                    })
                }
                Ok(InitOutcome::Replace(next)) => {
                    tracing::info!(channel = %name, imp = next.name, "reinitialize with different impl");
                    seen.insert(desc as *const ImplDesc);
                    if seen.contains(&(next as *const ImplDesc)) {
                        return Err(Error::InvalidArgument(format!(
                            "loop in channel '{name}' initialization at impl '{}'",
                            next.name
                        )));
                    }
                    desc = next;
                }
                Err(e) => {
                    return Err(Error::InvalidArgument(format!(
                        "failed to init channel '{name}': {e}"
                    )))
                }
            }
        };

        if !internal_flag {
            let mut channels = self.inner.channels.write().unwrap();
            if channels.get(&name).and_then(|w| w.upgrade()).is_some() {
                tracing::warn!(channel = %name, "duplicate channel name");
            } else {
                channels.insert(name.clone(), Arc::downgrade(&shared));
                self.inner.config.set_config(&name, shared.internal.config().clone());
            }
        }

        if let Some(block) = shared.internal.stat() {
            tracing::info!(channel = %name, "register channel stat");
            let _ = self.inner.stat_list.add(block);
        }

        Ok(Channel { shared, context: self.clone(), owned: true })
    }

    /// Remove a dying channel from the name index and published config.
    pub(crate) fn forget(&self, internal: &Arc<Internal>) {
        if internal.caps().contains(super::Caps::CUSTOM) {
            return;
        }
        let name = internal.name();
        let mut channels = self.inner.channels.write().unwrap();
        let same = channels
            .get(name)
            .and_then(|w| w.upgrade())
            .map(|s| Arc::ptr_eq(&s.internal, internal))
            .unwrap_or(false);
        if same {
            channels.remove(name);
            self.inner.config.unlink(name);
        }
    }

    /// Load a scheme through the shared cache. `channel://name` resolves
    /// to a live channel's data scheme; `sha256://` forms only ever hit
    /// the cache.
    pub fn scheme_load(&self, url: &str) -> Result<SchemeRef> {
        self.scheme_load_cached(url, true)
    }

    pub fn scheme_load_cached(&self, url: &str, cache: bool) -> Result<SchemeRef> {
        if let Some(name) = url.strip_prefix("channel://") {
            let channel = self
                .get(name)
                .ok_or_else(|| Error::NotFound(format!("channel '{name}' for scheme")))?;
            return channel
                .scheme(MsgType::Data)
                .ok_or_else(|| Error::NotFound(format!("channel '{name}' has no scheme")));
        }
        let hashed = url.starts_with("sha256://");
        if !cache && !hashed {
            return Ok(Arc::new(Scheme::load(url)?));
        }
        {
            let cached = self.inner.scheme_cache.read().unwrap();
            if let Some(scheme) = cached.get(url) {
                return Ok(scheme.clone());
            }
        }
        if hashed {
            return Err(Error::NotFound(format!("hashed scheme '{url}' not in cache")));
        }
        let scheme = Arc::new(Scheme::load(url)?);
        {
            let mut cached = self.inner.scheme_cache.write().unwrap();
            cached.insert(url.to_string(), scheme.clone());
            if let Ok(hash) = scheme.dump("sha256") {
                tracing::debug!(hash = %hash, "register scheme hash");
                cached.insert(hash, scheme.clone());
            }
        }
        Ok(scheme)
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        tracing::info!("destroy context");
        for module in self.modules.lock().unwrap().drain(..) {
            module.unload();
        }
    }
}

// Channels created from a context keep it alive through their handle, so
// a context never outlives its channels accidentally.
const _: fn() = || {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Context>();
};

impl Context {
    /// Force-close every channel still alive in the index. Used by
    /// embedders at shutdown; normally channels close when dropped.
    pub fn shutdown(&self) {
        let shared: Vec<Arc<ChannelShared>> = self
            .inner
            .channels
            .read()
            .unwrap()
            .values()
            .filter_map(|w| w.upgrade())
            .collect();
        for s in shared {
            let state = s.internal.state();
            if state != State::Closed && state != State::Destroy {
                let _ = s.imp.lock().unwrap().close(true);
            }
        }
    }
}
