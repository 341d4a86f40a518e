// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Configuration tree with dotted paths and subtree links, plus the URL
// syntax every channel is created from: `proto://host;key=value;a.b=c`.
// Subtrees are shared: `set_config` links a tree into another, so a
// channel's config published under the context is the same object the
// channel mutates.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};

#[derive(Default)]
struct Node {
    value: Option<String>,
    children: BTreeMap<String, Config>,
}

/// A shared string-keyed configuration tree.
///
/// Cloning a `Config` yields another handle to the same tree. Use
/// [`Config::copy`] for a deep copy.
#[derive(Clone, Default)]
pub struct Config(Arc<RwLock<Node>>);

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    fn split_first(key: &str) -> (&str, Option<&str>) {
        match key.find('.') {
            Some(idx) => (&key[..idx], Some(&key[idx + 1..])),
            None => (key, None),
        }
    }

    /// Subtree at dotted `key`, if present.
    pub fn sub(&self, key: &str) -> Option<Config> {
        let (head, rest) = Self::split_first(key);
        let node = self.0.read().unwrap();
        let child = node.children.get(head)?.clone();
        drop(node);
        match rest {
            Some(rest) => child.sub(rest),
            None => Some(child),
        }
    }

    fn sub_create(&self, key: &str) -> Config {
        let (head, rest) = Self::split_first(key);
        let child = {
            let mut node = self.0.write().unwrap();
            node.children.entry(head.to_string()).or_default().clone()
        };
        match rest {
            Some(rest) => child.sub_create(rest),
            None => child,
        }
    }

    /// Value stored at dotted `key`.
    pub fn get(&self, key: &str) -> Option<String> {
        let sub = self.sub(key)?;
        let r = sub.0.read().unwrap().value.clone();
        r
    }

    /// Value of this node itself.
    pub fn value(&self) -> Option<String> {
        self.0.read().unwrap().value.clone()
    }

    pub fn has(&self, key: &str) -> bool {
        self.sub(key).map(|s| s.0.read().unwrap().value.is_some()).unwrap_or(false)
    }

    /// Store `value` at dotted `key`, creating intermediate nodes.
    pub fn set(&self, key: &str, value: impl Into<String>) {
        let sub = self.sub_create(key);
        sub.0.write().unwrap().value = Some(value.into());
    }

    /// Link `cfg` as the subtree at `key`. The subtree is shared, not copied.
    pub fn set_config(&self, key: &str, cfg: Config) {
        let (head, rest) = Self::split_first(key);
        match rest {
            Some(rest) => self.sub_create(head).set_config(rest, cfg),
            None => {
                self.0.write().unwrap().children.insert(head.to_string(), cfg);
            }
        }
    }

    /// Drop the subtree at `key`.
    pub fn unlink(&self, key: &str) {
        let (head, rest) = Self::split_first(key);
        match rest {
            Some(rest) => {
                if let Some(sub) = self.sub(head) {
                    sub.unlink(rest);
                }
            }
            None => {
                self.0.write().unwrap().children.remove(head);
            }
        }
    }

    /// Deep copy of the tree.
    pub fn copy(&self) -> Config {
        let node = self.0.read().unwrap();
        let copy = Config::new();
        {
            let mut dst = copy.0.write().unwrap();
            dst.value = node.value.clone();
            for (k, v) in &node.children {
                dst.children.insert(k.clone(), v.copy());
            }
        }
        copy
    }

    /// All `(dotted-key, value)` pairs below this node, sorted by key.
    pub fn browse(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        self.browse_into("", &mut out);
        out
    }

    fn browse_into(&self, prefix: &str, out: &mut Vec<(String, String)>) {
        let node = self.0.read().unwrap();
        for (k, v) in &node.children {
            let key = if prefix.is_empty() { k.clone() } else { format!("{prefix}.{k}") };
            if let Some(value) = v.0.read().unwrap().value.clone() {
                out.push((key.clone(), value));
            }
            v.browse_into(&key, out);
        }
    }

    /// Merge `other` into self; existing keys are overwritten when
    /// `overwrite` is set and kept otherwise.
    pub fn merge(&self, other: &Config, overwrite: bool) {
        for (k, v) in other.browse() {
            if overwrite || !self.has(&k) {
                self.set(&k, v);
            }
        }
    }

    /// Typed getter: parse the value at `key`, falling back to `default`
    /// when the key is absent.
    pub fn get_typed<T: ConfigValue>(&self, key: &str, default: T) -> Result<T> {
        match self.get(key) {
            Some(v) => T::parse(&v)
                .ok_or_else(|| Error::InvalidArgument(format!("invalid value for '{key}': '{v}'"))),
            None => Ok(default),
        }
    }

    /// Byte size with optional `b`/`kb`/`mb`/`gb` suffix.
    pub fn get_size(&self, key: &str, default: usize) -> Result<usize> {
        match self.get(key) {
            Some(v) => parse_size(&v)
                .ok_or_else(|| Error::InvalidArgument(format!("invalid size for '{key}': '{v}'"))),
            None => Ok(default),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.browse()).finish()
    }
}

/// Values readable through [`Config::get_typed`].
pub trait ConfigValue: Sized {
    fn parse(s: &str) -> Option<Self>;
}

impl ConfigValue for bool {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "yes" | "true" | "1" | "on" => Some(true),
            "no" | "false" | "0" | "off" => Some(false),
            _ => None,
        }
    }
}

macro_rules! config_value_fromstr {
    ($($t:ty),*) => {$(
        impl ConfigValue for $t {
            fn parse(s: &str) -> Option<Self> {
                s.parse().ok()
            }
        }
    )*};
}

config_value_fromstr!(i8, i16, i32, i64, u8, u16, u32, u64, usize, f64, String, char);

/// Parse `128`, `64kb`, `16mb`, `1gb` style byte sizes.
pub fn parse_size(s: &str) -> Option<usize> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (num, suffix) = s.split_at(split);
    let base: usize = num.parse().ok()?;
    let mul = match suffix.trim() {
        "" | "b" => 1,
        "kb" => 1 << 10,
        "mb" => 1 << 20,
        "gb" => 1 << 30,
        _ => return None,
    };
    Some(base * mul)
}

/// A channel URL: a config tree with the protocol under `tll.proto` and
/// the host part under `tll.host`.
#[derive(Clone, Default, Debug)]
pub struct Url(Config);

impl Url {
    /// Parse `proto://host;key=value;a.b=c`.
    pub fn parse(s: &str) -> Result<Url> {
        let sep = s
            .find("://")
            .ok_or_else(|| Error::InvalidArgument(format!("invalid url '{s}': no :// found")))?;
        let proto = &s[..sep];
        if proto.is_empty() {
            return Err(Error::InvalidArgument(format!("invalid url '{s}': empty protocol")));
        }
        let rest = &s[sep + 3..];
        let mut parts = rest.split(';');
        let host = parts.next().unwrap_or("");

        let url = Url(Config::new());
        url.0.set("tll.proto", proto);
        url.0.set("tll.host", host);
        for kv in parts {
            if kv.is_empty() {
                continue;
            }
            let eq = kv
                .find('=')
                .ok_or_else(|| Error::InvalidArgument(format!("invalid url part '{kv}': no = found")))?;
            let (k, v) = (&kv[..eq], &kv[eq + 1..]);
            if k.is_empty() {
                return Err(Error::InvalidArgument(format!("invalid url part '{kv}': empty key")));
            }
            if url.0.has(k) {
                return Err(Error::InvalidArgument(format!("duplicate key '{k}' in url")));
            }
            url.0.set(k, v);
        }
        Ok(url)
    }

    /// Parse a bare `key=value;key=value` property string.
    pub fn parse_props(s: &str) -> Result<Config> {
        let cfg = Config::new();
        for kv in s.split(';') {
            if kv.is_empty() {
                continue;
            }
            let eq = kv
                .find('=')
                .ok_or_else(|| Error::InvalidArgument(format!("invalid property '{kv}': no = found")))?;
            cfg.set(&kv[..eq], &kv[eq + 1..]);
        }
        Ok(cfg)
    }

    pub fn from_config(cfg: Config) -> Url {
        Url(cfg)
    }

    pub fn proto(&self) -> String {
        self.0.get("tll.proto").unwrap_or_default()
    }

    pub fn set_proto(&self, proto: &str) {
        self.0.set("tll.proto", proto);
    }

    pub fn host(&self) -> String {
        self.0.get("tll.host").unwrap_or_default()
    }

    pub fn copy(&self) -> Url {
        Url(self.0.copy())
    }

    /// Render back to `proto://host;k=v` form, parameters sorted by key.
    pub fn to_string(&self) -> String {
        let mut r = format!("{}://{}", self.proto(), self.host());
        for (k, v) in self.0.browse() {
            if k == "tll.proto" || k == "tll.host" {
                continue;
            }
            r.push_str(&format!(";{k}={v}"));
        }
        r
    }
}

impl std::ops::Deref for Url {
    type Target = Config;

    fn deref(&self) -> &Config {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_paths() {
        let cfg = Config::new();
        cfg.set("a.b.c", "1");
        cfg.set("a.b.d", "2");
        assert_eq!(cfg.get("a.b.c").as_deref(), Some("1"));
        assert_eq!(cfg.sub("a.b").unwrap().get("d").as_deref(), Some("2"));
        assert!(!cfg.has("a.b"));
        assert_eq!(cfg.browse(), vec![("a.b.c".into(), "1".into()), ("a.b.d".into(), "2".into())]);

        cfg.unlink("a.b.c");
        assert!(!cfg.has("a.b.c"));
    }

    #[test]
    fn subtree_link_is_shared() {
        let root = Config::new();
        let sub = Config::new();
        sub.set("x", "1");
        root.set_config("linked", sub.clone());
        sub.set("y", "2");
        assert_eq!(root.get("linked.y").as_deref(), Some("2"));

        let copy = root.copy();
        sub.set("z", "3");
        assert!(!copy.has("linked.z"));
    }

    #[test]
    fn url_parse() {
        let url = Url::parse("mem://;size=64kb;name=m;a.b=c").unwrap();
        assert_eq!(url.proto(), "mem");
        assert_eq!(url.host(), "");
        assert_eq!(url.get("name").as_deref(), Some("m"));
        assert_eq!(url.get("a.b").as_deref(), Some("c"));
        assert_eq!(url.get_size("size", 0).unwrap(), 64 << 10);

        assert!(Url::parse("no-proto").is_err());
        assert!(Url::parse("p://;novalue").is_err());
        assert!(Url::parse("p://;a=1;a=2").is_err());
    }

    #[test]
    fn typed_getters() {
        let cfg = Url::parse_props("flag=yes;count=12;bad=x").unwrap();
        assert!(cfg.get_typed("flag", false).unwrap());
        assert_eq!(cfg.get_typed("count", 0u32).unwrap(), 12);
        assert_eq!(cfg.get_typed("missing", 7i64).unwrap(), 7);
        assert!(cfg.get_typed::<i32>("bad", 0).is_err());
    }
}
