//! Dependency index for stored entries.
//!
//! Tracks which keys hang off which base key so removing the base key can
//! cascade to every dependent record. Store mutations that touch the graph run
//! inside the index lock, so a dependent can never be linked to a base that is
//! being removed concurrently.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use super::lock::rw_write;

const SOURCE: &str = "cache::registry";

#[derive(Default)]
struct Links {
    /// Base key to every key stored with it as dependency.
    dependents: HashMap<String, HashSet<String>>,
    /// Dependent key to its single base key.
    base_of: HashMap<String, String>,
}

impl Links {
    fn detach(&mut self, dependent: &str) {
        if let Some(base) = self.base_of.remove(dependent) {
            drop_link(&mut self.dependents, &base, dependent);
        }
    }
}

/// Tracks base → dependents and dependent → base mappings.
#[derive(Default)]
pub struct DependencyIndex {
    links: RwLock<Links>,
}

impl DependencyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Link `dependent` to `base` and run `insert`, provided `base_is_live` holds.
    ///
    /// The check, the link and the insert happen under one lock, so a concurrent
    /// [`unlink`](Self::unlink) of `base` either sees the new dependent or makes
    /// this call return `false` without inserting. A dependent has exactly one
    /// base; attaching again replaces the old one.
    pub fn attach<L, I>(&self, dependent: &str, base: &str, base_is_live: L, insert: I) -> bool
    where
        L: FnOnce() -> bool,
        I: FnOnce(),
    {
        let mut links = rw_write(&self.links, SOURCE, "attach");
        if !base_is_live() {
            return false;
        }

        links.detach(dependent);
        links
            .base_of
            .insert(dependent.to_string(), base.to_string());
        links
            .dependents
            .entry(base.to_string())
            .or_default()
            .insert(dependent.to_string());
        insert();
        true
    }

    /// Detach `dependent` from its base and run `insert`, keeping its own dependents.
    pub fn detach<I>(&self, dependent: &str, insert: I)
    where
        I: FnOnce(),
    {
        let mut links = rw_write(&self.links, SOURCE, "detach");
        links.detach(dependent);
        insert();
    }

    /// Run `remove` and forget every mapping that involves `key`.
    ///
    /// Returns the keys that depended on `key`; the caller removes them.
    pub fn unlink<R>(&self, key: &str, remove: R) -> HashSet<String>
    where
        R: FnOnce(),
    {
        let mut links = rw_write(&self.links, SOURCE, "unlink");
        remove();
        links.detach(key);

        let dependents = links.dependents.remove(key).unwrap_or_default();
        for dependent in &dependents {
            links.base_of.remove(dependent);
        }
        dependents
    }
}

fn drop_link(dependents: &mut HashMap<String, HashSet<String>>, base: &str, key: &str) {
    if let Some(keys) = dependents.get_mut(base) {
        keys.remove(key);
        if keys.is_empty() {
            dependents.remove(base);
        }
    }
}
