// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Per-client program cache fed by the helper.
//!
//! Entries are stored under `"<prefix>:<key>"` where the prefix is a digest of
//! the product and the driver the helper reported, so binaries compiled by a
//! different driver are never offered back to a helper.

use std::collections::{BTreeMap, HashMap};

use sha2::{Digest, Sha256};

use crate::config::ShaderCacheConfig;
use crate::ids::{ClientId, HelperInfo};

/// Programs cached for one client, keyed by prefixed key.
#[derive(Debug, Default)]
pub struct ShaderCache {
    entries: BTreeMap<String, String>,
}

impl ShaderCache {
    /// Get a stored program by its prefixed key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Number of stored programs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Caches for every client with a channel on one helper.
#[derive(Debug)]
pub struct ShaderCaches {
    config: ShaderCacheConfig,
    prefix: Option<String>,
    clients: HashMap<ClientId, ShaderCache>,
}

impl ShaderCaches {
    pub fn new(config: ShaderCacheConfig) -> Self {
        Self {
            config,
            prefix: None,
            clients: HashMap::new(),
        }
    }

    /// Open a cache for `client_id` unless caching is disabled. Existing
    /// entries are kept.
    pub fn create_for_client(&mut self, client_id: ClientId) {
        if !self.config.enabled {
            return;
        }
        self.clients.entry(client_id).or_default();
    }

    /// Drop the cache of `client_id`. Returns false if it had none.
    pub fn remove_client(&mut self, client_id: ClientId) -> bool {
        let removed = self.clients.remove(&client_id).is_some();
        if removed {
            tracing::debug!("[RenderHost] Dropped shader cache for {}", client_id);
        }
        removed
    }

    /// Derive the prefix from the driver the helper reported.
    pub fn set_helper_info(&mut self, info: &HelperInfo) {
        let mut hasher = Sha256::new();
        for part in [
            self.config.product.as_str(),
            info.gl_vendor.as_str(),
            info.gl_renderer.as_str(),
            info.driver_version.as_str(),
            info.driver_vendor.as_str(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update(b"-");
        }
        self.prefix = Some(format!("{:x}", hasher.finalize()));
    }

    /// Digest of the product and driver, once the helper reported them.
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Store a program for `client_id` and return the prefixed key it was
    /// stored under. Ignored for clients without a cache and before the
    /// helper has reported its driver.
    pub fn cache(&mut self, client_id: ClientId, key: &str, data: String) -> Option<String> {
        let Some(prefix) = self.prefix.as_deref() else {
            tracing::debug!("[RenderHost] Shader for {} arrived before initialization", client_id);
            return None;
        };
        let cache = self.clients.get_mut(&client_id)?;
        let stored_key = format!("{}:{}", prefix, key);
        cache.entries.insert(stored_key.clone(), data);
        Some(stored_key)
    }

    /// Whether `key` was stored under the current driver's prefix.
    pub fn matches_prefix(&self, key: &str) -> bool {
        match self.prefix.as_deref() {
            Some(prefix) => key
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with(':')),
            None => false,
        }
    }

    /// Get the cache of `client_id`, if it has one.
    pub fn client(&self, client_id: ClientId) -> Option<&ShaderCache> {
        self.clients.get(&client_id)
    }

    /// Number of clients with an open cache.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}
