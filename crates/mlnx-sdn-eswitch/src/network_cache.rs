//! Network lookup cache for interface provisioning.
//!
//! Reads are served from memory; a miss fetches the network from the
//! [`NetworkSource`] and populates the cache. `refresh` and
//! `remove_stale_networks` are meant to run periodically.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{EswitchError, Result};

/// PKEY used for networks without a segmentation id.
pub const DEFAULT_PKEY: u16 = 0x7fff;

/// The network attributes interface provisioning needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    /// Network id.
    pub id: String,
    /// Whether the network is administratively up.
    #[serde(default = "Network::default_admin_state_up")]
    pub admin_state_up: bool,
    /// Provider physical network.
    #[serde(rename = "provider:physical_network", default)]
    pub physical_network: Option<String>,
    /// Provider segmentation id (VLAN or PKEY).
    #[serde(rename = "provider:segmentation_id", default)]
    pub segmentation_id: Option<u32>,
}

impl Network {
    const fn default_admin_state_up() -> bool {
        true
    }

    /// The PKEY for this network.
    #[must_use]
    pub fn pkey(&self) -> u16 {
        segmentation_id_to_pkey(self.segmentation_id)
    }
}

/// Query passed to a [`NetworkSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkFilter {
    /// Networks with these ids.
    Ids(Vec<String>),
    /// Every network that is administratively up.
    AdminStateUp,
}

/// Where networks missing from the cache are fetched from.
pub trait NetworkSource: Send + Sync {
    /// Networks matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be queried.
    fn get_networks(&self, filter: &NetworkFilter) -> Result<Vec<Network>>;
}

impl<F> NetworkSource for F
where
    F: Fn(&NetworkFilter) -> Result<Vec<Network>> + Send + Sync,
{
    fn get_networks(&self, filter: &NetworkFilter) -> Result<Vec<Network>> {
        self(filter)
    }
}

/// Thread-safe network cache with fetch on miss.
pub struct NetworkCache<S: NetworkSource> {
    source: S,
    cache: RwLock<HashMap<String, Network>>,
}

impl<S: NetworkSource> NetworkCache<S> {
    /// Create an empty cache backed by `source`.
    #[must_use]
    pub fn new(source: S) -> Self {
        Self {
            source,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Get a network, fetching it from the source on a miss.
    ///
    /// # Errors
    ///
    /// Returns `EswitchError::NetworkNotFound` if the source does not know the
    /// network, or the source's error.
    pub fn get(&self, network_id: &str) -> Result<Network> {
        if let Some(network) = self.get_cached(network_id) {
            return Ok(network);
        }

        tracing::debug!(network_id, "Network not in cache, fetching");
        let network = self
            .source
            .get_networks(&NetworkFilter::Ids(vec![network_id.to_string()]))?
            .into_iter()
            .next()
            .ok_or_else(|| EswitchError::NetworkNotFound(network_id.to_string()))?;
        self.put(network.clone());
        Ok(network)
    }

    /// Get a network only if cached.
    #[must_use]
    pub fn get_cached(&self, network_id: &str) -> Option<Network> {
        self.cache.read().get(network_id).cloned()
    }

    /// All cached networks.
    #[must_use]
    pub fn get_all(&self) -> Vec<Network> {
        self.cache.read().values().cloned().collect()
    }

    /// Insert or replace a network.
    pub fn put(&self, network: Network) {
        self.cache.write().insert(network.id.clone(), network);
    }

    /// Remove a network from the cache.
    pub fn remove(&self, network_id: &str) -> Option<Network> {
        self.cache.write().remove(network_id)
    }

    /// Number of cached networks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    /// Check if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }

    /// Clear all cached networks.
    pub fn clear(&self) {
        self.cache.write().clear();
    }

    /// Replace the cache content with every admin-up network.
    ///
    /// # Errors
    ///
    /// Returns the source's error; the cache is left unchanged.
    pub fn refresh(&self) -> Result<()> {
        let networks = self.source.get_networks(&NetworkFilter::AdminStateUp)?;
        let mut cache = self.cache.write();
        cache.clear();
        cache.extend(networks.into_iter().map(|n| (n.id.clone(), n)));
        tracing::debug!(networks = cache.len(), "Refreshed network cache");
        Ok(())
    }

    /// Drop cached networks that are gone or no longer admin-up.
    ///
    /// # Errors
    ///
    /// Returns the source's error.
    pub fn remove_stale_networks(&self) -> Result<usize> {
        let current: HashSet<String> = self
            .source
            .get_networks(&NetworkFilter::AdminStateUp)?
            .into_iter()
            .map(|n| n.id)
            .collect();

        let mut cache = self.cache.write();
        let before = cache.len();
        cache.retain(|id, _| current.contains(id));
        let removed = before - cache.len();
        if removed > 0 {
            tracing::debug!(removed, "Removed stale networks from cache");
        }
        Ok(removed)
    }

    /// The PKEY of a network, fetching it on a miss.
    ///
    /// # Errors
    ///
    /// Returns an error if the network cannot be found.
    pub fn pkey_for_network(&self, network_id: &str) -> Result<u16> {
        Ok(self.get(network_id)?.pkey())
    }
}

/// Map a segmentation id to a PKEY. Missing, zero or out of range ids use
/// [`DEFAULT_PKEY`].
#[must_use]
pub fn segmentation_id_to_pkey(segmentation_id: Option<u32>) -> u16 {
    segmentation_id
        .and_then(|id| u16::try_from(id).ok())
        .filter(|&pkey| pkey != 0 && pkey <= DEFAULT_PKEY)
        .unwrap_or(DEFAULT_PKEY)
}
