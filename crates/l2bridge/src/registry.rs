//! In-memory registry of networks and their endpoints.
//!
//! Two lock levels exist: the registry map and each network's own state.
//! Callers take the registry lock only to fetch or swap an
//! `Arc<BridgeNetwork>`, release it, and only then lock the network. Neither
//! lock is ever held across an `.await`.

use std::collections::HashMap;
use std::sync::Arc;

use l2bridge_common::{DriverError, DriverResult};
use l2bridge_network::TransportPort;
use parking_lot::Mutex;

use crate::bridge::BridgeInterface;
use crate::config::NetworkConfiguration;
use crate::endpoint::BridgeEndpoint;

/// Teardown action registered by a network, run when it is deleted.
pub type CleanupFn = Box<dyn Fn() -> DriverResult<()> + Send + Sync>;

/// The set of networks known to the driver.
#[derive(Debug, Default)]
pub struct NetworkRegistry {
    networks: Mutex<HashMap<String, Arc<BridgeNetwork>>>,
}

impl NetworkRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a network.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<BridgeNetwork>> {
        self.networks.lock().get(id).cloned()
    }

    /// Whether a network is registered under `id`.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.networks.lock().contains_key(id)
    }

    /// Register a network. Returns `false` when the id is already taken.
    pub fn insert_if_absent(&self, network: Arc<BridgeNetwork>) -> bool {
        let mut networks = self.networks.lock();
        if networks.contains_key(network.id()) {
            return false;
        }
        networks.insert(network.id().to_string(), network);
        true
    }

    /// Remove a network.
    pub fn remove(&self, id: &str) -> Option<Arc<BridgeNetwork>> {
        self.networks.lock().remove(id)
    }

    /// Remove `network` only if it is still the registered instance.
    pub fn remove_if_same(&self, network: &Arc<BridgeNetwork>) -> bool {
        let mut networks = self.networks.lock();
        match networks.get(network.id()) {
            Some(current) if Arc::ptr_eq(current, network) => {
                networks.remove(network.id());
                true
            }
            _ => false,
        }
    }

    /// Snapshot of the registered network ids, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.networks.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of registered networks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.networks.lock().len()
    }

    /// Whether no network is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.networks.lock().is_empty()
    }
}

struct NetworkState {
    bridge: BridgeInterface,
    endpoints: HashMap<String, BridgeEndpoint>,
    cleanup_funcs: Vec<CleanupFn>,
}

/// A bridge network and the endpoints attached to it.
pub struct BridgeNetwork {
    id: String,
    config: Arc<NetworkConfiguration>,
    state: Mutex<NetworkState>,
}

impl BridgeNetwork {
    /// Create a network with no endpoints.
    #[must_use]
    pub fn new(config: NetworkConfiguration, bridge: BridgeInterface) -> Self {
        Self {
            id: config.id.clone(),
            config: Arc::new(config),
            state: Mutex::new(NetworkState {
                bridge,
                endpoints: HashMap::new(),
                cleanup_funcs: Vec::new(),
            }),
        }
    }

    /// Network id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The network's immutable configuration.
    #[must_use]
    pub fn config(&self) -> Arc<NetworkConfiguration> {
        Arc::clone(&self.config)
    }

    /// Name of the network's bridge device.
    #[must_use]
    pub fn bridge_name(&self) -> &str {
        &self.config.bridge_name
    }

    /// Snapshot of the bridge device.
    #[must_use]
    pub fn bridge(&self) -> BridgeInterface {
        self.state.lock().bridge.clone()
    }

    /// Replace the bridge device snapshot.
    pub fn set_bridge(&self, bridge: BridgeInterface) {
        self.state.lock().bridge = bridge;
    }

    /// Fetch an endpoint. `Ok(None)` when the id is unknown.
    pub fn endpoint(&self, eid: &str) -> DriverResult<Option<BridgeEndpoint>> {
        if eid.is_empty() {
            return Err(DriverError::invalid_endpoint_id(eid));
        }
        Ok(self.state.lock().endpoints.get(eid).cloned())
    }

    /// Fetch an endpoint that must exist.
    pub fn require_endpoint(&self, eid: &str) -> DriverResult<BridgeEndpoint> {
        self.endpoint(eid)?
            .ok_or_else(|| DriverError::endpoint_not_found(eid))
    }

    /// Add an endpoint record, failing if the id is already present.
    pub fn insert_endpoint(&self, endpoint: BridgeEndpoint) -> DriverResult<()> {
        let mut state = self.state.lock();
        if state.endpoints.contains_key(&endpoint.id) {
            return Err(DriverError::endpoint_exists(&endpoint.id));
        }
        state.endpoints.insert(endpoint.id.clone(), endpoint);
        Ok(())
    }

    /// Replace the record of an endpoint that is still present.
    pub fn update_endpoint(&self, endpoint: BridgeEndpoint) -> DriverResult<()> {
        let mut state = self.state.lock();
        match state.endpoints.get_mut(&endpoint.id) {
            Some(slot) => {
                *slot = endpoint;
                Ok(())
            }
            None => Err(DriverError::internal(format!(
                "endpoint {} was removed while it was being created",
                endpoint.id
            ))),
        }
    }

    /// Remove an endpoint record.
    pub fn remove_endpoint(&self, eid: &str) -> Option<BridgeEndpoint> {
        self.state.lock().endpoints.remove(eid)
    }

    /// Record the exposed ports of an endpoint.
    pub fn set_exposed_ports(&self, eid: &str, ports: Vec<TransportPort>) -> bool {
        match self.state.lock().endpoints.get_mut(eid) {
            Some(endpoint) => {
                endpoint.exposed_ports = Some(ports);
                true
            }
            None => false,
        }
    }

    /// Snapshot of every endpoint.
    #[must_use]
    pub fn endpoints(&self) -> Vec<BridgeEndpoint> {
        self.state.lock().endpoints.values().cloned().collect()
    }

    /// Number of endpoints.
    #[must_use]
    pub fn endpoint_count(&self) -> usize {
        self.state.lock().endpoints.len()
    }

    /// Register a teardown action.
    pub fn register_cleanup(&self, cleanup: CleanupFn) {
        self.state.lock().cleanup_funcs.push(cleanup);
    }

    /// Take every registered teardown action.
    pub fn take_cleanups(&self) -> Vec<CleanupFn> {
        std::mem::take(&mut self.state.lock().cleanup_funcs)
    }
}

impl std::fmt::Debug for BridgeNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BridgeNetwork")
            .field("id", &self.id)
            .field("bridge", &state.bridge)
            .field("endpoints", &state.endpoints.len())
            .field("cleanup_funcs", &state.cleanup_funcs.len())
            .finish()
    }
}
