//! Local forwarding rule for each bridge.
//!
//! Traffic that enters and leaves through the same bridge is accepted in
//! the `filter/FORWARD` chain. The matching delete is registered as a
//! cleanup on the network, and a reload hook puts the rule back after the
//! host's packet filter has been reset.

use std::sync::Arc;

use async_trait::async_trait;
use l2bridge_common::{DriverError, DriverResult};
use l2bridge_network::{Action, PacketFilter, Table};

use crate::bridge::BridgeInterface;
use crate::config::NetworkConfiguration;
use crate::registry::BridgeNetwork;
use crate::setup::SetupStep;

/// Chain holding the forwarding rules.
pub const FORWARD_CHAIN: &str = "FORWARD";

/// Rule accepting traffic that stays on `bridge`.
#[must_use]
pub fn forwarding_rule(bridge: &str) -> Vec<String> {
    ["-i", bridge, "-o", bridge, "-j", "ACCEPT"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Install or remove the forwarding rule of `bridge`.
pub fn set_forwarding(filter: &dyn PacketFilter, bridge: &str, insert: bool) -> DriverResult<()> {
    let rule = forwarding_rule(bridge);
    if insert {
        filter
            .program_rule(Table::Filter, FORWARD_CHAIN, Action::Append, &rule)
            .map_err(|e| {
                DriverError::internal(format!("unable to setup bridge forwarding rule: {e}"))
            })
    } else {
        filter
            .program_rule(Table::Filter, FORWARD_CHAIN, Action::Delete, &rule)
            .map_err(|e| {
                DriverError::internal(format!("unable to cleanup bridge forwarding rule: {e}"))
            })
    }
}

/// Install the forwarding rule and register its removal on the network.
pub struct SetupForwardingRule {
    network: Arc<BridgeNetwork>,
    filter: Arc<dyn PacketFilter>,
}

impl SetupForwardingRule {
    /// Step for `network`.
    #[must_use]
    pub fn new(network: Arc<BridgeNetwork>, filter: Arc<dyn PacketFilter>) -> Self {
        Self { network, filter }
    }
}

#[async_trait]
impl SetupStep for SetupForwardingRule {
    fn name(&self) -> &'static str {
        "forwarding-rule"
    }

    async fn apply(
        &self,
        config: &NetworkConfiguration,
        _bridge: &mut BridgeInterface,
    ) -> DriverResult<()> {
        set_forwarding(self.filter.as_ref(), &config.bridge_name, true)
            .map_err(|e| DriverError::internal(format!("Failed to Setup IP tables: {e}")))?;

        let filter = Arc::clone(&self.filter);
        let bridge = config.bridge_name.clone();
        self.network
            .register_cleanup(Box::new(move || set_forwarding(filter.as_ref(), &bridge, false)));
        Ok(())
    }
}

/// Re-install the forwarding rule whenever the packet filter is reloaded.
pub struct SetupReloadHook {
    network: Arc<BridgeNetwork>,
    filter: Arc<dyn PacketFilter>,
}

impl SetupReloadHook {
    /// Step for `network`.
    #[must_use]
    pub fn new(network: Arc<BridgeNetwork>, filter: Arc<dyn PacketFilter>) -> Self {
        Self { network, filter }
    }
}

#[async_trait]
impl SetupStep for SetupReloadHook {
    fn name(&self) -> &'static str {
        "reload-hook"
    }

    async fn apply(
        &self,
        _config: &NetworkConfiguration,
        _bridge: &mut BridgeInterface,
    ) -> DriverResult<()> {
        // Once the network is deleted the hook does nothing.
        let network = Arc::downgrade(&self.network);
        let filter = Arc::downgrade(&self.filter);
        self.filter.on_reloaded(Arc::new(move || {
            let (Some(network), Some(filter)) = (network.upgrade(), filter.upgrade()) else {
                return;
            };
            if let Err(e) = set_forwarding(filter.as_ref(), network.bridge_name(), true) {
                tracing::warn!(
                    network = %network.id(),
                    error = %e,
                    "Failed to reapply forwarding rule after reload"
                );
            }
        }));
        Ok(())
    }
}
