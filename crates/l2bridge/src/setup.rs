//! Bridge setup pipeline.
//!
//! Network creation queues a list of steps that are applied in order. The
//! first failing step aborts the pipeline; steps already applied are not
//! undone here, the caller owns cleanup.

use async_trait::async_trait;
use l2bridge_common::{DriverError, DriverResult};
use l2bridge_network::{KernelLinks, MacAddress, SysctlTree};

use crate::bridge::BridgeInterface;
use crate::config::NetworkConfiguration;

/// One step of the bridge setup.
#[async_trait]
pub trait SetupStep: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Apply the step to `bridge`.
    async fn apply(
        &self,
        config: &NetworkConfiguration,
        bridge: &mut BridgeInterface,
    ) -> DriverResult<()>;
}

/// Ordered queue of setup steps for one bridge.
pub struct BridgeSetup<'a> {
    config: &'a NetworkConfiguration,
    bridge: BridgeInterface,
    steps: Vec<Box<dyn SetupStep + 'a>>,
}

impl<'a> BridgeSetup<'a> {
    /// Start an empty pipeline.
    #[must_use]
    pub fn new(config: &'a NetworkConfiguration, bridge: BridgeInterface) -> Self {
        Self {
            config,
            bridge,
            steps: Vec::new(),
        }
    }

    /// Append a step.
    pub fn queue_step(&mut self, step: impl SetupStep + 'a) {
        self.steps.push(Box::new(step));
    }

    /// Names of the queued steps, in order.
    #[must_use]
    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Apply every step in order and return the resulting bridge.
    pub async fn apply(mut self) -> DriverResult<BridgeInterface> {
        for step in &self.steps {
            tracing::debug!(
                bridge = %self.config.bridge_name,
                step = step.name(),
                "Applying bridge setup step"
            );
            step.apply(self.config, &mut self.bridge)
                .await
                .inspect_err(|e| {
                    tracing::debug!(step = step.name(), error = %e, "Bridge setup step failed");
                })?;
        }
        Ok(self.bridge)
    }
}

impl std::fmt::Debug for BridgeSetup<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeSetup")
            .field("bridge", &self.bridge)
            .field("steps", &self.step_names())
            .finish()
    }
}

/// Create the bridge device and give it a random MAC address.
#[derive(Clone, Copy)]
pub struct SetupDevice<'a> {
    links: &'a dyn KernelLinks,
}

impl<'a> SetupDevice<'a> {
    /// Step creating devices through `links`.
    pub fn new(links: &'a dyn KernelLinks) -> Self {
        Self { links }
    }
}

#[async_trait]
impl SetupStep for SetupDevice<'_> {
    fn name(&self) -> &'static str {
        "device"
    }

    async fn apply(
        &self,
        config: &NetworkConfiguration,
        bridge: &mut BridgeInterface,
    ) -> DriverResult<()> {
        let link = self.links.add_bridge(&config.bridge_name).await?;

        let mac = MacAddress::random();
        self.links.set_hardware_addr(&link, mac).await.map_err(|e| {
            DriverError::internal(format!("failed to set bridge mac-address {mac} : {e}"))
        })?;
        tracing::debug!(bridge = %config.bridge_name, %mac, "Setting bridge mac address");

        bridge.set_link(link);
        Ok(())
    }
}

/// Stop the kernel from assigning an IPv6 address to the bridge.
#[derive(Debug, Clone, Copy)]
pub struct SetupDisableIpv6<'a> {
    sysctl: &'a SysctlTree,
}

impl<'a> SetupDisableIpv6<'a> {
    /// Step writing to `sysctl`.
    #[must_use]
    pub const fn new(sysctl: &'a SysctlTree) -> Self {
        Self { sysctl }
    }
}

#[async_trait]
impl SetupStep for SetupDisableIpv6<'_> {
    fn name(&self) -> &'static str {
        "disable-ipv6"
    }

    async fn apply(
        &self,
        config: &NetworkConfiguration,
        _bridge: &mut BridgeInterface,
    ) -> DriverResult<()> {
        let param = SysctlTree::disable_ipv6_param(&config.bridge_name);
        match self.sysctl.get_bool(&param) {
            Ok(false) => {}
            Ok(true) => {
                return Err(DriverError::internal(format!(
                    "failed to read ipv6 autoconf value: already disabled on {}",
                    config.bridge_name
                )));
            }
            Err(e) => {
                return Err(DriverError::internal(format!(
                    "failed to read ipv6 autoconf value: {e}"
                )));
            }
        }
        self.sysctl
            .set_bool(&param, true)
            .map_err(|e| DriverError::internal(format!("failed to disable ipv6 autoconf: {e}")))
    }
}

/// Bring the bridge up and refresh its link state.
#[derive(Clone, Copy)]
pub struct SetupDeviceUp<'a> {
    links: &'a dyn KernelLinks,
}

impl<'a> SetupDeviceUp<'a> {
    /// Step using `links`.
    pub fn new(links: &'a dyn KernelLinks) -> Self {
        Self { links }
    }
}

#[async_trait]
impl SetupStep for SetupDeviceUp<'_> {
    fn name(&self) -> &'static str {
        "device-up"
    }

    async fn apply(
        &self,
        config: &NetworkConfiguration,
        bridge: &mut BridgeInterface,
    ) -> DriverResult<()> {
        let link = bridge.require_link()?;
        self.links.set_up(link).await.map_err(|e| {
            DriverError::internal(format!(
                "failed to set link up for {}: {e}",
                config.bridge_name
            ))
        })?;

        // Refresh the flags; failing to do so does not fail the setup.
        match self.links.link_by_name(&config.bridge_name).await {
            Ok(Some(link)) => bridge.set_link(link),
            Ok(None) => tracing::warn!(
                bridge = %config.bridge_name,
                "Bridge vanished after it was brought up"
            ),
            Err(e) => tracing::warn!(
                bridge = %config.bridge_name,
                error = %e,
                "Failed to retrieve link for interface"
            ),
        }

        match bridge.addresses(self.links).await {
            Ok((v4, v6)) => tracing::debug!(
                bridge = %config.bridge_name,
                ipv4 = v4.len(),
                ipv6 = v6.len(),
                "Bridge is up"
            ),
            Err(e) => tracing::debug!(bridge = %config.bridge_name, error = %e, "Bridge is up"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use l2bridge_network::fake::{FailPoint, FakeLinks};
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    #[async_trait]
    impl SetupStep for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn apply(
            &self,
            _config: &NetworkConfiguration,
            _bridge: &mut BridgeInterface,
        ) -> DriverResult<()> {
            self.log.lock().push(self.name);
            if self.fail {
                return Err(DriverError::internal(format!("{} failed", self.name)));
            }
            Ok(())
        }
    }

    fn config() -> NetworkConfiguration {
        NetworkConfiguration {
            id: "n1".into(),
            bridge_name: "br-n1".into(),
            ..NetworkConfiguration::default()
        }
    }

    #[tokio::test]
    async fn test_steps_run_in_order_and_stop_at_first_error() {
        let config = config();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut setup = BridgeSetup::new(&config, BridgeInterface::new("br-n1"));
        for (name, fail) in [("one", false), ("two", true), ("three", false)] {
            setup.queue_step(Recorder {
                name,
                log: Arc::clone(&log),
                fail,
            });
        }
        assert_eq!(setup.step_names(), vec!["one", "two", "three"]);

        let err = setup.apply().await.unwrap_err();
        assert_eq!(err.to_string(), "two failed");
        assert_eq!(*log.lock(), vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_device_disable_ipv6_and_up() {
        let dir = tempfile::tempdir().unwrap();
        let sysctl = SysctlTree::with_root(dir.path());
        let links = FakeLinks::with_sysctl(sysctl.clone());
        let config = config();

        let mut setup = BridgeSetup::new(&config, BridgeInterface::new("br-n1"));
        setup.queue_step(SetupDevice::new(&links));
        setup.queue_step(SetupDisableIpv6::new(&sysctl));
        setup.queue_step(SetupDeviceUp::new(&links));
        let bridge = setup.apply().await.unwrap();

        assert!(bridge.link().unwrap().up);
        let fake = links.link("br-n1").unwrap();
        assert!(fake.link.up);
        assert!(fake.mac.is_some());
        assert!(
            sysctl
                .get_bool(&SysctlTree::disable_ipv6_param("br-n1"))
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_ipv6_already_disabled_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let sysctl = SysctlTree::with_root(dir.path());
        let param = SysctlTree::disable_ipv6_param("br-n1");
        std::fs::create_dir_all(sysctl.path(&param).parent().unwrap()).unwrap();
        std::fs::write(sysctl.path(&param), "1\n").unwrap();

        let config = config();
        let mut bridge = BridgeInterface::new("br-n1");
        let step = SetupDisableIpv6::new(&sysctl);
        assert!(step.apply(&config, &mut bridge).await.is_err());
    }

    #[tokio::test]
    async fn test_unreadable_ipv6_param_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let sysctl = SysctlTree::with_root(dir.path());
        let config = config();
        let mut bridge = BridgeInterface::new("br-n1");
        assert!(
            SetupDisableIpv6::new(&sysctl)
                .apply(&config, &mut bridge)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_refresh_failure_is_not_fatal() {
        let links = FakeLinks::new();
        let config = config();
        let mut bridge = BridgeInterface::new("br-n1");
        SetupDevice::new(&links)
            .apply(&config, &mut bridge)
            .await
            .unwrap();

        links.fail_on(FailPoint::LinkByName);
        links.fail_on(FailPoint::Addresses);
        SetupDeviceUp::new(&links)
            .apply(&config, &mut bridge)
            .await
            .unwrap();
        assert!(links.link("br-n1").unwrap().link.up);
    }

    #[tokio::test]
    async fn test_device_up_without_device_fails() {
        let links = FakeLinks::new();
        let config = config();
        let mut bridge = BridgeInterface::new("br-n1");
        assert!(
            SetupDeviceUp::new(&links)
                .apply(&config, &mut bridge)
                .await
                .is_err()
        );
    }
}
