//! Shared fixtures for the driver integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use l2bridge::{BridgeDriver, Configuration, IpamData, Options, RawIpamData};
use l2bridge_network::SysctlTree;
use l2bridge_network::fake::{FakeLinks, RecordingFilter};
use serde_json::{Value, json};
use tempfile::TempDir;

/// A driver wired to in-memory kernel fakes.
pub struct Harness {
    pub driver: Arc<BridgeDriver>,
    pub links: Arc<FakeLinks>,
    pub filter: Arc<RecordingFilter>,
    pub sysctl: SysctlTree,
    _root: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Configuration::default())
    }

    pub fn with_config(config: Configuration) -> Self {
        let root = TempDir::new().expect("tempdir");
        let sysctl = SysctlTree::with_root(root.path());
        let links = Arc::new(FakeLinks::with_sysctl(sysctl.clone()));
        let filter = Arc::new(RecordingFilter::new());
        let driver = Arc::new(BridgeDriver::new(
            config,
            links.clone(),
            filter.clone(),
            sysctl.clone(),
        ));
        Self {
            driver,
            links,
            filter,
            sysctl,
            _root: root,
        }
    }
}

pub fn options(value: Value) -> Options {
    value.as_object().cloned().unwrap_or_default()
}

/// Options carrying `labels` as generic data.
pub fn labels(labels: Value) -> Options {
    options(json!({ "com.docker.network.generic": labels }))
}

pub fn ipam(pool: &str, gateway: Option<&str>, aux_key: &str) -> IpamData {
    let aux = gateway.map(|gw| {
        let mut map = serde_json::Map::new();
        map.insert(aux_key.to_string(), Value::String(gw.to_string()));
        map
    });
    IpamData::parse(&RawIpamData {
        pool: pool.to_string(),
        aux_addresses: aux,
        ..RawIpamData::default()
    })
    .expect("valid ipam data")
}

pub fn ipv4(pool: &str, gateway: Option<&str>) -> Vec<IpamData> {
    vec![ipam(pool, gateway, "DefaultGatewayIPv4")]
}

pub fn ipv6(pool: &str) -> Vec<IpamData> {
    vec![ipam(pool, None, "DefaultGatewayIPv6")]
}
