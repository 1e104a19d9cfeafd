//! Integration tests for network creation and deletion.
mod common;

use std::error::Error;

use common::{Harness, ipv4, labels, options};
use l2bridge::{Configuration, EndpointInterface};
use l2bridge::firewall::forwarding_rule;
use l2bridge_common::ErrorKind;
use l2bridge_network::fake::FailPoint;
use l2bridge_network::{LinkKind, SysctlTree};
use serde_json::json;

#[test_log::test(tokio::test)]
async fn test_create_and_delete_network() -> Result<(), Box<dyn Error>> {
    let h = Harness::new();
    h.driver
        .create_network(
            "n1",
            &options(json!({})),
            &ipv4("172.18.0.0/16", Some("172.18.0.1/16")),
            &[],
        )
        .await?;

    assert_eq!(h.driver.networks(), vec!["n1"]);
    let bridge = h.links.link("br-n1").expect("bridge created");
    assert!(bridge.link.is_bridge());
    assert!(bridge.link.up);
    assert!(bridge.mac.is_some());
    assert!(h.sysctl.get_bool(&SysctlTree::disable_ipv6_param("br-n1"))?);

    let rules = h.filter.rules();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].chain, "FORWARD");
    assert_eq!(rules[0].rule, forwarding_rule("br-n1"));
    assert_eq!(h.filter.hook_count(), 1);

    h.driver.delete_network("n1").await?;
    assert!(h.driver.networks().is_empty());
    assert!(h.links.link_names().is_empty());
    assert!(h.filter.rules().is_empty());
    assert_eq!(h.links.active_contexts(), 0);
    Ok(())
}

#[tokio::test]
async fn test_empty_ipv4_pool_is_rejected() {
    let h = Harness::new();
    let err = h
        .driver
        .create_network("n1", &options(json!({})), &ipv4("0.0.0.0/0", None), &[])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);
    assert!(h.links.link_names().is_empty());
}

#[tokio::test]
async fn test_duplicate_network_is_forbidden() -> Result<(), Box<dyn Error>> {
    let h = Harness::new();
    let v4 = ipv4("172.18.0.0/16", None);
    h.driver
        .create_network("n1", &options(json!({})), &v4, &[])
        .await?;

    let err = h
        .driver
        .create_network("n1", &options(json!({})), &v4, &[])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert_eq!(err.to_string(), "network n1 exists");
    assert_eq!(h.driver.networks(), vec!["n1"]);
    Ok(())
}

#[tokio::test]
async fn test_existing_bridge_name_is_forbidden() {
    let h = Harness::new();
    h.links.insert_link("br-n1", LinkKind::Bridge);

    let err = h
        .driver
        .create_network("n1", &options(json!({})), &ipv4("172.18.0.0/16", None), &[])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert_eq!(err.to_string(), "interface with name br-n1 exists");
    assert!(h.driver.networks().is_empty());
}

#[tokio::test]
async fn test_bridge_name_from_labels() -> Result<(), Box<dyn Error>> {
    let h = Harness::new();
    h.driver
        .create_network(
            "n1",
            &labels(json!({ "com.docker.network.bridge.name": "custom0" })),
            &ipv4("172.18.0.0/16", None),
            &[],
        )
        .await?;
    assert!(h.links.has_link("custom0"));
    assert!(!h.links.has_link("br-n1"));
    Ok(())
}

#[tokio::test]
async fn test_multiple_subnets_are_forbidden() {
    let h = Harness::new();
    let mut v4 = ipv4("172.18.0.0/16", None);
    v4.extend(ipv4("172.19.0.0/16", None));

    let err = h
        .driver
        .create_network("n1", &options(json!({})), &v4, &[])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert!(h.links.link_names().is_empty());
    assert!(h.driver.networks().is_empty());
}

#[tokio::test]
async fn test_gateway_outside_pool_is_rejected() {
    let h = Harness::new();
    let err = h
        .driver
        .create_network(
            "n1",
            &options(json!({})),
            &ipv4("172.18.0.0/16", Some("10.0.0.1/8")),
            &[],
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);
    assert!(h.driver.networks().is_empty());
}

#[tokio::test]
async fn test_oversized_mtu_is_rejected_before_setup() {
    let h = Harness::new();
    let err = h
        .driver
        .create_network(
            "n1",
            &labels(json!({ "com.docker.network.driver.mtu": "5000000000" })),
            &ipv4("172.18.0.0/16", None),
            &[],
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);
    assert_eq!(err.to_string(), "invalid MTU number: 5000000000");
    assert!(h.driver.networks().is_empty());
    assert!(h.links.link_names().is_empty());
    assert!(h.filter.rules().is_empty());
}

#[tokio::test]
async fn test_failed_setup_unregisters_network() {
    let h = Harness::new();
    h.links.fail_on(FailPoint::SetUp);

    let err = h
        .driver
        .create_network("n1", &options(json!({})), &ipv4("172.18.0.0/16", None), &[])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert!(h.driver.networks().is_empty());
    assert_eq!(h.links.active_contexts(), 0);
}

#[tokio::test]
async fn test_iptables_disabled_installs_no_rule() -> Result<(), Box<dyn Error>> {
    let h = Harness::with_config(Configuration {
        enable_iptables: false,
        ..Configuration::default()
    });
    h.driver
        .create_network("n1", &options(json!({})), &ipv4("172.18.0.0/16", None), &[])
        .await?;
    assert!(h.filter.rules().is_empty());
    assert_eq!(h.filter.hook_count(), 0);

    h.driver.delete_network("n1").await?;
    assert!(h.links.link_names().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_delete_unknown_network_is_maskable() -> Result<(), Box<dyn Error>> {
    let h = Harness::new();
    h.driver
        .create_network("n1", &options(json!({})), &ipv4("172.18.0.0/16", None), &[])
        .await?;
    let links_before = h.links.link_names();
    let rules_before = h.filter.rules();

    let err = h.driver.delete_network("n2").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Maskable);
    assert_eq!(h.driver.networks(), vec!["n1"]);
    assert_eq!(h.links.link_names(), links_before);
    assert_eq!(h.filter.rules(), rules_before);
    Ok(())
}

#[tokio::test]
async fn test_delete_network_completes_when_lookups_fail() -> Result<(), Box<dyn Error>> {
    let h = Harness::new();
    h.driver
        .create_network("n1", &options(json!({})), &ipv4("172.18.0.0/16", None), &[])
        .await?;
    h.driver
        .create_endpoint("n1", "ep1", EndpointInterface::default(), None)
        .await?;

    h.links.fail_on(FailPoint::LinkByName);
    h.driver.delete_network("n1").await?;
    assert!(h.driver.networks().is_empty());
    assert!(!h.links.has_link("br-n1"));
    assert!(h.filter.rules().is_empty());
    assert_eq!(h.links.active_contexts(), 0);

    h.links.clear_failures();
    h.driver
        .create_network("n1", &options(json!({})), &ipv4("172.18.0.0/16", None), &[])
        .await?;
    assert_eq!(h.driver.networks(), vec!["n1"]);
    Ok(())
}

#[tokio::test]
async fn test_bridge_delete_failure_is_not_fatal() -> Result<(), Box<dyn Error>> {
    let h = Harness::new();
    h.driver
        .create_network("n1", &options(json!({})), &ipv4("172.18.0.0/16", None), &[])
        .await?;

    h.links.fail_on(FailPoint::DeleteLink);
    h.driver.delete_network("n1").await?;
    assert!(h.driver.networks().is_empty());
    assert!(h.filter.rules().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_reload_reapplies_forwarding_rules() -> Result<(), Box<dyn Error>> {
    let h = Harness::new();
    h.driver
        .create_network("n1", &options(json!({})), &ipv4("172.18.0.0/16", None), &[])
        .await?;
    h.driver
        .create_network("n2", &options(json!({})), &ipv4("172.19.0.0/16", None), &[])
        .await?;

    h.filter.flush();
    h.driver.filter_reloaded();
    let mut chains: Vec<_> = h.filter.rules().into_iter().map(|r| r.rule).collect();
    chains.sort();
    assert_eq!(chains, vec![forwarding_rule("br-n1"), forwarding_rule("br-n2")]);

    h.driver.delete_network("n1").await?;
    h.filter.flush();
    h.driver.filter_reloaded();
    let rules = h.filter.rules();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].rule, forwarding_rule("br-n2"));
    Ok(())
}
