//! Plugin protocol messages.
//!
//! Field names follow the remote network driver protocol, so every struct
//! is renamed to `PascalCase` and the id fields keep their `ID` spelling.

use l2bridge::{InterfaceName, JoinInfo, Options, RawEndpointInterface, RawIpamData};
use serde::{Deserialize, Serialize};

/// Media type of every plugin response.
pub const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1.2+json";

/// `Plugin.Activate` response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActivateResponse {
    pub implements: Vec<String>,
}

/// `NetworkDriver.GetCapabilities` response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CapabilitiesResponse {
    pub scope: String,
    pub connectivity_scope: String,
}

impl CapabilitiesResponse {
    /// Capabilities of a host-local driver.
    pub fn local() -> Self {
        Self {
            scope: "local".into(),
            connectivity_scope: "local".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateNetworkRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(default)]
    pub options: Option<Options>,
    #[serde(default, rename = "IPv4Data")]
    pub ipv4_data: Option<Vec<RawIpamData>>,
    #[serde(default, rename = "IPv6Data")]
    pub ipv6_data: Option<Vec<RawIpamData>>,
}

/// Any request that only names a network.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
}

/// Any request that names an endpoint of a network.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateEndpointRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
    #[serde(default)]
    pub interface: Option<RawEndpointInterface>,
    #[serde(default)]
    pub options: Option<Options>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateEndpointResponse {
    pub interface: RawEndpointInterface,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JoinRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
    #[serde(default)]
    pub sandbox_key: String,
    #[serde(default)]
    pub options: Option<Options>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireInterfaceName {
    pub src_name: String,
    pub dst_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct JoinResponse {
    pub interface_name: WireInterfaceName,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub gateway: String,
    #[serde(rename = "GatewayIPv6", skip_serializing_if = "String::is_empty")]
    pub gateway_ipv6: String,
    pub disable_gateway_service: bool,
}

impl From<InterfaceName> for WireInterfaceName {
    fn from(name: InterfaceName) -> Self {
        Self {
            src_name: name.src_name,
            dst_prefix: name.dst_prefix,
        }
    }
}

impl From<JoinInfo> for JoinResponse {
    fn from(info: JoinInfo) -> Self {
        Self {
            interface_name: info.interface_name.into(),
            gateway: info.gateway.map(|gw| gw.to_string()).unwrap_or_default(),
            gateway_ipv6: info.gateway_ipv6.map(|gw| gw.to_string()).unwrap_or_default(),
            disable_gateway_service: info.disable_gateway_service,
        }
    }
}

/// Error body; the runtime reads the message from `Err`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    #[serde(rename = "Err")]
    pub err: String,
}
