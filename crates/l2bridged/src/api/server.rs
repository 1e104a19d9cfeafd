//! HTTP surface of the plugin.
//!
//! Every plugin method is a `POST /<Method>` with a JSON body. Requests are
//! decoded here and handed to the [`BridgeDriver`]; errors are returned as
//! `{"Err": "..."}` with status 500.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use l2bridge::ipam::parse_ipam_data;
use l2bridge::{BridgeDriver, EndpointInterface};
use l2bridge_common::{DriverError, DriverResult, ErrorKind};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;

use super::types::{
    ActivateResponse, CapabilitiesResponse, CreateEndpointRequest, CreateEndpointResponse,
    CreateNetworkRequest, EndpointRequest, ErrorResponse, JoinRequest, JoinResponse,
    NetworkRequest, PLUGIN_CONTENT_TYPE,
};

/// Build the plugin router over `driver`.
pub fn app(driver: Arc<BridgeDriver>) -> Router {
    Router::new()
        .route("/{method}", post(handle))
        .layer(TraceLayer::new_for_http())
        .with_state(driver)
}

async fn handle(
    State(driver): State<Arc<BridgeDriver>>,
    Path(method): Path<String>,
    body: Bytes,
) -> Response {
    let result = dispatch(&driver, &method, &body).await;
    log_request(&method, &body, &result);

    let content_type = [(header::CONTENT_TYPE, PLUGIN_CONTENT_TYPE)];
    match result {
        Ok(value) => (StatusCode::OK, content_type, Json(value)).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            content_type,
            Json(ErrorResponse { err: e.to_string() }),
        )
            .into_response(),
    }
}

/// Run one plugin method and return its JSON response.
pub async fn dispatch(driver: &BridgeDriver, method: &str, body: &[u8]) -> DriverResult<Value> {
    match method {
        "Plugin.Activate" => to_value(&ActivateResponse {
            implements: vec!["NetworkDriver".into()],
        }),
        "NetworkDriver.GetCapabilities" => to_value(&CapabilitiesResponse::local()),
        "NetworkDriver.CreateNetwork" => {
            let req: CreateNetworkRequest = decode(body)?;
            let ipv4 = parse_ipam_data(req.ipv4_data.as_deref().unwrap_or_default(), "IPv4")?;
            let ipv6 = parse_ipam_data(req.ipv6_data.as_deref().unwrap_or_default(), "IPv6")?;
            driver
                .create_network(&req.network_id, &req.options.unwrap_or_default(), &ipv4, &ipv6)
                .await?;
            Ok(json!({}))
        }
        "NetworkDriver.DeleteNetwork" => {
            let req: NetworkRequest = decode(body)?;
            driver.delete_network(&req.network_id).await?;
            Ok(json!({}))
        }
        "NetworkDriver.CreateEndpoint" => {
            let req: CreateEndpointRequest = decode(body)?;
            let iface = match &req.interface {
                Some(raw) => EndpointInterface::parse(raw)?,
                None => EndpointInterface::default(),
            };
            let out = driver
                .create_endpoint(&req.network_id, &req.endpoint_id, iface, req.options.as_ref())
                .await?;
            to_value(&CreateEndpointResponse {
                interface: out.to_raw(),
            })
        }
        "NetworkDriver.DeleteEndpoint" => {
            let req: EndpointRequest = decode(body)?;
            driver.delete_endpoint(&req.network_id, &req.endpoint_id).await?;
            Ok(json!({}))
        }
        "NetworkDriver.Join" => {
            let req: JoinRequest = decode(body)?;
            let info = driver.join(
                &req.network_id,
                &req.endpoint_id,
                &req.sandbox_key,
                req.options.as_ref(),
            )?;
            to_value(&JoinResponse::from(info))
        }
        "NetworkDriver.Leave" => {
            let req: EndpointRequest = decode(body)?;
            driver.leave(&req.network_id, &req.endpoint_id)?;
            Ok(json!({}))
        }
        "NetworkDriver.DiscoverNew" | "NetworkDriver.DiscoverDelete" => Ok(json!({})),
        "NetworkDriver.AllocateNetwork"
        | "NetworkDriver.FreeNetwork"
        | "NetworkDriver.EndpointOperInfo"
        | "NetworkDriver.ProgramExternalConnectivity"
        | "NetworkDriver.RevokeExternalConnectivity" => {
            Err(DriverError::not_implemented("not implemented"))
        }
        other => Err(DriverError::not_implemented(format!(
            "unknown plugin method {other}"
        ))),
    }
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> DriverResult<T> {
    Ok(serde_json::from_slice(body)?)
}

fn to_value<T: serde::Serialize>(value: &T) -> DriverResult<Value> {
    serde_json::to_value(value)
        .map_err(|e| DriverError::internal(format!("failed to encode response: {e}")))
}

/// Log a finished call at a level chosen by its error classification.
fn log_request(method: &str, body: &[u8], result: &DriverResult<Value>) {
    let request = String::from_utf8_lossy(body);
    let err = match result {
        Ok(response) => {
            tracing::info!(method, %request, %response, "Plugin call");
            return;
        }
        Err(e) => e,
    };

    let kind = err.kind();
    match kind {
        ErrorKind::Maskable | ErrorKind::Retry => {
            tracing::info!(method, %request, error = %err, kind = %kind, "Plugin call failed");
        }
        ErrorKind::BadRequest
        | ErrorKind::NotFound
        | ErrorKind::Forbidden
        | ErrorKind::NoService
        | ErrorKind::NotImplemented => {
            tracing::warn!(method, %request, error = %err, kind = %kind, "Plugin call failed");
        }
        ErrorKind::Timeout | ErrorKind::Internal => {
            tracing::error!(method, %request, error = %err, kind = %kind, "Plugin call failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use l2bridge::Configuration;
    use l2bridge_network::SysctlTree;
    use l2bridge_network::fake::{FakeLinks, RecordingFilter};
    use tempfile::TempDir;

    struct Fixture {
        driver: BridgeDriver,
        links: Arc<FakeLinks>,
        _root: TempDir,
    }

    fn fixture() -> Fixture {
        let root = TempDir::new().unwrap();
        let sysctl = SysctlTree::with_root(root.path());
        let links = Arc::new(FakeLinks::with_sysctl(sysctl.clone()));
        let driver = BridgeDriver::new(
            Configuration::default(),
            links.clone(),
            Arc::new(RecordingFilter::new()),
            sysctl,
        );
        Fixture {
            driver,
            links,
            _root: root,
        }
    }

    async fn call(f: &Fixture, method: &str, body: Value) -> DriverResult<Value> {
        dispatch(&f.driver, method, body.to_string().as_bytes()).await
    }

    #[tokio::test]
    async fn test_handshake() {
        let f = fixture();
        assert_eq!(
            call(&f, "Plugin.Activate", json!({})).await.unwrap(),
            json!({ "Implements": ["NetworkDriver"] })
        );
        assert_eq!(
            call(&f, "NetworkDriver.GetCapabilities", json!({}))
                .await
                .unwrap(),
            json!({ "Scope": "local", "ConnectivityScope": "local" })
        );
    }

    #[tokio::test]
    async fn test_full_plugin_flow() {
        let f = fixture();
        call(
            &f,
            "NetworkDriver.CreateNetwork",
            json!({
                "NetworkID": "n1",
                "Options": { "com.docker.network.generic": { "l2bridge.name": "l2br0" } },
                "IPv4Data": [{
                    "AddressSpace": "LocalDefault",
                    "Pool": "172.18.0.0/16",
                    "Gateway": "172.18.0.1/16",
                    "AuxAddresses": { "DefaultGatewayIPv4": "172.18.0.254/16" }
                }],
                "IPv6Data": null
            }),
        )
        .await
        .unwrap();
        assert!(f.links.has_link("l2br0"));

        let created = call(
            &f,
            "NetworkDriver.CreateEndpoint",
            json!({
                "NetworkID": "n1",
                "EndpointID": "ep1",
                "Interface": { "Address": "172.18.0.2/16", "AddressIPv6": "", "MacAddress": "" },
                "Options": {}
            }),
        )
        .await
        .unwrap();
        assert_eq!(
            created,
            json!({ "Interface": { "MacAddress": "02:42:ac:12:00:02" } })
        );

        let joined = call(
            &f,
            "NetworkDriver.Join",
            json!({ "NetworkID": "n1", "EndpointID": "ep1", "SandboxKey": "/var/run/netns/x" }),
        )
        .await
        .unwrap();
        assert_eq!(joined["Gateway"], "172.18.0.254");
        assert_eq!(joined["InterfaceName"]["DstPrefix"], "eth");
        assert_eq!(joined["DisableGatewayService"], false);
        assert!(joined.get("GatewayIPv6").is_none());

        let ids = json!({ "NetworkID": "n1", "EndpointID": "ep1" });
        call(&f, "NetworkDriver.Leave", ids.clone()).await.unwrap();
        call(&f, "NetworkDriver.DeleteEndpoint", ids).await.unwrap();
        call(&f, "NetworkDriver.DeleteNetwork", json!({ "NetworkID": "n1" }))
            .await
            .unwrap();
        assert!(f.links.link_names().is_empty());
    }

    #[tokio::test]
    async fn test_error_classification() {
        let f = fixture();

        let err = call(&f, "NetworkDriver.AllocateNetwork", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotImplemented);

        let err = call(&f, "NetworkDriver.DeleteNetwork", json!({ "NetworkID": "nope" }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Maskable);

        let err = dispatch(&f.driver, "NetworkDriver.CreateNetwork", b"{not json")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);

        let err = call(
            &f,
            "NetworkDriver.CreateNetwork",
            json!({ "NetworkID": "n1", "IPv4Data": [{ "Pool": "172.18.0.0" }] }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert!(err.to_string().starts_with("invalid IPv4 information"));
    }

    #[tokio::test]
    async fn test_discovery_is_a_no_op() {
        let f = fixture();
        let res = call(&f, "NetworkDriver.DiscoverNew", json!({ "DiscoveryType": 1 }))
            .await
            .unwrap();
        assert_eq!(res, json!({}));
    }
}
