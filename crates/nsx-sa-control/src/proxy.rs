//! Discovery of the Manager proxy exposed inside the cluster.
//!
//! Workloads that cannot reach the Manager directly go through a proxy
//! published as a `LoadBalancer` service. Its ingress addresses and the two
//! proxied ports are reported in every realized CR's status.

use k8s_openapi::api::core::v1::Service;

use crate::crd::{ProxyAddress, ProxyEndpoints, ProxyPort};

/// Label carried by proxy services.
pub const PROXY_SERVICE_LABEL: &str = "mgmt-proxy.antrea-nsx.vmware.com";

/// Port forwarding the Manager REST API.
pub const REST_API_PORT: &str = "rest-api";

/// Port forwarding the Manager RPC channel.
pub const RPC_FORWARD_PORT: &str = "nsx-rpc-fwd-proxy";

const LOAD_BALANCER: &str = "LoadBalancer";

/// Collect proxy addresses and ports from labelled services.
///
/// Services that are not load balancers are ignored; no match yields an
/// empty result.
#[must_use]
pub fn discover(services: &[Service]) -> ProxyEndpoints {
    let mut endpoints = ProxyEndpoints::default();

    for service in services {
        let Some(spec) = &service.spec else { continue };
        if spec.type_.as_deref() != Some(LOAD_BALANCER) {
            continue;
        }

        let ingress = service
            .status
            .as_ref()
            .and_then(|s| s.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.as_ref());
        for entry in ingress.into_iter().flatten() {
            let address = ProxyAddress {
                ip: entry.ip.clone(),
                hostname: entry.hostname.clone(),
            };
            if !endpoints.addresses.contains(&address) {
                endpoints.addresses.push(address);
            }
        }

        for port in spec.ports.iter().flatten() {
            let Some(name) = port.name.as_deref() else { continue };
            if name != REST_API_PORT && name != RPC_FORWARD_PORT {
                continue;
            }
            let port = ProxyPort {
                name: name.to_string(),
                port: port.port,
                protocol: port.protocol.clone().unwrap_or_else(|| "TCP".to_string()),
            };
            if !endpoints.ports.contains(&port) {
                endpoints.ports.push(port);
            }
        }
    }

    endpoints
}
