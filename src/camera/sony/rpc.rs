use crate::error::RpcError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Request ids are shared by every session in the process and never reused.
static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_request_id() -> u64 {
    REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// Device error code the long-poll returns when nothing changed in time
const ERROR_CODE_TIMEOUT: i64 = 2;

pub const DEFAULT_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub service_type: String,
    pub base_url: String,
}

impl ServiceDescriptor {
    pub fn new(service_type: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            service_type: service_type.into(),
            base_url: base_url.into(),
        }
    }
}

/// Service types advertised by one device, fixed for the lifetime of a session
#[derive(Debug, Clone)]
pub struct ServiceDirectory {
    services: Arc<[ServiceDescriptor]>,
}

impl ServiceDirectory {
    pub fn new(services: Vec<ServiceDescriptor>) -> Self {
        Self {
            services: services.into(),
        }
    }

    pub fn resolve(&self, service_type: &str) -> Result<&ServiceDescriptor, RpcError> {
        self.services
            .iter()
            .find(|s| s.service_type == service_type)
            .ok_or_else(|| RpcError::ServiceNotFound {
                service: service_type.to_string(),
                available: self.service_types(),
            })
    }

    pub fn service_types(&self) -> Vec<String> {
        self.services
            .iter()
            .map(|s| s.service_type.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    method: &'a str,
    params: &'a [Value],
    id: u64,
    version: &'a str,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Vec<Value>>,
    #[serde(default)]
    error: Option<Value>,
}

/// JSON-RPC style transport to the services of one camera
#[derive(Debug, Clone)]
pub struct CameraProxy {
    client: reqwest::Client,
    directory: ServiceDirectory,
}

impl CameraProxy {
    /// `client` should carry a timeout longer than the device's long-poll
    pub fn new(client: reqwest::Client, directory: ServiceDirectory) -> Self {
        Self { client, directory }
    }

    pub fn directory(&self) -> &ServiceDirectory {
        &self.directory
    }

    /// Call `method` on `service_type` and return the unwrapped result array
    pub async fn call(
        &self,
        service_type: &str,
        method: &str,
        params: Vec<Value>,
        version: &str,
    ) -> Result<Vec<Value>, RpcError> {
        let url = self.directory.resolve(service_type)?.base_url.clone();
        let request = RpcRequest {
            method,
            params: &params,
            id: next_request_id(),
            version,
        };
        trace!("RPC {} #{} -> {}", method, request.id, url);

        let params_text = || Value::Array(params.clone()).to_string();
        let transport_error = |source: reqwest::Error| {
            if source.is_timeout() {
                RpcError::Timeout {
                    url: url.clone(),
                    method: method.to_string(),
                }
            } else {
                RpcError::Transport {
                    url: url.clone(),
                    method: method.to_string(),
                    params: params_text(),
                    source,
                }
            }
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(&transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(&transport_error)?;

        let reply: RpcResponse =
            serde_json::from_str(&body).map_err(|e| RpcError::MalformedResponse {
                url: url.clone(),
                method: method.to_string(),
                details: format!("HTTP {}: {}", status, e),
            })?;

        if let Some(error) = reply.error {
            if is_timeout_error(&error) {
                return Err(RpcError::Timeout {
                    url,
                    method: method.to_string(),
                });
            }
            debug!("RPC {} returned error {}", method, error);
            return Err(RpcError::Protocol {
                url,
                method: method.to_string(),
                params: params_text(),
                payload: error.to_string(),
            });
        }

        reply.result.ok_or_else(|| RpcError::MalformedResponse {
            url,
            method: method.to_string(),
            details: "response carries neither result nor error".to_string(),
        })
    }
}

/// Errors are `[code, message]`
fn is_timeout_error(error: &Value) -> bool {
    error
        .get(0)
        .and_then(Value::as_i64)
        .is_some_and(|code| code == ERROR_CODE_TIMEOUT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn directory() -> ServiceDirectory {
        ServiceDirectory::new(vec![ServiceDescriptor::new(
            "camera",
            "http://192.168.122.1:8080/sony/camera",
        )])
    }

    #[test]
    fn test_request_ids_strictly_increase() {
        let ids: Vec<u64> = (0..100).map(|_| next_request_id()).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_request_ids_unique_across_threads() {
        let handles: Vec<_> = (0..4)
            .map(|_| std::thread::spawn(|| (0..250).map(|_| next_request_id()).collect::<Vec<_>>()))
            .collect();

        let mut ids: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), total);
    }

    #[test]
    fn test_resolve_service() {
        let directory = directory();
        let service = directory.resolve("camera").unwrap();
        assert_eq!(service.base_url, "http://192.168.122.1:8080/sony/camera");
    }

    #[tokio::test]
    async fn test_unknown_service_lists_available() {
        let proxy = CameraProxy::new(reqwest::Client::new(), directory());

        let error = proxy
            .call("avContent", "getContentList", vec![], DEFAULT_VERSION)
            .await
            .unwrap_err();

        match error {
            RpcError::ServiceNotFound { service, available } => {
                assert_eq!(service, "avContent");
                assert_eq!(available, vec!["camera".to_string()]);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_timeout_error_code() {
        assert!(is_timeout_error(&json!([2, "Timeout"])));
        assert!(!is_timeout_error(&json!([1, "Any"])));
        assert!(!is_timeout_error(&json!("Timed out")));
    }

    #[test]
    fn test_request_body_shape() {
        let params = vec![json!(true)];
        let request = RpcRequest {
            method: "getEvent",
            params: &params,
            id: 7,
            version: "1.3",
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"method": "getEvent", "params": [true], "id": 7, "version": "1.3"})
        );
    }
}
