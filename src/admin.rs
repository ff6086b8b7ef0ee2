use crate::error::RegistryError;
use crate::registry::{Registry, DEFAULT_HOST};
use log::{error, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Upper bound of host names returned by `GET /hosts`.
const HOSTS_LIMIT: usize = 1024;

/// JSON body of every admin response.
#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Status code and body of an admin response.
#[derive(Debug, PartialEq)]
pub struct AdminResponse {
    pub status: u16,
    pub body: ApiResponse,
}

impl AdminResponse {
    fn ok(message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            status: 200,
            body: ApiResponse {
                success: true,
                message: message.into(),
                data,
            },
        }
    }

    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ApiResponse {
                success: false,
                message: message.into(),
                data: None,
            },
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.body).unwrap_or_else(|e| {
            error!("Failed to encode admin response: {e}");
            r#"{"success":false,"message":"internal error"}"#.to_owned()
        })
    }
}

impl From<RegistryError> for AdminResponse {
    fn from(err: RegistryError) -> Self {
        let status = match &err {
            RegistryError::Conflict { .. } => 409,
            RegistryError::NotFound { .. } => 404,
            RegistryError::BadRequest(_) => 400,
            RegistryError::Storage(_) | RegistryError::Contended { .. } | RegistryError::Encode(_) => {
                error!("Admin request failed: {err}");
                500
            }
        };
        Self::error(status, err.to_string())
    }
}

/// Encoding failures surface as a `500` through [`RegistryError::Encode`].
fn to_value(data: impl Serialize) -> Result<Option<Value>, RegistryError> {
    Ok(Some(serde_json::to_value(data)?))
}

/// Routes one admin request against the registry.
///
/// Recognized paths:
/// * `GET /hosts`
/// * `GET /hosts/{host}/upstreams`
/// * `POST|PUT|DELETE /hosts/{host}/upstreams/{upstream}`
/// * `PUT /hosts/{host}/upstreams/{upstream}/health/{up|down}`
///
/// Registry errors are turned into error responses, never propagated.
pub fn handle(registry: &Registry, method: &str, path: &str) -> AdminResponse {
    let path = path.split_once('?').map_or(path, |(p, _)| p);
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    let method = method.to_ascii_uppercase();

    let result = match (method.as_str(), segments.as_slice()) {
        ("GET", ["hosts"]) => {
            to_value(registry.hosts(HOSTS_LIMIT)).map(|data| AdminResponse::ok("hosts", data))
        }
        ("GET", ["hosts", host, "upstreams"]) => {
            let host = if host.is_empty() { DEFAULT_HOST } else { *host };
            to_value(registry.list(host))
                .map(|data| AdminResponse::ok(format!("upstreams of host {host}"), data))
        }
        ("POST" | "PUT", ["hosts", host, "upstreams", upstream @ ..]) if upstream.len() <= 1 => {
            add(registry, host, upstream.first().copied())
        }
        ("DELETE", ["hosts", host, "upstreams", upstream @ ..]) if upstream.len() <= 1 => {
            remove(registry, host, upstream.first().copied())
        }
        ("PUT", ["hosts", host, "upstreams", upstream, "health", state]) => {
            set_health(registry, host, upstream, state)
        }
        (_, ["hosts"] | ["hosts", _, "upstreams", ..]) => {
            return AdminResponse::error(405, format!("method {method} not allowed"));
        }
        _ => return AdminResponse::error(404, format!("no route for {path}")),
    };

    result.unwrap_or_else(AdminResponse::from)
}

fn add(registry: &Registry, host: &str, upstream: Option<&str>) -> Result<AdminResponse, RegistryError> {
    let host = if host.is_empty() { DEFAULT_HOST } else { host };
    let upstream = upstream
        .filter(|u| !u.is_empty())
        .ok_or_else(|| RegistryError::BadRequest("missing upstream".into()))?;

    let record = registry.add(host, upstream)?;
    Ok(AdminResponse::ok(
        format!("upstream {upstream} added to host {host}"),
        to_value(record)?,
    ))
}

fn remove(registry: &Registry, host: &str, upstream: Option<&str>) -> Result<AdminResponse, RegistryError> {
    registry.remove(Some(host), upstream)?;
    Ok(AdminResponse::ok(
        format!("upstream {} removed from host {host}", upstream.unwrap_or_default()),
        None,
    ))
}

fn set_health(
    registry: &Registry,
    host: &str,
    upstream: &str,
    state: &str,
) -> Result<AdminResponse, RegistryError> {
    let healthy = match state {
        "up" => true,
        "down" => false,
        other => {
            return Err(RegistryError::BadRequest(format!(
                "health must be up or down, got {other:?}"
            )))
        }
    };

    let host = if host.is_empty() { DEFAULT_HOST } else { host };
    let record = registry.set_healthy(host, upstream, healthy)?;
    info!("Health of {upstream} on {host} set to {state} by admin request");
    Ok(AdminResponse::ok(
        format!("upstream {upstream} of host {host} is {state}"),
        to_value(record)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::registry;
    use crate::registry::WriteMode;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_add_remove_status_sequence() {
        let registry = registry();
        let path = "/hosts/h/upstreams/a:1";
        assert_eq!(handle(&registry, "POST", path).status, 200);
        assert_eq!(handle(&registry, "POST", path).status, 409);
        assert_eq!(handle(&registry, "DELETE", path).status, 200);
        assert_eq!(handle(&registry, "DELETE", path).status, 404);
    }

    #[test]
    fn test_add_body() {
        let registry = registry();
        let response = handle(&registry, "PUT", "/hosts/h/upstreams/10.0.0.1:80");
        assert_eq!(response.status, 200);
        assert!(response.body.success);
        assert_eq!(
            response.body.data,
            Some(json!({
                "host": "h",
                "upstream": "10.0.0.1:80",
                "healthy": true,
                "weight": 1
            }))
        );
    }

    #[test]
    fn test_conflict_message_names_upstream_and_host() {
        let registry = registry();
        handle(&registry, "POST", "/hosts/h/upstreams/a:1");
        let response = handle(&registry, "POST", "/hosts/h/upstreams/a:1");
        assert!(!response.body.success);
        assert!(response.body.message.contains("a:1"));
        assert!(response.body.message.contains(" h"));
    }

    #[test]
    fn test_add_with_empty_host_uses_default() {
        let registry = registry();
        assert_eq!(handle(&registry, "POST", "/hosts//upstreams/a:1").status, 200);
        assert_eq!(registry.healthy(DEFAULT_HOST), vec!["a:1".to_string()]);
    }

    #[test]
    fn test_missing_parts_are_bad_requests() {
        let registry = registry();
        assert_eq!(handle(&registry, "DELETE", "/hosts//upstreams/a:1").status, 400);
        assert_eq!(handle(&registry, "DELETE", "/hosts/h/upstreams/").status, 400);
        assert_eq!(handle(&registry, "DELETE", "/hosts/h/upstreams").status, 400);
        assert_eq!(handle(&registry, "POST", "/hosts/h/upstreams").status, 400);
    }

    #[test]
    fn test_storage_failure_is_500() {
        let registry = Registry::new(Arc::new(MemoryStore::with_capacity(0)), WriteMode::default());
        let response = handle(&registry, "POST", "/hosts/h/upstreams/a:1");
        assert_eq!(response.status, 500);
        assert!(!response.body.success);
    }

    #[test]
    fn test_list_and_hosts() {
        let registry = registry();
        handle(&registry, "POST", "/hosts/h/upstreams/a:1");
        handle(&registry, "POST", "/hosts/g/upstreams/b:1");

        let hosts = handle(&registry, "GET", "/hosts");
        assert_eq!(hosts.body.data, Some(json!(["g", "h"])));

        let list = handle(&registry, "GET", "/hosts/h/upstreams?verbose=1");
        assert_eq!(
            list.body.data,
            Some(json!([{"host": "h", "upstream": "a:1", "healthy": true, "weight": 1}]))
        );
    }

    #[test]
    fn test_set_health() {
        let registry = registry();
        handle(&registry, "POST", "/hosts/h/upstreams/a:1");
        assert_eq!(handle(&registry, "PUT", "/hosts/h/upstreams/a:1/health/down").status, 200);
        assert!(registry.healthy("h").is_empty());
        assert_eq!(handle(&registry, "PUT", "/hosts/h/upstreams/a:1/health/sideways").status, 400);
        assert_eq!(handle(&registry, "PUT", "/hosts/h/upstreams/b:1/health/up").status, 404);
    }

    #[test]
    fn test_unknown_routes() {
        let registry = registry();
        assert_eq!(handle(&registry, "GET", "/metrics").status, 404);
        assert_eq!(handle(&registry, "PATCH", "/hosts/h/upstreams/a:1").status, 405);
        assert_eq!(handle(&registry, "DELETE", "/hosts").status, 405);
    }

    #[test]
    fn test_response_json_omits_missing_data() {
        let response = AdminResponse::error(404, "gone");
        assert_eq!(response.to_json(), r#"{"success":false,"message":"gone"}"#);
    }

    #[test]
    fn test_unencodable_data_is_500() {
        let data = std::collections::BTreeMap::from([((1u8, 2u8), 3u8)]);
        let response = AdminResponse::from(to_value(data).unwrap_err());
        assert_eq!(response.status, 500);
        assert!(!response.body.success);
        assert!(response.body.data.is_none());
    }
}
