//! Docker volume plugin protocol.
//!
//! Maps `/Plugin.Activate` and `/VolumeDriver.*` requests onto the
//! [`VolumeDriver`] and renders its results as plugin JSON. Failures are
//! returned as HTTP 500 with the error's display text in `Err`.

use bytes::Bytes;
use chrono::SecondsFormat;
use glustervol_kernel::{PluginError, VolumeDriver, VolumeInfo, VolumeStatus, VolumeSummary};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, warn};

use http::header::{CONTENT_TYPE, HeaderValue};
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;

use crate::constants::{IMPLEMENTS, MAX_BODY_SIZE, PLUGIN_CONTENT_TYPE};

/// Response sent back over the plugin socket.
pub type PluginResponse = Response<Full<Bytes>>;

/// Plugin endpoints, keyed by request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum Endpoint {
    #[strum(serialize = "/Plugin.Activate")]
    Activate,
    #[strum(serialize = "/VolumeDriver.Create")]
    Create,
    #[strum(serialize = "/VolumeDriver.Remove")]
    Remove,
    #[strum(serialize = "/VolumeDriver.Mount")]
    Mount,
    #[strum(serialize = "/VolumeDriver.Unmount")]
    Unmount,
    #[strum(serialize = "/VolumeDriver.Path")]
    Path,
    #[strum(serialize = "/VolumeDriver.Get")]
    Get,
    #[strum(serialize = "/VolumeDriver.List")]
    List,
    #[strum(serialize = "/VolumeDriver.Capabilities")]
    Capabilities,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateRequest {
    name: String,
    #[serde(default)]
    opts: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NameRequest {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MountRequest {
    name: String,
    #[serde(rename = "ID")]
    id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ActivateResponse {
    implements: &'static [&'static str],
}

#[derive(Debug, Serialize)]
struct EmptyResponse {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorResponse {
    err: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct MountpointResponse {
    mountpoint: PathBuf,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct VolumeBody {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    mountpoint: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<VolumeStatus>,
}

impl From<VolumeInfo> for VolumeBody {
    fn from(info: VolumeInfo) -> Self {
        Self {
            name: info.name,
            mountpoint: info.mountpoint,
            created_at: Some(info.created_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
            status: info.status,
        }
    }
}

impl From<VolumeSummary> for VolumeBody {
    fn from(summary: VolumeSummary) -> Self {
        Self {
            name: summary.name,
            mountpoint: summary.mountpoint,
            created_at: None,
            status: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetResponse {
    volume: VolumeBody,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ListResponse {
    volumes: Vec<VolumeBody>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ScopeBody {
    scope: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CapabilitiesResponse {
    capabilities: ScopeBody,
}

/// A request the protocol layer refused before reaching the driver.
enum Rejection {
    BadJson(serde_json::Error),
    Driver(PluginError),
}

impl From<PluginError> for Rejection {
    fn from(err: PluginError) -> Self {
        Self::Driver(err)
    }
}

fn respond(status: StatusCode, body: Vec<u8>) -> PluginResponse {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(PLUGIN_CONTENT_TYPE));
    response
}

fn json<T: Serialize>(status: StatusCode, value: &T) -> PluginResponse {
    match serde_json::to_vec(value) {
        Ok(body) => respond(status, body),
        Err(e) => {
            warn!(error = %e, "Failed to encode response");
            respond(
                StatusCode::INTERNAL_SERVER_ERROR,
                br#"{"Err":"failed to encode response"}"#.to_vec(),
            )
        }
    }
}

/// Error response with `message` in `Err`.
fn error_response(status: StatusCode, message: impl Into<String>) -> PluginResponse {
    json(status, &ErrorResponse { err: message.into() })
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T, Rejection> {
    serde_json::from_slice(body).map_err(Rejection::BadJson)
}

/// Serve one HTTP request from the plugin socket.
///
/// Only `POST` is accepted. Bodies over [`MAX_BODY_SIZE`] get 413, either
/// up front from the declared length or once the limit is hit while reading.
pub async fn handle_request<B>(driver: &VolumeDriver, request: Request<B>) -> PluginResponse
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = request.into_parts();
    if parts.method != Method::POST {
        return error_response(
            StatusCode::METHOD_NOT_ALLOWED,
            format!("method {} not allowed", parts.method),
        );
    }

    if body.size_hint().lower() > MAX_BODY_SIZE as u64 {
        return too_large();
    }
    let body = match Limited::new(body, MAX_BODY_SIZE).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.is::<LengthLimitError>() => return too_large(),
        Err(e) => {
            debug!(error = %e, "Failed to read request body");
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("failed to read request body: {e}"),
            );
        }
    };

    dispatch(driver, parts.uri.path(), &body).await
}

fn too_large() -> PluginResponse {
    error_response(
        StatusCode::PAYLOAD_TOO_LARGE,
        format!("request body exceeds {MAX_BODY_SIZE} bytes"),
    )
}

/// Handle one request for `path` with JSON `body`.
pub async fn dispatch(driver: &VolumeDriver, path: &str, body: &[u8]) -> PluginResponse {
    let Ok(endpoint) = Endpoint::from_str(path) else {
        debug!(path, "Unknown plugin endpoint");
        return error_response(StatusCode::NOT_FOUND, format!("unknown endpoint: {path}"));
    };

    match handle(driver, endpoint, body).await {
        Ok(response) => response,
        Err(Rejection::BadJson(e)) => {
            debug!(%endpoint, error = %e, "Bad request body");
            error_response(StatusCode::BAD_REQUEST, format!("invalid request body: {e}"))
        }
        Err(Rejection::Driver(e)) => {
            warn!(%endpoint, error = %e, "Request failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn handle(
    driver: &VolumeDriver,
    endpoint: Endpoint,
    body: &[u8],
) -> Result<PluginResponse, Rejection> {
    let ok = StatusCode::OK;
    let response = match endpoint {
        Endpoint::Activate => json(ok, &ActivateResponse { implements: IMPLEMENTS }),
        Endpoint::Create => {
            let req: CreateRequest = parse(body)?;
            driver
                .create(&req.name, &req.opts.unwrap_or_default())
                .await?;
            json(ok, &EmptyResponse {})
        }
        Endpoint::Remove => {
            let req: NameRequest = parse(body)?;
            driver.remove(&req.name).await?;
            json(ok, &EmptyResponse {})
        }
        Endpoint::Mount => {
            let req: MountRequest = parse(body)?;
            let mountpoint = driver.mount(&req.name, &req.id).await?;
            json(ok, &MountpointResponse { mountpoint })
        }
        Endpoint::Unmount => {
            let req: MountRequest = parse(body)?;
            driver.unmount(&req.name, &req.id).await?;
            json(ok, &EmptyResponse {})
        }
        Endpoint::Path => {
            let req: NameRequest = parse(body)?;
            let mountpoint = driver.path(&req.name).await?;
            json(ok, &MountpointResponse { mountpoint })
        }
        Endpoint::Get => {
            let req: NameRequest = parse(body)?;
            let info = driver.get(&req.name).await?;
            json(ok, &GetResponse { volume: info.into() })
        }
        Endpoint::List => {
            let volumes = driver.list().await?;
            json(
                ok,
                &ListResponse {
                    volumes: volumes.into_iter().map(VolumeBody::from).collect(),
                },
            )
        }
        Endpoint::Capabilities => json(
            ok,
            &CapabilitiesResponse {
                capabilities: ScopeBody {
                    scope: driver.capabilities().to_string(),
                },
            },
        ),
    };
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glustervol_kernel::{MemoryConnector, RecordingExecutor};
    use serde_json::{Value, json as j};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup() -> (VolumeDriver, TempDir) {
        let dir = TempDir::new().unwrap();
        let driver = VolumeDriver::new(
            dir.path().join("volumes"),
            Arc::new(MemoryConnector::new().with_dir("vol1")),
            Arc::new(RecordingExecutor::new()),
        );
        (driver, dir)
    }

    fn post(path: &str, body: impl Into<Bytes>) -> Request<Full<Bytes>> {
        Request::builder()
            .method(Method::POST)
            .uri(path)
            .body(Full::new(body.into()))
            .unwrap()
    }

    async fn read(response: PluginResponse) -> (StatusCode, Value) {
        let status = response.status();
        assert_eq!(response.headers()[CONTENT_TYPE], PLUGIN_CONTENT_TYPE);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn call(driver: &VolumeDriver, path: &str, body: Value) -> (StatusCode, Value) {
        read(handle_request(driver, post(path, body.to_string())).await).await
    }

    #[tokio::test]
    async fn test_activate() {
        let (driver, _dir) = setup();
        let (status, body) = call(&driver, "/Plugin.Activate", j!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, j!({"Implements": ["VolumeDriver"]}));
    }

    #[tokio::test]
    async fn test_mount_path_get_unmount() {
        let (driver, dir) = setup();
        let expected = dir.path().join("volumes/vol1");

        let (status, body) = call(&driver, "/VolumeDriver.Mount", j!({"Name": "vol1", "ID": "c1"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["Mountpoint"], j!(expected));

        let (_, body) = call(&driver, "/VolumeDriver.Path", j!({"Name": "vol1"})).await;
        assert_eq!(body["Mountpoint"], j!(expected));

        let (_, body) = call(&driver, "/VolumeDriver.Get", j!({"Name": "vol1"})).await;
        assert_eq!(body["Volume"]["Name"], "vol1");
        assert_eq!(body["Volume"]["Status"], j!({"connections": 1, "clients": 1}));
        assert!(body["Volume"]["CreatedAt"].as_str().unwrap().ends_with('Z'));

        let (status, body) = call(&driver, "/VolumeDriver.Unmount", j!({"Name": "vol1", "ID": "c1"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, j!({}));
    }

    #[tokio::test]
    async fn test_errors_are_500_with_err() {
        let (driver, _dir) = setup();
        let (status, body) = call(&driver, "/VolumeDriver.Unmount", j!({"Name": "vol1", "ID": "c1"})).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["Err"], "volume not found in active mounts: vol1");

        let (status, body) = call(&driver, "/VolumeDriver.Path", j!({"Name": "vol1"})).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["Err"], "volume is not mounted: vol1");
    }

    #[tokio::test]
    async fn test_create_list_with_null_opts() {
        let (driver, _dir) = setup();
        let (status, _) = call(&driver, "/VolumeDriver.Create", j!({"Name": "vol2", "Opts": null})).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(&driver, "/VolumeDriver.List", j!({})).await;
        assert_eq!(body, j!({"Volumes": [{"Name": "vol1"}, {"Name": "vol2"}]}));
    }

    #[tokio::test]
    async fn test_capabilities() {
        let (driver, _dir) = setup();
        let (_, body) = call(&driver, "/VolumeDriver.Capabilities", j!({})).await;
        assert_eq!(body, j!({"Capabilities": {"Scope": "global"}}));
    }

    #[tokio::test]
    async fn test_bad_json_and_unknown_path() {
        let (driver, _dir) = setup();

        let response = dispatch(&driver, "/VolumeDriver.Mount", b"{not json").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let (status, _) = call(&driver, "/VolumeDriver.Mount", j!({"Name": "vol1"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(&driver, "/VolumeDriver.Frobnicate", j!({})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["Err"].as_str().unwrap().contains("Frobnicate"));
    }

    #[tokio::test]
    async fn test_only_post_is_served() {
        let (driver, _dir) = setup();
        let request = Request::builder()
            .method(Method::GET)
            .uri("/Plugin.Activate")
            .body(Full::new(Bytes::new()))
            .unwrap();

        let (status, body) = read(handle_request(&driver, request).await).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body["Err"], "method GET not allowed");
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let (driver, _dir) = setup();
        let body = vec![b' '; MAX_BODY_SIZE + 1];

        let (status, body) = read(handle_request(&driver, post("/VolumeDriver.Create", body)).await).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(body["Err"].as_str().unwrap().contains("exceeds"));
        assert!(driver.list().await.unwrap().iter().all(|v| v.name != "vol2"));
    }

    #[tokio::test]
    async fn test_body_at_limit_is_accepted() {
        let (driver, _dir) = setup();
        let json = j!({"Name": "vol2"}).to_string();
        let mut body = json.into_bytes();
        body.resize(MAX_BODY_SIZE, b' ');

        let (status, _) = read(handle_request(&driver, post("/VolumeDriver.Create", body)).await).await;
        assert_eq!(status, StatusCode::OK);
    }
}
