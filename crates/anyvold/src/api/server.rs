//! Plugin protocol routes.

use std::sync::Arc;

use anyvol::protocol::{
    ActivateResponse, CapabilitiesResponse, CreateRequest, EmptyResponse, ErrorResponse,
    GetResponse, ListResponse, MountRequest, MountpointResponse, NameRequest, PLUGIN_CONTENT_TYPE,
    VolumeInfo,
};
use anyvol::runtime::VolumeLifecycle;
use anyvol_common::AnyvolError;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Router, routing::post};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tower_http::trace::TraceLayer;

type AppState = Arc<VolumeLifecycle>;

/// Build the router serving every plugin endpoint on GET and POST.
pub fn app(volumes: AppState) -> Router {
    Router::new()
        .route("/Plugin.Activate", post(activate).get(activate))
        .route("/VolumeDriver.Create", post(create).get(create))
        .route("/VolumeDriver.Remove", post(remove).get(remove))
        .route("/VolumeDriver.Mount", post(mount).get(mount))
        .route("/VolumeDriver.Path", post(path).get(path))
        .route("/VolumeDriver.Unmount", post(unmount).get(unmount))
        .route("/VolumeDriver.Get", post(get).get(get))
        .route("/VolumeDriver.List", post(list).get(list))
        .route(
            "/VolumeDriver.Capabilities",
            post(capabilities).get(capabilities),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(volumes)
}

/// JSON body with the plugin media type.
struct PluginJson<T>(T);

impl<T: Serialize> IntoResponse for PluginJson<T> {
    fn into_response(self) -> Response {
        match serde_json::to_vec(&self.0) {
            Ok(body) => ([(header::CONTENT_TYPE, PLUGIN_CONTENT_TYPE)], body).into_response(),
            Err(e) => ApiError(AnyvolError::from(e)).into_response(),
        }
    }
}

/// A lifecycle failure rendered as `{"message": ...}`.
struct ApiError(AnyvolError);

impl From<AnyvolError> for ApiError {
    fn from(err: AnyvolError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_client_error() {
            tracing::debug!(error = %self.0, "Rejected plugin request");
            StatusCode::BAD_REQUEST
        } else {
            tracing::error!(error = %self.0, "Plugin request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        };

        let body = serde_json::to_vec(&ErrorResponse {
            message: self.0.to_string(),
        })
        .unwrap_or_default();
        (status, [(header::CONTENT_TYPE, PLUGIN_CONTENT_TYPE)], body).into_response()
    }
}

type ApiResult<T> = Result<PluginJson<T>, ApiError>;

/// Parse a request body, treating an empty or malformed body as empty.
///
/// The runtime sends the plugin media type instead of `application/json`,
/// so axum's `Json` extractor can not be used.
fn parse<T: DeserializeOwned + Default>(body: &Bytes) -> T {
    if body.is_empty() {
        return T::default();
    }
    serde_json::from_slice(body).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Ignoring malformed request body");
        T::default()
    })
}

async fn activate() -> PluginJson<ActivateResponse> {
    PluginJson(ActivateResponse::default())
}

async fn create(State(volumes): State<AppState>, body: Bytes) -> ApiResult<EmptyResponse> {
    let req: CreateRequest = parse(&body);
    volumes.create(&req.name, req.opts.as_ref()).await?;
    Ok(PluginJson(EmptyResponse {}))
}

async fn remove(State(volumes): State<AppState>, body: Bytes) -> ApiResult<EmptyResponse> {
    let req: NameRequest = parse(&body);
    volumes.remove(&req.name).await?;
    Ok(PluginJson(EmptyResponse {}))
}

async fn mount(State(volumes): State<AppState>, body: Bytes) -> ApiResult<MountpointResponse> {
    let req: MountRequest = parse(&body);
    let mountpoint = volumes.mount(&req.name, req.id.as_deref()).await?;
    Ok(PluginJson(MountpointResponse {
        mountpoint: mountpoint.display().to_string(),
    }))
}

async fn path(State(volumes): State<AppState>, body: Bytes) -> ApiResult<MountpointResponse> {
    let req: NameRequest = parse(&body);
    let mountpoint = volumes.path(&req.name)?;
    Ok(PluginJson(MountpointResponse {
        mountpoint: mountpoint.display().to_string(),
    }))
}

async fn unmount(State(volumes): State<AppState>, body: Bytes) -> ApiResult<EmptyResponse> {
    let req: MountRequest = parse(&body);
    volumes.unmount(&req.name, req.id.as_deref()).await?;
    Ok(PluginJson(EmptyResponse {}))
}

async fn get(State(volumes): State<AppState>, body: Bytes) -> ApiResult<GetResponse> {
    let req: NameRequest = parse(&body);
    let record = volumes.get(&req.name)?;
    Ok(PluginJson(GetResponse {
        volume: VolumeInfo::from(&record),
    }))
}

async fn list(State(volumes): State<AppState>) -> PluginJson<ListResponse> {
    PluginJson(ListResponse {
        volumes: volumes.list().iter().map(VolumeInfo::from).collect(),
    })
}

async fn capabilities(State(volumes): State<AppState>) -> PluginJson<CapabilitiesResponse> {
    PluginJson(CapabilitiesResponse {
        capabilities: volumes.capabilities(),
    })
}
