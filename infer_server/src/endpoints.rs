//! HTTP endpoints.
//!
use std::{convert::Infallible, sync::Arc};

use axum::{
    body::StreamBody,
    http::header,
    response::{Html, IntoResponse},
    routing::get,
    Extension, Json, Router,
};
use cam_probe::{DeviceIndex, ProbeReport};
use serde::Serialize;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};

use crate::{BroadcastReceiver, BroadcastSender};

/// State shared by all endpoints.
pub struct AppState {
    pub raw_tx: BroadcastSender,
    pub detected_tx: BroadcastSender,
    pub device: DeviceIndex,
    pub probe_report: ProbeReport,
}

#[derive(Debug, Serialize)]
pub struct DevicesResponse {
    pub selected: DeviceIndex,
    pub probe_report: ProbeReport,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthcheck", get(healthcheck))
        .route("/devices", get(devices))
        .route("/stream", get(raw_stream))
        .route("/detect_stream", get(detect_stream))
        .layer(Extension(state))
}

pub async fn healthcheck() -> &'static str {
    "Healthy"
}

pub async fn index() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html>
<body>
    <h3>Live detection</h3>
    <img src="./detect_stream" width="100%">
</body>
</html>
"#,
    )
}

/// Probe result from startup and the device in use.
pub async fn devices(Extension(state): Extension<Arc<AppState>>) -> Json<DevicesResponse> {
    Json(DevicesResponse {
        selected: state.device,
        probe_report: state.probe_report.clone(),
    })
}

/// Camera frames as they come in.
pub async fn raw_stream(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    mjpeg_response(state.raw_tx.subscribe())
}

/// Camera frames with detections drawn on them.
pub async fn detect_stream(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    mjpeg_response(state.detected_tx.subscribe())
}

fn mjpeg_response(rx: BroadcastReceiver) -> impl IntoResponse {
    // Lagging receivers skip the frames they missed
    let stream = BroadcastStream::new(rx).filter_map(|item| item.ok().map(Ok::<_, Infallible>));

    (
        [(
            header::CONTENT_TYPE,
            "multipart/x-mixed-replace; boundary=frame",
        )],
        StreamBody::new(stream),
    )
}
