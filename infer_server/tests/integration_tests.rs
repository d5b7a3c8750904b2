use std::{net::SocketAddr, num::NonZeroUsize, sync::Arc};

use anyhow::Result;
use cam_probe::{
    probe_devices,
    sim::{SimulatedDevice, SimulatedSource},
};
use image::RgbImage;
use infer_server::{
    as_jpeg_stream_item, broadcast_channel,
    endpoints::{router, AppState},
    nn::{InferModel, UltrafaceModel, UltrafaceVariant},
    BroadcastSender,
};

struct TestServer {
    addr: SocketAddr,
    raw_tx: BroadcastSender,
    detected_tx: BroadcastSender,
}

async fn spawn_server() -> Result<TestServer> {
    let mut source = SimulatedSource::new([
        (0, SimulatedDevice::Unreadable),
        (1, SimulatedDevice::Working((1280, 720))),
    ]);
    let limit = NonZeroUsize::new(2).expect("non-zero limit");
    let probe_report = probe_devices(&mut source, limit);

    let (raw_tx, _) = broadcast_channel();
    let (detected_tx, _) = broadcast_channel();
    let app = router(Arc::new(AppState {
        raw_tx: raw_tx.clone(),
        detected_tx: detected_tx.clone(),
        device: 1,
        probe_report,
    }));

    let server = axum::Server::bind(&"127.0.0.1:0".parse()?).serve(app.into_make_service());
    let addr = server.local_addr();
    tokio::spawn(server);

    Ok(TestServer {
        addr,
        raw_tx,
        detected_tx,
    })
}

#[tokio::test]
async fn healthcheck_and_index() -> Result<()> {
    let server = spawn_server().await?;

    let body = reqwest::get(format!("http://{}/healthcheck", server.addr))
        .await?
        .text()
        .await?;
    assert_eq!(body, "Healthy");

    let body = reqwest::get(format!("http://{}/", server.addr))
        .await?
        .text()
        .await?;
    assert!(body.contains("detect_stream"));

    Ok(())
}

#[tokio::test]
async fn devices_lists_probe_report() -> Result<()> {
    let server = spawn_server().await?;

    let body = reqwest::get(format!("http://{}/devices", server.addr))
        .await?
        .text()
        .await?;
    let json: serde_json::Value = serde_json::from_str(&body)?;

    assert_eq!(json["selected"], 1);
    assert_eq!(json["probe_report"]["available_ports"], serde_json::json!([0, 1]));
    assert_eq!(json["probe_report"]["working_ports"], serde_json::json!([1]));
    assert_eq!(json["probe_report"]["non_working_ports"], serde_json::json!([2, 3]));
    assert_eq!(json["probe_report"]["results"][0]["status"], "present_unreadable");

    Ok(())
}

#[tokio::test]
async fn streams_broadcast_frames_as_multipart() -> Result<()> {
    let server = spawn_server().await?;

    for (path, tx) in [
        ("stream", &server.raw_tx),
        ("detect_stream", &server.detected_tx),
    ] {
        let mut resp = reqwest::get(format!("http://{}/{}", server.addr, path)).await?;
        assert_eq!(
            resp.headers()[reqwest::header::CONTENT_TYPE],
            "multipart/x-mixed-replace; boundary=frame"
        );

        // The handler subscribed before the response headers were sent
        tx.send(as_jpeg_stream_item(b"jpeg bytes"))?;

        let chunk = resp.chunk().await?.expect("stream item");
        assert!(chunk.starts_with(b"--frame\r\n"));
    }

    Ok(())
}

/// Needs network access to download the model.
#[tokio::test]
#[ignore]
async fn ultraface_finds_nothing_on_blank_image() -> Result<()> {
    let model = UltrafaceModel::new(UltrafaceVariant::W320H240, 0.5, 0.7).await?;

    let detections = model.run(&RgbImage::new(640, 480))?;

    assert!(detections.is_empty());
    Ok(())
}
