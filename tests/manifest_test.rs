//! Integration tests for the manifest endpoint.

mod common;

use common::{scenario_stream, TestHarness};

#[tokio::test]
async fn manifest_before_ingest_is_empty_but_valid() {
    let (_h, addr) = TestHarness::with_server(&["A"]).await;

    let resp = reqwest::get(format!("http://{addr}/")).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("application/json"));

    let manifest: serde_json::Value = serde_json::from_str(&resp.text().await.unwrap()).unwrap();
    assert_eq!(manifest["head"], 0);
    assert_eq!(manifest["epoch"], 0);
    assert_eq!(manifest["keyframes"]["A"], serde_json::json!([]));
    assert_eq!(manifest["representations"]["A"]["width"], 0);
}

#[tokio::test]
async fn manifest_headers_disable_caching_and_allow_cors() {
    let (_h, addr) = TestHarness::with_server(&["A"]).await;

    let resp = reqwest::get(format!("http://{addr}/")).await.unwrap();
    let headers = resp.headers();
    assert_eq!(
        headers.get("cache-control").unwrap(),
        "no-store, no-cache, must-revalidate, max-age=0"
    );
    assert_eq!(headers.get("expires").unwrap(), "0");
    assert_eq!(headers.get("access-control-allow-origin").unwrap(), "*");
    assert_eq!(
        headers.get("access-control-expose-headers").unwrap(),
        "Ruddr-Time"
    );
    assert_eq!(headers.get("timing-allow-origin").unwrap(), "*");
    let ruddr_time: i64 = headers
        .get("ruddr-time")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(ruddr_time > 0);
}

#[tokio::test]
async fn manifest_reflects_ingested_streams() {
    let (harness, addr) = TestHarness::with_server(&["A", "B"]).await;
    harness.feed("A", scenario_stream(10, &[1, 4, 7]));
    harness.feed("B", scenario_stream(8, &[1, 4, 7]));

    let resp = reqwest::get(format!("http://{addr}/")).await.unwrap();
    let manifest: serde_json::Value = serde_json::from_str(&resp.text().await.unwrap()).unwrap();

    // Head is the laggard: B stopped at 8.
    assert_eq!(manifest["head"], 8);

    // Start/epoch come from the first moov arrival.
    assert!(manifest["epoch"].as_u64().unwrap() > 0);

    // Discovered representation metadata.
    assert_eq!(manifest["representations"]["A"]["width"], 1280);
    assert_eq!(manifest["representations"]["A"]["height"], 720);

    // Ingester tuning is republished for controllers.
    assert_eq!(manifest["config"]["horizon"], 3);
    assert_eq!(manifest["config"]["controller_frequency"], 1);
    assert_eq!(manifest["config"]["fragment_duration"], 1);

    // Keyframe lists carry the wire shape {size, seq, pts, iframe}.
    let keyframes = manifest["keyframes"]["A"].as_array().unwrap();
    let sequences: Vec<u64> = keyframes
        .iter()
        .map(|k| k["seq"].as_u64().unwrap())
        .collect();
    assert_eq!(sequences, vec![4, 7]);
    for keyframe in keyframes {
        assert!(keyframe["size"].as_u64().unwrap() > 0);
        assert!(keyframe["iframe"].as_u64().unwrap() > 0);
        assert!(keyframe["pts"].as_f64().unwrap() > 0.0);
        assert!(keyframe.get("keyframe").is_none());
    }
}
