//! Integration tests for rusle-sl API endpoints

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use rusle_sl::services::BoundaryCatalog;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use helpers::{square_polygon, test_app, test_config, test_state, ComputeMode, ScriptedCompute};

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(body).unwrap()))
        .unwrap()
}

async fn upload_square(app: &Router, size_deg: f64) -> String {
    let (status, json) = send(
        app,
        post_json("/upload?filename=field.geojson", &square_polygon(36.0, -1.5, size_deg)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", json);
    json["session_id"].as_str().unwrap().to_string()
}

async fn wait_for_state(app: &Router, job_id: &str, wanted: &str) -> Value {
    for _ in 0..500 {
        let (status, json) = send(app, get(&format!("/process/{}", job_id))).await;
        assert_eq!(status, StatusCode::OK);
        if json["state"] == wanted {
            return json;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} never reached {}", job_id, wanted);
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = test_app(Arc::new(ScriptedCompute::healthy()));
    let (status, json) = send(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["module"], "rusle-sl");
    assert_eq!(json["jobs"], 0);
}

#[tokio::test]
async fn test_upload_preview_and_delete() {
    let app = test_app(Arc::new(ScriptedCompute::healthy()));
    let session_id = upload_square(&app, 0.35).await;

    let (status, feature) = send(&app, get(&format!("/upload/{}/preview", session_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(feature["type"], "Feature");
    assert_eq!(feature["geometry"]["type"], "Polygon");
    assert_eq!(feature["properties"]["source"]["filename"], "field.geojson");

    let delete = Request::builder()
        .method("DELETE")
        .uri(format!("/upload/{}", session_id))
        .body(Body::empty())
        .unwrap();
    let (status, json) = send(&app, delete).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["removed"], true);

    let (status, _) = send(&app, get(&format!("/upload/{}/preview", session_id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upload_rejects_open_ring() {
    let app = test_app(Arc::new(ScriptedCompute::healthy()));
    let open = json!({
        "type": "Polygon",
        "coordinates": [[[36.0, -1.5], [36.3, -1.5], [36.3, -1.2], [36.0, -1.2]]]
    });

    let (status, json) = send(&app, post_json("/upload", &open)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "INVALID_GEOMETRY");
}

#[tokio::test]
async fn test_upload_over_area_limit() {
    let app = test_app(Arc::new(ScriptedCompute::healthy()));
    let (status, json) = send(&app, post_json("/upload", &square_polygon(20.0, 0.0, 4.1))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "AREA_TOO_LARGE");
}

#[tokio::test]
async fn test_upload_body_limit() {
    let mut config = test_config();
    config.limits.max_upload_size_mb = 0;
    let app = rusle_sl::build_router(test_state(
        config,
        BoundaryCatalog::empty(),
        Arc::new(ScriptedCompute::healthy()),
    ));

    let (status, json) = send(&app, post_json("/upload", &square_polygon(36.0, -1.5, 0.1))).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(json["error"]["code"], "PAYLOAD_TOO_LARGE");
}

#[tokio::test]
async fn test_process_to_completion() {
    let app = test_app(Arc::new(ScriptedCompute::healthy()));
    let session_id = upload_square(&app, 0.35).await;

    let (status, json) = send(
        &app,
        post_json(
            "/process",
            &json!({
                "session_id": session_id,
                "date_from": "2022-01-01",
                "date_to": "2023-01-01",
                "scale": 90
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED, "{}", json);
    assert_eq!(json["factors"].as_array().unwrap().len(), 5);
    assert_eq!(json["factors"][0]["factor"], "R");
    assert_eq!(json["factors"][0]["source"], "derived");
    let job_id = json["job_id"].as_str().unwrap().to_string();

    let job = wait_for_state(&app, &job_id, "COMPLETED").await;
    assert_eq!(job["export_scale_m"], 90);

    let (status, stats) = send(&app, get(&format!("/process/{}/statistics", job_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(stats["mean"].as_f64().unwrap() >= 0.0);
    assert_eq!(stats["unit"], "t/ha/yr");

    let (status, tiles) = send(&app, get(&format!("/process/{}/tiles", job_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(tiles["soil_loss"]["url_template"].as_str().unwrap().contains("{z}"));
    for factor in ["R", "K", "LS", "C", "P"] {
        assert!(tiles["factors"][factor]["url_template"].is_string(), "{}", factor);
    }

    let (status, map) = send(&app, get(&format!("/visualize/{}", job_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(map["layers"].as_array().unwrap().len(), 6);
    assert!(map["zoom"].as_u64().unwrap() >= 2);
}

#[tokio::test]
async fn test_results_conflict_until_completed() {
    let app = test_app(Arc::new(ScriptedCompute::new(ComputeMode::HangTiles)));
    let session_id = upload_square(&app, 0.35).await;

    let (_, json) = send(
        &app,
        post_json(
            "/process",
            &json!({"session_id": session_id, "date_from": "2022-01-01", "date_to": "2023-01-01"}),
        ),
    )
    .await;
    let job_id = json["job_id"].as_str().unwrap().to_string();
    wait_for_state(&app, &job_id, "RUNNING").await;

    for path in ["statistics", "tiles"] {
        let (status, json) = send(&app, get(&format!("/process/{}/{}", job_id, path))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["error"]["code"], "JOB_NOT_READY");
    }
    let (status, json) = send(&app, post_json(&format!("/process/{}/export", job_id), &json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"]["code"], "JOB_NOT_READY");

    let (status, json) = send(&app, post_json(&format!("/process/{}/cancel", job_id), &json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "FAILED");
    assert_eq!(json["error"]["kind"], "CANCELLED");
}

#[tokio::test]
async fn test_process_validation_errors() {
    let app = test_app(Arc::new(ScriptedCompute::healthy()));
    let session_id = upload_square(&app, 0.2).await;

    let (status, json) = send(
        &app,
        post_json(
            "/process",
            &json!({"session_id": session_id, "date_from": "2023-01-01", "date_to": "2022-01-01"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "VALIDATION_ERROR");

    let (status, json) = send(
        &app,
        post_json(
            "/process",
            &json!({"session_id": session_id, "overrides": {"K": {"asset_id": "users/lab/k"}}}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "MISSING_DATE_RANGE");

    let (status, json) = send(&app, post_json("/process", &json!({"date_from": "2022-01-01"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "VALIDATION_ERROR");

    let (_, health) = send(&app, get("/health")).await;
    assert_eq!(health["jobs"], 0);
}

#[tokio::test]
async fn test_unknown_ids_are_not_found() {
    let app = test_app(Arc::new(ScriptedCompute::healthy()));
    let id = uuid::Uuid::new_v4();

    for uri in [
        format!("/process/{}", id),
        format!("/export/{}", id),
        format!("/visualize/{}", id),
    ] {
        let (status, json) = send(&app, get(&uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
        assert_eq!(json["error"]["code"], "NOT_FOUND");
    }

    let (status, _) = send(
        &app,
        post_json("/process", &json!({"session_id": id, "date_from": "2022-01-01", "date_to": "2023-01-01"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_region_export_flow() {
    let catalog = BoundaryCatalog::from_geojson(json!({
        "type": "FeatureCollection",
        "features": [{
            "type": "Feature",
            "geometry": square_polygon(29.0, -2.5, 1.0),
            "properties": {"ADM0_NAME": "Rwanda"}
        }]
    }))
    .unwrap();
    let app = rusle_sl::build_router(test_state(
        test_config(),
        catalog,
        Arc::new(ScriptedCompute::healthy()),
    ));

    let (status, json) = send(
        &app,
        post_json(
            "/process",
            &json!({
                "admin_region": {"name": "rwanda", "level": 0},
                "date_from": "2022-01-01",
                "date_to": "2023-01-01",
                "scale": 30,
                "dem_source": "MERIT"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED, "{}", json);
    assert_eq!(json["export_scale_m"], 250);
    assert_eq!(json["scale_adjusted"], true);
    assert!(json["message"].as_str().unwrap().contains("raised"));
    let job_id = json["job_id"].as_str().unwrap().to_string();

    wait_for_state(&app, &job_id, "COMPLETED").await;

    let (status, export) = send(
        &app,
        post_json(&format!("/process/{}/export", job_id), &json!({"destination": "rwanda_runs"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(export["state"], "QUEUED");
    assert_eq!(export["destination"], "rwanda_runs");

    let (status, again) = send(&app, post_json(&format!("/process/{}/export", job_id), &json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(again["error"]["code"], "EXPORT_IN_PROGRESS");

    let export_id = export["export_id"].as_str().unwrap();
    let (_, polled) = send(&app, get(&format!("/export/{}", export_id))).await;
    assert_eq!(polled["state"], "RUNNING");
    let (_, polled) = send(&app, get(&format!("/export/{}", export_id))).await;
    assert_eq!(polled["state"], "COMPLETED");
}

#[tokio::test]
async fn test_unknown_admin_region() {
    let app = test_app(Arc::new(ScriptedCompute::healthy()));
    let (status, json) = send(
        &app,
        post_json(
            "/process",
            &json!({"admin_region": {"name": "Atlantis", "level": 1}, "date_from": "2022-01-01", "date_to": "2023-01-01"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"]["message"].as_str().unwrap().contains("Atlantis"));
}

#[tokio::test]
async fn test_health_degrades_after_failed_job() {
    let state = test_state(
        test_config(),
        BoundaryCatalog::empty(),
        Arc::new(ScriptedCompute::new(ComputeMode::RejectExpressions)),
    );
    let tracker = rusle_sl::api::spawn_error_tracker(state.clone());
    let app = rusle_sl::build_router(state);
    let session_id = upload_square(&app, 0.2).await;

    let (_, json) = send(
        &app,
        post_json(
            "/process",
            &json!({"session_id": session_id, "date_from": "2022-01-01", "date_to": "2023-01-01"}),
        ),
    )
    .await;
    let job_id = json["job_id"].as_str().unwrap().to_string();
    let job = wait_for_state(&app, &job_id, "FAILED").await;
    assert_eq!(job["error"]["kind"], "REMOTE_SERVICE_ERROR");

    let mut health = Value::Null;
    for _ in 0..100 {
        health = send(&app, get("/health")).await.1;
        if health["status"] == "degraded" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tracker.abort();
    assert_eq!(health["status"], "degraded");
    assert!(health["last_error"].as_str().unwrap().contains(&job_id));
}

#[tokio::test]
async fn test_legend_lists_soil_loss_classes() {
    let app = test_app(Arc::new(ScriptedCompute::healthy()));
    let (status, json) = send(&app, get("/legend")).await;

    assert_eq!(status, StatusCode::OK);
    let classes = json["soil_loss_classes"].as_array().unwrap();
    assert_eq!(classes.len(), 7);
    assert_eq!(classes[0]["label"], "Very Low");
    assert_eq!(classes[0]["range"], "0-5");
    assert_eq!(classes[6]["label"], "Very Severe");
    assert!(classes[6].get("max").is_none());
    assert_eq!(json["unit"], "t/ha/yr");
}

#[tokio::test]
async fn test_upload_rejects_zipped_shapefile() {
    let app = test_app(Arc::new(ScriptedCompute::healthy()));
    // Local file header signature of a zip archive
    let zipped = Request::builder()
        .method("POST")
        .uri("/upload?filename=watershed.zip")
        .header("content-type", "application/zip")
        .body(Body::from(vec![0x50, 0x4b, 0x03, 0x04, 0x14, 0x00, 0x00, 0x00]))
        .unwrap();

    let (status, json) = send(&app, zipped).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "BAD_REQUEST");
    assert!(json["error"]["message"].as_str().unwrap().contains("GeoJSON"));

    let (_, health) = send(&app, get("/health")).await;
    assert_eq!(health["sessions"], 0);
}
