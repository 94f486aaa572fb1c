use super::*;
use crate::database::EmbeddingRecord;
use crate::notes::Note;
use crate::testing::{FailingEmbedder, HashingEmbedder};
use actix_web::test;
use chrono::Utc;
use std::path::PathBuf;
use tempfile::TempDir;

const DIMENSION: usize = 256;

async fn state_with(
    notes: &[(&str, &str)],
    embedder: Arc<dyn Embedder>,
) -> (ViewerState, TempDir) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = Arc::new(
        VectorStore::open(&temp_dir.path().join("vectors"))
            .await
            .expect("should open store"),
    );

    let hashing = HashingEmbedder::new(DIMENSION);
    for (id, content) in notes {
        let note = Note::from_content(
            (*id).to_string(),
            PathBuf::from("/vault").join(id),
            (*content).to_string(),
            Utc::now(),
        );
        let vector = hashing.vector_for(&note.text);
        store
            .upsert(EmbeddingRecord::from_note(&note, vector))
            .await
            .expect("upsert");
    }

    (ViewerState { store, embedder }, temp_dir)
}

fn notes() -> Vec<(&'static str, &'static str)> {
    vec![
        ("rust/ownership.md", "# Ownership\nRust ownership moves values between bindings."),
        ("rust/borrowing.md", "# Borrowing\nBorrowing lends references without moving ownership."),
        ("garden/tomatoes.md", "# Tomatoes\nWater tomatoes in the morning and mulch the soil."),
        ("garden/peppers.md", "# Peppers\nPeppers like warm soil and plenty of sunlight."),
    ]
}

macro_rules! viewer_app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($state))
                .configure(config_routes),
        )
        .await
    };
}

#[actix_web::test]
async fn index_serves_plot_page() {
    let (state, _dir) = state_with(&[], Arc::new(HashingEmbedder::new(DIMENSION))).await;
    let app = viewer_app!(state);

    let response = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;

    assert!(response.status().is_success());
    let body = test::read_body(response).await;
    let html = String::from_utf8(body.to_vec()).expect("utf-8 page");
    assert!(html.contains("plotly"));
    assert!(html.contains("/api/plot"));
}

#[actix_web::test]
async fn plot_on_empty_store_reports_error() {
    let (state, _dir) = state_with(&[], Arc::new(HashingEmbedder::new(DIMENSION))).await;
    let app = viewer_app!(state);

    let body: serde_json::Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get().uri("/api/plot").to_request(),
    )
    .await;

    assert_eq!(body["points"].as_array().map(Vec::len), Some(0));
    assert_eq!(body["stats"]["total_points"], 0);
    assert!(body["error"].is_string());
}

#[actix_web::test]
async fn plot_highlights_query_matches() {
    let (state, _dir) = state_with(&notes(), Arc::new(HashingEmbedder::new(DIMENSION))).await;
    let app = viewer_app!(state);

    let body: serde_json::Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get()
            .uri("/api/plot?query=rust%20ownership%20borrowing")
            .to_request(),
    )
    .await;

    let points = body["points"].as_array().expect("points array");
    assert_eq!(points.len(), 4);
    assert_eq!(body["stats"]["query"], "rust ownership borrowing");
    assert!(body.get("error").is_none());
    for point in points {
        assert!(point["x"].is_number() && point["y"].is_number() && point["z"].is_number());
    }

    // Four notes and five highlights: everything is highlighted, with similarity
    assert!(points.iter().all(|p| p["highlighted"] == true));
    let ownership = points
        .iter()
        .find(|p| p["id"] == "rust/ownership.md")
        .expect("ownership point");
    let tomatoes = points
        .iter()
        .find(|p| p["id"] == "garden/tomatoes.md")
        .expect("tomatoes point");
    assert!(
        ownership["similarity"].as_f64().expect("similarity")
            > tomatoes["similarity"].as_f64().expect("similarity")
    );
}

#[actix_web::test]
async fn plot_without_query_highlights_nothing() {
    let (state, _dir) = state_with(&notes(), Arc::new(HashingEmbedder::new(DIMENSION))).await;
    let app = viewer_app!(state);

    let body: serde_json::Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get().uri("/api/plot?query=%20%20").to_request(),
    )
    .await;

    let points = body["points"].as_array().expect("points array");
    assert_eq!(points.len(), 4);
    assert!(points.iter().all(|p| p["highlighted"] == false));
    assert!(points.iter().all(|p| p.get("similarity").is_none()));
    assert!(body["stats"]["query"].is_null());
}

#[actix_web::test]
async fn plot_keeps_points_when_query_embedding_fails() {
    let (state, _dir) = state_with(&notes(), Arc::new(FailingEmbedder)).await;
    let app = viewer_app!(state);

    let body: serde_json::Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get().uri("/api/plot?query=rust").to_request(),
    )
    .await;

    assert_eq!(body["points"].as_array().map(Vec::len), Some(4));
    assert!(
        body["error"]
            .as_str()
            .is_some_and(|e| e.starts_with("Query failed"))
    );
}

#[actix_web::test]
async fn stats_lists_indexed_files() {
    let (state, _dir) = state_with(&notes(), Arc::new(HashingEmbedder::new(DIMENSION))).await;
    let app = viewer_app!(state);

    let body: serde_json::Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get().uri("/api/stats").to_request(),
    )
    .await;

    assert_eq!(body["total_notes"], 4);
    assert_eq!(body["unique_files"], 4);
    assert_eq!(body["files"][0], "garden/peppers.md");
}

#[actix_web::test]
async fn search_returns_ranked_hits() {
    let (state, _dir) = state_with(&notes(), Arc::new(HashingEmbedder::new(DIMENSION))).await;
    let app = viewer_app!(state);

    let hits: Vec<SearchHit> = test::call_and_read_body_json(
        &app,
        test::TestRequest::post()
            .uri("/api/search")
            .set_json(serde_json::json!({ "query": "tomatoes soil mulch", "n_results": 2 }))
            .to_request(),
    )
    .await;

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, "garden/tomatoes.md");
    assert_eq!(hits[0].title, "Tomatoes");
    assert!(hits[0].excerpt.contains("mulch"));
    assert!(hits[0].similarity >= hits[1].similarity);
}

#[actix_web::test]
async fn search_rejects_empty_query() {
    let (state, _dir) = state_with(&notes(), Arc::new(HashingEmbedder::new(DIMENSION))).await;
    let app = viewer_app!(state);

    let response = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/search")
            .set_json(serde_json::json!({ "query": "   " }))
            .to_request(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn search_reports_provider_failure() {
    let (state, _dir) = state_with(&notes(), Arc::new(FailingEmbedder)).await;
    let app = viewer_app!(state);

    let response = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/search")
            .set_json(serde_json::json!({ "query": "rust" }))
            .to_request(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}
