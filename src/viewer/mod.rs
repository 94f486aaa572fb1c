// Viewer HTTP endpoint
// Serves a 3D projection of the stored note vectors and a search API

#[cfg(test)]
mod tests;

pub mod projection;

use std::collections::BTreeSet;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpResponse, HttpServer, Responder, http::StatusCode, web};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::Result;
use crate::database::{StoredMatch, VectorStore};
use crate::embeddings::Embedder;
use crate::notes::excerpt;

pub use projection::project_3d;

/// Notes highlighted on the plot for a query
pub const PLOT_HIGHLIGHTS: usize = 5;
/// Characters of note text returned with each search hit
pub const SEARCH_EXCERPT_CHARS: usize = 300;
const MAX_SEARCH_RESULTS: usize = 50;

const INDEX_HTML: &str = include_str!("index.html");

/// Shared state for the viewer handlers
#[derive(Clone)]
pub struct ViewerState {
    pub store: Arc<VectorStore>,
    pub embedder: Arc<dyn Embedder>,
}

#[derive(Debug, Serialize)]
pub struct PlotPoint {
    pub id: String,
    pub path: String,
    pub title: String,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub highlighted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct PlotStats {
    pub total_points: usize,
    pub query: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PlotResponse {
    pub points: Vec<PlotPoint>,
    pub stats: PlotStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_notes: usize,
    pub unique_files: usize,
    pub files: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct PlotQuery {
    pub query: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_results")]
    pub n_results: usize,
}

const fn default_results() -> usize {
    PLOT_HIGHLIGHTS
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub path: String,
    pub title: String,
    pub excerpt: String,
    pub similarity: f32,
}

/// Register the viewer routes
#[inline]
pub fn config_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(index)));
    cfg.service(web::resource("/api/plot").route(web::get().to(plot)));
    cfg.service(web::resource("/api/stats").route(web::get().to(stats)));
    cfg.service(web::resource("/api/search").route(web::post().to(search)));
}

/// Serve the viewer on `host:port` until `cancel` fires
#[inline]
pub async fn serve(
    state: ViewerState,
    host: &str,
    port: u16,
    cancel: CancellationToken,
) -> Result<()> {
    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(cors)
            .configure(config_routes)
    })
    .bind((host, port))?
    .disable_signals()
    .run();

    info!("Viewer listening on http://{}:{}", host, port);

    let handle = server.handle();
    tokio::spawn(async move {
        cancel.cancelled().await;
        info!("Stopping viewer");
        handle.stop(true).await;
    });

    server.await?;
    Ok(())
}

fn error_response(status: StatusCode, message: &str) -> HttpResponse {
    HttpResponse::build(status).json(serde_json::json!({ "error": message }))
}

async fn index() -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(INDEX_HTML)
}

async fn plot(state: web::Data<ViewerState>, params: web::Query<PlotQuery>) -> HttpResponse {
    let query = params
        .query
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(str::to_string);

    let records = match state.store.list_all().await {
        Ok(records) => records,
        Err(e) => {
            error!(kind = e.kind(), "Failed to load vectors for plot: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
        }
    };

    if records.is_empty() {
        return HttpResponse::Ok().json(PlotResponse {
            points: Vec::new(),
            stats: PlotStats {
                total_points: 0,
                query,
            },
            error: Some("No notes have been indexed yet".to_string()),
        });
    }

    let vectors: Vec<Vec<f32>> = records.iter().map(|r| r.vector.clone()).collect();
    let coordinates = project_3d(&vectors);
    let mut points: Vec<PlotPoint> = records
        .into_iter()
        .zip(coordinates)
        .map(|(record, [x, y, z])| PlotPoint {
            id: record.id,
            path: record.metadata.path,
            title: record.metadata.title,
            x,
            y,
            z,
            highlighted: false,
            similarity: None,
        })
        .collect();

    let mut error = None;
    if let Some(query) = &query {
        match nearest(&state, query, PLOT_HIGHLIGHTS).await {
            Ok(matches) => {
                for m in matches {
                    if let Some(point) = points.iter_mut().find(|p| p.id == m.id) {
                        point.highlighted = true;
                        point.similarity = Some(m.similarity);
                    }
                }
            }
            Err(e) => {
                error!(kind = e.kind(), "Plot query failed: {}", e);
                error = Some(format!("Query failed: {}", e));
            }
        }
    }

    debug!("Plotting {} points", points.len());
    HttpResponse::Ok().json(PlotResponse {
        stats: PlotStats {
            total_points: points.len(),
            query,
        },
        points,
        error,
    })
}

async fn stats(state: web::Data<ViewerState>) -> HttpResponse {
    match state.store.list_all().await {
        Ok(records) => {
            let unique_files = records
                .iter()
                .map(|r| r.metadata.path.as_str())
                .collect::<BTreeSet<_>>()
                .len();
            HttpResponse::Ok().json(StatsResponse {
                total_notes: records.len(),
                unique_files,
                files: records.into_iter().map(|r| r.id).collect(),
            })
        }
        Err(e) => {
            error!(kind = e.kind(), "Failed to read store statistics: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

async fn search(state: web::Data<ViewerState>, body: web::Json<SearchRequest>) -> HttpResponse {
    let query = body.query.trim();
    if query.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Query must not be empty");
    }

    let limit = body.n_results.min(MAX_SEARCH_RESULTS);
    match nearest(&state, query, limit).await {
        Ok(matches) => {
            let hits: Vec<SearchHit> = matches
                .into_iter()
                .map(|m| SearchHit {
                    excerpt: excerpt(&m.metadata.content, SEARCH_EXCERPT_CHARS),
                    id: m.id,
                    path: m.metadata.path,
                    title: m.metadata.title,
                    similarity: m.similarity,
                })
                .collect();
            HttpResponse::Ok().json(hits)
        }
        Err(e) => {
            error!(kind = e.kind(), "Search failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

async fn nearest(
    state: &ViewerState,
    query: &str,
    limit: usize,
) -> Result<Vec<StoredMatch>> {
    let vector = state.embedder.embed(query).await?;
    state.store.query(&vector, limit).await
}
