//! HTTP handler functions for the movement map API.

use std::fmt::Display;

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, web};
use movement_map_cluster::{ClusterError, ClusterId};
use movement_map_engine::frame::zoom_level;
use movement_map_engine::{EngineError, FilterState, MapSnapshot, PointMarker};
use movement_map_pin_models::BoundingBox;
use movement_map_server_models::{
    ApiCategory, ApiExpansion, ApiHealth, ApiRefresh, ApiStatsSummary, ClusterQueryParams,
    FilterQueryParams, LeavesQueryParams,
};

use crate::AppState;

/// Default page size for cluster leaves.
const DEFAULT_LEAVES_LIMIT: usize = 10;

/// Largest page size for cluster leaves.
const MAX_LEAVES_LIMIT: usize = 500;

/// `GET /api/health`
///
/// Unhealthy (503) while no load from the feed has succeeded.
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let data = state.data();
    let error = state.load_error();
    let status = if error.is_some() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    HttpResponse::build(status).json(ApiHealth {
        healthy: error.is_none(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        pins: data.index().len(),
        loaded_at: data.loaded_at(),
        error,
    })
}

/// `GET /api/categories`
///
/// Returns the category legend with unfiltered counts.
pub async fn categories(state: web::Data<AppState>) -> HttpResponse {
    match filtered_snapshot(&state, None) {
        Ok(snapshot) => HttpResponse::Ok().json(ApiCategory::legend(snapshot.stats())),
        Err(response) => response,
    }
}

/// `GET /api/clusters`
///
/// Clusters and points for a zoom level and optional bounding box, plus
/// stats over the whole filtered pin set.
pub async fn clusters(
    state: web::Data<AppState>,
    params: web::Query<ClusterQueryParams>,
) -> HttpResponse {
    let bbox = match params.bbox.as_deref() {
        Some(s) => match s.parse::<BoundingBox>() {
            Ok(bbox) => bbox,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
        },
        None => BoundingBox::world(),
    };
    let zoom = zoom_level(params.zoom.unwrap_or(state.config.view.zoom));

    let snapshot = match filtered_snapshot(&state, params.categories.as_deref()) {
        Ok(snapshot) => snapshot,
        Err(response) => return response,
    };

    HttpResponse::Ok().json(snapshot.frame_at(zoom, &bbox))
}

/// `GET /api/clusters/{zoom}/{index}/expansion-zoom`
///
/// Zoom level and center to fly to when a cluster is clicked.
pub async fn expansion_zoom(
    state: web::Data<AppState>,
    path: web::Path<(u8, usize)>,
    params: web::Query<FilterQueryParams>,
) -> HttpResponse {
    let (zoom, index) = path.into_inner();
    let id = ClusterId::new(zoom, index);

    let snapshot = match filtered_snapshot(&state, params.categories.as_deref()) {
        Ok(snapshot) => snapshot,
        Err(response) => return response,
    };

    let expansion = snapshot.expansion_zoom(id).and_then(|expansion_zoom| {
        Ok(ApiExpansion {
            cluster: id,
            expansion_zoom,
            center: snapshot.cluster(id)?.center,
        })
    });

    match expansion {
        Ok(expansion) => HttpResponse::Ok().json(expansion),
        Err(e) => cluster_error(&e),
    }
}

/// `GET /api/clusters/{zoom}/{index}/leaves`
///
/// Pins under a cluster, paginated.
pub async fn leaves(
    state: web::Data<AppState>,
    path: web::Path<(u8, usize)>,
    params: web::Query<LeavesQueryParams>,
) -> HttpResponse {
    let (zoom, index) = path.into_inner();
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LEAVES_LIMIT)
        .min(MAX_LEAVES_LIMIT);
    let offset = params.offset.unwrap_or(0);

    let snapshot = match filtered_snapshot(&state, params.categories.as_deref()) {
        Ok(snapshot) => snapshot,
        Err(response) => return response,
    };

    match snapshot.leaves(ClusterId::new(zoom, index), limit, offset) {
        Ok(pins) => {
            let markers: Vec<PointMarker> = pins.into_iter().map(PointMarker::from).collect();
            HttpResponse::Ok().json(markers)
        }
        Err(e) => cluster_error(&e),
    }
}

/// `GET /api/stats`
///
/// Total and per-category counts for a filter.
pub async fn stats(
    state: web::Data<AppState>,
    params: web::Query<FilterQueryParams>,
) -> HttpResponse {
    match filtered_snapshot(&state, params.categories.as_deref()) {
        Ok(snapshot) => HttpResponse::Ok().json(ApiStatsSummary::new(
            snapshot.stats(),
            snapshot.filter().visible_categories(),
        )),
        Err(response) => response,
    }
}

/// `POST /api/refresh`
///
/// Reloads the feed. On failure the previous pins keep being served, and
/// a map that never loaded stays unavailable.
pub async fn refresh(state: web::Data<AppState>) -> HttpResponse {
    match state.refresh().await {
        Ok(data) => {
            let report = data.report();
            HttpResponse::Ok().json(ApiRefresh {
                received: report.received,
                accepted: report.accepted,
                dropped: report.dropped(),
                loaded_at: data.loaded_at(),
            })
        }
        Err(e) => engine_error(&e),
    }
}

/// Parses the category filter and fetches its snapshot, failing with 502
/// while the feed has never loaded.
fn filtered_snapshot(
    state: &AppState,
    categories: Option<&str>,
) -> Result<std::sync::Arc<MapSnapshot>, HttpResponse> {
    if let Some(message) = state.load_error() {
        return Err(error_response(
            StatusCode::BAD_GATEWAY,
            format!("Pins unavailable: {message}"),
        ));
    }
    let filter = match categories {
        Some(list) => list
            .parse::<FilterState>()
            .map_err(|e| error_response(StatusCode::BAD_REQUEST, e))?,
        None => FilterState::default(),
    };
    state.snapshot(&filter).map_err(|e| engine_error(&e))
}

fn error_response(status: StatusCode, message: impl Display) -> HttpResponse {
    HttpResponse::build(status).json(serde_json::json!({
        "error": message.to_string()
    }))
}

fn cluster_error(e: &ClusterError) -> HttpResponse {
    match e {
        ClusterError::UnknownCluster { .. } => error_response(StatusCode::NOT_FOUND, e),
        ClusterError::NotACluster { .. } => error_response(StatusCode::BAD_REQUEST, e),
        ClusterError::InvalidOptions { .. } => {
            log::error!("Cluster query failed: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

fn engine_error(e: &EngineError) -> HttpResponse {
    match e {
        EngineError::Cluster(e) => cluster_error(e),
        EngineError::Ingest(_) => {
            log::error!("Failed to load pins: {e}");
            error_response(StatusCode::BAD_GATEWAY, e)
        }
        EngineError::NoFeed => error_response(StatusCode::SERVICE_UNAVAILABLE, e),
        EngineError::Config(_) => {
            log::error!("Configuration error: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}
