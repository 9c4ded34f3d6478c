//! HTTP handlers for one service instance
//!
//! Bodies are decoded by hand rather than through the `Json` extractor so that
//! every decode failure is a plain-text 400, with or without a content type.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;

use super::error::ApiError;
use super::state::AppState;
use crate::cities::{
    render_rows, CityRecord, PopulationUpdate, RangeField, RangeQuery, RangeRequest, StringQuery,
};

type ApiResult = Result<(StatusCode, String), ApiError>;

fn parse_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request("ID must be of int type"))
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(e.to_string()))
}

/// GET /cities/:id
pub async fn get_city(State(state): State<Arc<AppState>>, Path(raw_id): Path<String>) -> ApiResult {
    let id = parse_id(&raw_id)?;
    match state.store.get(id).await? {
        Some(city) => Ok((StatusCode::OK, city.details())),
        None => Err(ApiError::bad_request("no city with such ID was found")),
    }
}

/// POST /cities
pub async fn create_city(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult {
    let city: CityRecord = decode(&body)?;
    let name = city.name.clone();
    state.store.insert(city).await?;
    Ok((StatusCode::CREATED, format!("City {} added\n", name)))
}

/// DELETE /cities/:id
///
/// Succeeds whether or not a row matched.
pub async fn delete_city(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> ApiResult {
    let id = parse_id(&raw_id)?;
    let removed = state.store.delete(id).await?;
    if removed == 0 {
        debug!("Delete of city {} matched no rows", id);
    }
    Ok((StatusCode::OK, format!("Deleted city with ID {}", id)))
}

/// PUT /cities/:id
pub async fn update_population(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
    body: Bytes,
) -> ApiResult {
    let id = parse_id(&raw_id)?;
    let update: PopulationUpdate = decode(&body)?;
    let changed = state.store.update_population(id, update.value).await?;
    if changed == 0 {
        debug!("Population update of city {} matched no rows", id);
    }
    Ok((StatusCode::CREATED, "New population set\n".to_string()))
}

/// POST /info/region
pub async fn list_by_region(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult {
    let query: StringQuery = decode(&body)?;
    let cities = state.store.list_by_region(query.request.clone()).await?;
    Ok(rows_or(
        &cities,
        format!("No cities were found in region {}", query.request),
    ))
}

/// POST /info/district
pub async fn list_by_district(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult {
    let query: StringQuery = decode(&body)?;
    let cities = state.store.list_by_district(query.request.clone()).await?;
    Ok(rows_or(
        &cities,
        format!("No cities were found in district {}", query.request),
    ))
}

/// POST /info/population
pub async fn list_by_population(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult {
    list_by_range(&state, RangeField::Population, &body).await
}

/// POST /info/foundation
pub async fn list_by_foundation(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult {
    list_by_range(&state, RangeField::Foundation, &body).await
}

async fn list_by_range(state: &AppState, field: RangeField, body: &[u8]) -> ApiResult {
    let request: RangeRequest = decode(body)?;
    let range = RangeQuery::from(request);
    if !range.is_valid() {
        return Err(ApiError::bad_request(format!(
            "check the {} range data: min {} is greater than max {}",
            field, request.min_value, request.max_value
        )));
    }

    let cities = state.store.list_by_range(field, range).await?;
    Ok(rows_or(&cities, range.none_found_message(field)))
}

fn rows_or(cities: &[CityRecord], none_found: String) -> (StatusCode, String) {
    if cities.is_empty() {
        (StatusCode::OK, none_found)
    } else {
        (StatusCode::OK, render_rows(cities))
    }
}

/// Health check endpoint
pub async fn health() -> &'static str {
    "ok"
}
