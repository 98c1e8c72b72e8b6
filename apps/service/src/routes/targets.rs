use actix_web::{HttpResponse, delete, get, post, put, web};
use monitor::{Target, TargetId, TargetSpec, validate_spec};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::AppState;
use crate::error::ApiError;

/// Ids that do not parse cannot name a stored target
fn parse_id(raw: &str) -> Result<TargetId, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound)
}

#[get("/targets")]
pub async fn list_targets(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(state.registry.list_targets().await?))
}

#[post("/targets")]
pub async fn create_target(
    state: web::Data<AppState>,
    body: web::Json<TargetSpec>,
) -> Result<HttpResponse, ApiError> {
    let spec = body.into_inner();
    validate_spec(&spec)?;

    let target = Target::from_spec(spec);
    state.registry.add_target(&target).await?;
    info!(target_id = %target.id, name = %target.spec.name, "target created");

    state.resync().await;
    Ok(HttpResponse::Created().json(target))
}

#[get("/targets/{id}")]
pub async fn get_target(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = parse_id(&path.into_inner())?;
    match state.registry.get_target(id).await? {
        Some(target) => Ok(HttpResponse::Ok().json(target)),
        None => Err(ApiError::NotFound),
    }
}

/// Replace the whole configuration; the id never changes
#[put("/targets/{id}")]
pub async fn update_target(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<TargetSpec>,
) -> Result<HttpResponse, ApiError> {
    let id = parse_id(&path.into_inner())?;
    let spec = body.into_inner();
    validate_spec(&spec)?;

    let target = Target::with_id(id, spec);
    if !state.registry.update_target(&target).await? {
        return Err(ApiError::NotFound);
    }
    info!(target_id = %id, "target updated");

    state.resync().await;
    Ok(HttpResponse::Ok().json(target))
}

#[delete("/targets/{id}")]
pub async fn delete_target(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = parse_id(&path.into_inner())?;
    if !state.registry.remove_target(id).await? {
        return Err(ApiError::NotFound);
    }
    info!(target_id = %id, "target deleted");

    state.resync().await;
    Ok(HttpResponse::Ok().json(json!({ "deleted": id })))
}
