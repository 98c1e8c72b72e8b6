use actix_web::{HttpResponse, get, web};
use monitor::CheckOutcome;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    target_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum StatusEntry {
    Checked(CheckOutcome),
    Pending { target_id: String, ok: Option<bool>, message: &'static str },
}

impl StatusEntry {
    fn pending(target_id: impl ToString) -> Self {
        StatusEntry::Pending {
            target_id: target_id.to_string(),
            ok: None,
            message: "No checks recorded yet",
        }
    }
}

/// Last outcome of one target, or of every target when no id is given
#[get("/status")]
pub async fn status_route(
    state: web::Data<AppState>,
    query: web::Query<StatusQuery>,
) -> Result<HttpResponse, ApiError> {
    if let Some(raw) = query.into_inner().target_id {
        let entry = match Uuid::parse_str(&raw) {
            Ok(id) => match state.sink.last_outcome(id).await? {
                Some(outcome) => StatusEntry::Checked(outcome),
                None => StatusEntry::pending(raw),
            },
            Err(_) => StatusEntry::pending(raw),
        };
        return Ok(HttpResponse::Ok().json(entry));
    }

    let mut entries = Vec::new();
    for target in state.registry.list_targets().await? {
        let entry = match state.sink.last_outcome(target.id).await? {
            Some(outcome) => StatusEntry::Checked(outcome),
            None => StatusEntry::pending(target.id),
        };
        entries.push(entry);
    }
    Ok(HttpResponse::Ok().json(entries))
}

#[get("/scheduler")]
pub async fn scheduler_route(state: web::Data<AppState>) -> HttpResponse {
    let scheduler = &state.scheduler;
    HttpResponse::Ok().json(json!({
        "running": scheduler.is_running().await,
        "overlap": scheduler.overlap_policy(),
        "scheduled": scheduler.scheduled_ids().await,
        "in_flight": scheduler.in_flight(),
    }))
}
