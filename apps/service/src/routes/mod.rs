//! Management API: target CRUD and check status over the registry and sink

use std::sync::Arc;

use actix_web::web;
use monitor::{ResultSink, TargetRegistry, TargetScheduler};
use tracing::{debug, warn};

use crate::error::ApiError;

pub mod health;
pub mod status;
pub mod targets;


/// Shared by every handler
pub struct AppState {
    pub registry: Arc<dyn TargetRegistry>,
    pub sink: Arc<dyn ResultSink>,
    pub scheduler: Arc<TargetScheduler>,
}

impl AppState {
    pub fn new(
        registry: Arc<dyn TargetRegistry>,
        sink: Arc<dyn ResultSink>,
        scheduler: Arc<TargetScheduler>,
    ) -> Self {
        Self { registry, sink, scheduler }
    }

    /// Rebuild timers after a configuration change.
    ///
    /// The change is already stored when this runs, so a failure only leaves
    /// the timers stale until the next successful resync.
    pub async fn resync(&self) {
        match self.scheduler.resync().await {
            Ok(summary) => debug!(?summary, "scheduler resynced after configuration change"),
            Err(e) => warn!(error = %e, "scheduler resync failed, timers may be stale"),
        }
    }
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _req| ApiError::InvalidBody(err.to_string()).into()),
    )
    .service(health::home_route)
    .service(health::health_route)
    .service(targets::list_targets)
    .service(targets::create_target)
    .service(targets::get_target)
    .service(targets::update_target)
    .service(targets::delete_target)
    .service(status::status_route)
    .service(status::scheduler_route);
}
