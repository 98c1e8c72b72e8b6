use actix_web::{HttpResponse, Responder, get};
use serde_json::json;

#[get("/")]
pub async fn home_route() -> impl Responder {
    HttpResponse::Ok().json(json!({ "message": "API Monitor is running." }))
}

/// Health check route
/// This route returns no content, the response status is enough.
#[get("/health")]
pub async fn health_route() -> impl Responder {
    HttpResponse::Ok()
}
