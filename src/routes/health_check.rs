use actix_web::HttpResponse;

/// Liveness probe. Unauthenticated and store-free: a 200 here means the
/// process is up, nothing more.
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().finish()
}
