use actix_web::{middleware::Logger, web, App, HttpServer};
use actix_web::dev::Server;
use std::net::TcpListener;

use crate::configuration::JwtSettings;
use crate::middleware::RequireAuth;
use crate::routes::{get_current_user, health_check, login, logout, refresh};
use crate::service::AuthService;

pub fn run(
    listener: TcpListener,
    service: AuthService,
    settings: JwtSettings,
) -> Result<Server, std::io::Error> {
    let service = web::Data::new(service);
    let settings = web::Data::new(settings);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())

            // Shared state
            .app_data(service.clone())
            .app_data(settings.clone())

            // Public routes
            .route("/health_check", web::get().to(health_check))
            .route("/auth/login", web::post().to(login))
            .route("/auth/refresh", web::post().to(refresh))
            .route("/auth/logout", web::post().to(logout))

            // Protected routes (require a valid bearer token)
            .service(
                web::resource("/auth/me")
                    .wrap(RequireAuth::new(service.clone()))
                    .route(web::get().to(get_current_user)),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
