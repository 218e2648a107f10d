pub use controller::*;
use clap::Parser;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, Registry, prelude::*};

use actix_web::{
    App, HttpRequest, HttpResponse, HttpServer, Responder, get, middleware,
    web::Data,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Parameters {
    /// Seconds between two live sync passes of an instance
    #[arg(long = "check-interval", env = "CHECK_INTERVAL", value_name = "SECONDS", default_value_t = 60)]
    check_interval: u64,
    /// Address of the health and metrics endpoint
    #[arg(long = "listen", env = "LISTEN_ADDRESS", value_name = "ADDRESS", default_value = "0.0.0.0:9000")]
    listen: String,
}

#[get("/metrics")]
async fn metrics(c: Data<Manager>, _req: HttpRequest) -> impl Responder {
    let metrics = c.metrics();
    HttpResponse::Ok()
        .content_type("application/openmetrics-text; version=1.0.0; charset=utf-8")
        .body(metrics)
}

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/")]
async fn index(c: Data<Manager>, _req: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let args = Parameters::parse();

    // Setup tracing layers
    let logger = tracing_subscriber::fmt::layer();
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    let collector = Registry::default().with(logger).with(env_filter);

    // Initialize tracing
    tracing::subscriber::set_global_default(collector).unwrap();

    // Start kubernetes controller
    let (manager, controller) = Manager::new(Duration::from_secs(args.check_interval.max(1)))
        .await
        .map_err(std::io::Error::other)?;

    // Start web server
    let data = manager.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(data.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(index)
            .service(health)
            .service(metrics)
    })
    .bind(&args.listen)?
    .shutdown_timeout(5);

    tokio::select! {
        _ = controller => tracing::warn!("Minecraft controller exited"),
        _ = server.run() => tracing::info!("actix exited"),
    }
    manager.shutdown().await;
    tracing::info!("all live sync tasks stopped");
    Ok(())
}
