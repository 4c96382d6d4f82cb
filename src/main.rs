#[macro_use]
extern crate diesel;

use std::{io, time::Duration};

use actix_web::{middleware, web, App, HttpServer};
use diesel::{prelude::*, r2d2};

mod actions;
mod auth;
mod config;
mod error;
mod handlers;
mod lifecycle;
mod models;
mod queue;
mod requests;
mod schema;

pub type DbPool = r2d2::Pool<r2d2::ConnectionManager<PgConnection>>;

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = config::Config::from_env().map_err(io::Error::other)?;
    error::expose_error_details(!config.production);

    // initialize DB pool outside of `HttpServer::new` so that it is shared across all workers
    let pool = initialize_db_pool(&config)?;

    match queue::sweep_elapsed_bookings(pool.clone()).await {
        Ok(0) => {}
        Ok(count) => log::info!("Completed {} elapsed bookings at startup", count),
        Err(e) => log::error!("Startup sweep of elapsed bookings failed: {:?}", e),
    }

    let mut events = queue::BookingEventService::new(pool.clone(), config.amqp.clone());
    events.start_completion_sweeper(Duration::from_secs(config.sweep_interval_secs));
    if let Err(e) = events.initialize().await {
        log::warn!("RabbitMQ unavailable, relying on the periodic completion sweep: {:?}", e);
    }

    if events.is_connected() {
        if let Err(e) = events.start_consuming_completions().await {
            log::error!("Error starting booking completion consumer: {:?}", e);
        }
    }

    let events = web::Data::new(events);

    log::info!("starting HTTP server at http://{}:{}", config.host, config.port);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(pool.clone()))
            .app_data(events.clone())
            .wrap(middleware::Logger::default())
            .app_data(handlers::json_config())
            .configure(handlers::configure)
            .default_service(web::to(handlers::route_not_found))
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await
}

fn initialize_db_pool(config: &config::Config) -> io::Result<DbPool> {
    let manager = r2d2::ConnectionManager::<PgConnection>::new(config.database_url.as_str());
    r2d2::Pool::builder()
        .max_size(config.pool_size)
        .build(manager)
        .map_err(io::Error::other)
}
