//! services/api/src/bin/create_admin.rs
//!
//! Seeds an admin account. There is no signup route; admins are created here.
//!
//! Usage: `create_admin <name> <email> <password>`

use api_lib::{adapters::DbAdapter, config::Config, error::ApiError, web::auth::hash_password};
use revision_tracker_core::ports::DatabaseService;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [name, email, password] = args.as_slice() else {
        return Err(ApiError::BadRequest(
            "usage: create_admin <name> <email> <password>".to_string(),
        ));
    };

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&config.database_url)
        .await?;
    let db = DbAdapter::new(pool);
    db.run_migrations().await?;

    let hash = hash_password(password)?;
    let admin = db.create_admin(name, email, &hash).await?;
    info!(admin_id = %admin.admin_id, email = %admin.email, "Admin created");
    Ok(())
}
