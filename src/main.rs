mod auth;
mod config;
mod db;
mod entities;
mod error;
mod models;
mod routes;
mod services;
mod templates;
#[cfg(test)]
mod test_support;

use std::{num::NonZeroU32, sync::Arc};

use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use sea_orm::DatabaseConnection;

use crate::{
    auth::TokenIssuer,
    config::Config,
    services::{MovieService, ScreeningService, TicketService, UserService},
};

pub type LoginLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

pub struct AppState {
    pub config: Arc<Config>,
    pub movies: MovieService,
    pub screenings: ScreeningService,
    pub tickets: TicketService,
    pub users: UserService,
    pub tokens: Arc<TokenIssuer>,
    pub login_limiter: Arc<LoginLimiter>,
}

impl AppState {
    pub fn new(config: Config, db: DatabaseConnection) -> Self {
        let rps = NonZeroU32::new(config.login_rps).unwrap_or(NonZeroU32::MIN);
        Self {
            movies: MovieService::new(db.clone()),
            screenings: ScreeningService::new(db.clone()),
            tickets: TicketService::new(db.clone()),
            users: UserService::new(db, config.bcrypt_cost),
            tokens: Arc::new(TokenIssuer::new(&config)),
            login_limiter: Arc::new(RateLimiter::direct(Quota::per_second(rps))),
            config: Arc::new(config),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,cinebook=debug,sqlx=warn".to_string()),
        )
        .init();

    let config = Config::from_env()?;
    let addr = config.addr;

    let db = db::connect_and_migrate(config.database_url.as_str()).await?;
    let state = Arc::new(AppState::new(config, db));

    if let Some(admin) = &state.config.admin {
        state.users.ensure_admin(admin).await?;
    }

    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
