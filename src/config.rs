use std::net::SocketAddr;

use anyhow::{Context, bail};
use jiff::tz::TimeZone;

#[derive(Clone, Debug)]
pub struct Config {
    pub addr: SocketAddr,
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub jwt_expire_days: i64,
    pub bcrypt_cost: u32,
    pub login_rps: u32,
    pub timezone: TimeZone,
    pub admin: Option<AdminBootstrap>,
}

/// Credentials for the administrator account created at startup.
#[derive(Clone, Debug)]
pub struct AdminBootstrap {
    pub email: String,
    pub password: String,
    pub phone_number: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 =
            std::env::var("PORT").unwrap_or_else(|_| "3000".to_string()).parse().context("PORT")?;

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://cinebook.db?mode=rwc".to_string());

        let jwt_secret = std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        if jwt_secret.len() < 32 {
            bail!("JWT_SECRET must be at least 32 bytes");
        }
        let jwt_issuer = std::env::var("JWT_ISSUER").unwrap_or_else(|_| "cinebook".to_string());
        let jwt_audience =
            std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "cinebook-clients".to_string());
        let jwt_expire_days: i64 =
            std::env::var("JWT_EXPIRE_DAYS").ok().and_then(|s| s.parse().ok()).unwrap_or(7);

        let bcrypt_cost: u32 = std::env::var("BCRYPT_COST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(bcrypt::DEFAULT_COST);

        let login_rps: u32 =
            std::env::var("LOGIN_RPS").ok().and_then(|s| s.parse().ok()).unwrap_or(5);

        let timezone = match std::env::var("TIMEZONE") {
            Ok(name) => TimeZone::get(&name).with_context(|| format!("TIMEZONE {name}"))?,
            Err(_) => TimeZone::UTC,
        };

        let admin = match (std::env::var("ADMIN_EMAIL"), std::env::var("ADMIN_PASSWORD")) {
            (Ok(email), Ok(password)) => Some(AdminBootstrap {
                email,
                password,
                phone_number: std::env::var("ADMIN_PHONE")
                    .unwrap_or_else(|_| "+36000000000".to_string()),
            }),
            _ => None,
        };

        Ok(Self {
            addr: format!("{host}:{port}").parse().context("HOST/PORT")?,
            database_url,
            jwt_secret,
            jwt_issuer,
            jwt_audience,
            jwt_expire_days,
            bcrypt_cost,
            login_rps,
            timezone,
            admin,
        })
    }
}
