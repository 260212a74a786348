use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use axum::http::HeaderValue;
use tracing::warn;

const DEV_SECRET: &str = "dev-secret-change-me";

/// Process configuration, read once from the environment.
/// This is the only place the signing secret is looked up.
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    pub allowed_origins: Vec<HeaderValue>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let jwt_secret = std::env::var("PROCHAT_JWT_SECRET").unwrap_or_else(|_| {
            warn!("PROCHAT_JWT_SECRET not set, using the development secret");
            DEV_SECRET.into()
        });
        let db_path = std::env::var("PROCHAT_DB_PATH").unwrap_or_else(|_| "prochat.db".into());
        let host = std::env::var("PROCHAT_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port = std::env::var("PROCHAT_PORT")
            .unwrap_or_else(|_| "5000".into())
            .parse::<u16>()
            .context("PROCHAT_PORT is not a port number")?;
        let origins = std::env::var("PROCHAT_ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into());

        let allowed_origins = origins
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(|o| HeaderValue::from_str(o).with_context(|| format!("bad origin {o:?}")))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let addr = format!("{}:{}", host, port)
            .parse::<SocketAddr>()
            .with_context(|| format!("bad listen address {}:{}", host, port))?;

        Ok(Self {
            jwt_secret,
            db_path: PathBuf::from(db_path),
            addr,
            allowed_origins,
        })
    }
}
