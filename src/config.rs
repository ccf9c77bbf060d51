use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use url::Url;

use crate::db::DEFAULT_MAX_POOL_SIZE;

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_pool_size: u32,
    pub server_host: String,
    pub server_port: u16,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub jwt_expiry_minutes: i64,
    pub attendant_token_audience: String,
    pub attendant_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
    pub refresh_cookie_secure: bool,
    pub refresh_cookie_domain: Option<String>,
    pub cors_allowed_origin: Option<String>,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let database_url = lookup("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_max_pool_size = lookup("DATABASE_MAX_POOL_SIZE")
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_POOL_SIZE);
        let server_host = var_or("SERVER_HOST", "127.0.0.1");
        let server_port = var_or("SERVER_PORT", "3000")
            .parse()
            .context("SERVER_PORT must be a valid u16")?;
        let jwt_secret = lookup("JWT_SECRET").context("JWT_SECRET must be set")?;
        let jwt_issuer = var_or("JWT_ISSUER", "shift-scheduler");
        let jwt_audience = var_or("JWT_AUDIENCE", "shift-scheduler-clients");
        let jwt_expiry_minutes = var_or("JWT_EXPIRY_MINUTES", "60")
            .parse()
            .context("JWT_EXPIRY_MINUTES must be an integer")?;
        let attendant_token_audience =
            var_or("ATTENDANT_TOKEN_AUDIENCE", "shift-scheduler-attendants");
        let attendant_token_expiry_minutes = var_or("ATTENDANT_TOKEN_EXPIRY_MINUTES", "720")
            .parse()
            .context("ATTENDANT_TOKEN_EXPIRY_MINUTES must be an integer")?;
        let refresh_token_expiry_days = var_or("REFRESH_TOKEN_EXPIRY_DAYS", "30")
            .parse()
            .context("REFRESH_TOKEN_EXPIRY_DAYS must be an integer")?;
        let refresh_cookie_secure = lookup("REFRESH_COOKIE_SECURE")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let refresh_cookie_domain = lookup("REFRESH_COOKIE_DOMAIN");
        let cors_allowed_origin = lookup("CORS_ALLOWED_ORIGIN");
        let upload_dir = PathBuf::from(var_or("UPLOAD_DIR", "uploads"));
        let max_upload_bytes = match lookup("MAX_UPLOAD_BYTES") {
            Some(raw) => raw
                .parse()
                .context("MAX_UPLOAD_BYTES must be a positive integer")?,
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        Ok(Self {
            database_url,
            database_max_pool_size,
            server_host,
            server_port,
            jwt_secret,
            jwt_issuer,
            jwt_audience,
            jwt_expiry_minutes,
            attendant_token_audience,
            attendant_token_expiry_minutes,
            refresh_token_expiry_days,
            refresh_cookie_secure,
            refresh_cookie_domain,
            cors_allowed_origin,
            upload_dir,
            max_upload_bytes,
        })
    }

    pub fn redacted_database_url(&self) -> String {
        redact_database_url(&self.database_url)
    }
}

fn redact_database_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("*****"));
            }
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}
