use std::env;
use std::fmt;

use crate::cli::Cli;
use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub expiry_threshold_days: i64,
    pub low_stock_threshold: i64,
    pub sweep_interval_seconds: u64,
    /// Base URL embedded in alert resolution links.
    pub site_base: String,
    pub pharmacy_email: String,
    pub admin_email: Option<String>,
    /// `None` means SMTP is unconfigured and emails go to the log.
    pub smtp: Option<SmtpSettings>,
}

#[derive(Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
}

impl fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("from_address", &self.from_address)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let host = env_or("HOST", "0.0.0.0");
        let port = parse_env("PORT", 5000u16)?;
        let database_url = env_or("DATABASE_URL", "sqlite://pharmacy.db");

        let expiry_threshold_days = parse_env("EXPIRY_THRESHOLD_DAYS", 15i64)?;
        let low_stock_threshold = parse_env("LOW_STOCK_THRESHOLD", 5i64)?;
        let sweep_interval_seconds = parse_env("SWEEP_INTERVAL_SECONDS", 86_400u64)?;

        let smtp = smtp_from_env()?;

        let from_email = env::var("FROM_EMAIL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| smtp.as_ref().map(|s| s.username.clone()))
            .unwrap_or_else(|| "pharmacy@example.com".to_string());

        let site_base = env::var("SITE_BASE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| format!("http://{}:{}", host, port));

        let pharmacy_email = env::var("PHARMACY_EMAIL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(from_email);

        let admin_email = env::var("SITE_ADMIN_EMAIL")
            .ok()
            .filter(|s| !s.trim().is_empty());

        Ok(Self {
            host,
            port,
            database_url,
            expiry_threshold_days,
            low_stock_threshold,
            sweep_interval_seconds,
            site_base,
            pharmacy_email,
            admin_email,
            smtp,
        })
    }

    /// Command-line flags win over environment values.
    pub fn apply_cli(mut self, cli: &Cli) -> Self {
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(url) = &cli.database_url {
            self.database_url = url.clone();
        }
        if let Some(interval) = cli.sweep_interval {
            self.sweep_interval_seconds = interval;
        }
        if let Some(days) = cli.expiry_threshold {
            self.expiry_threshold_days = days;
        }
        if let Some(qty) = cli.low_stock_threshold {
            self.low_stock_threshold = qty;
        }
        self
    }
}

fn smtp_from_env() -> Result<Option<SmtpSettings>, AppError> {
    let host = env::var("SMTP_HOST").ok().filter(|s| !s.trim().is_empty());
    let username = env::var("SMTP_USER").ok().filter(|s| !s.trim().is_empty());
    let password = env::var("SMTP_PASS").ok().filter(|s| !s.trim().is_empty());

    // All three or nothing; a partial SMTP config falls back to console
    // delivery rather than failing startup.
    let (Some(host), Some(username), Some(password)) = (host, username, password) else {
        return Ok(None);
    };

    let port = parse_env("SMTP_PORT", 587u16)?;
    let from_address = env::var("FROM_EMAIL")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| username.clone());

    Ok(Some(SmtpSettings {
        host,
        port,
        username,
        password,
        from_address,
    }))
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T, AppError> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::config(format!("{} must be a valid number, got '{}'", name, raw))),
        _ => Ok(default),
    }
}
