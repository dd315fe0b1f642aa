//! Deployment environment of the back-office app.
//!
//! shellcache does not talk to the database or sign sessions; it only
//! checks that the variables the origin expects are present and sane, so a
//! misconfigured deploy is caught before the proxy starts fronting it.

use serde::Serialize;
use thiserror::Error;

/// The development fallback the app uses when `SECRET_KEY` is unset.
const DEV_SECRET_KEY: &str = "dev-secret-key-change-in-production";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeployError {
    #[error("DATABASE_URL is not set")]
    MissingDatabaseUrl,

    #[error("DATABASE_URL must be a PostgreSQL connection string, got scheme {0:?}")]
    UnsupportedDatabase(String),

    #[error("PORT is not a valid port: {0}")]
    InvalidPort(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SslMode {
    Require,
    Prefer,
}

impl SslMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SslMode::Require => "require",
            SslMode::Prefer => "prefer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseUrl {
    pub url: String,
    pub ssl_mode: SslMode,
    pub is_supabase: bool,
}

impl DatabaseUrl {
    /// Normalize the legacy `postgres://` scheme and pick the SSL mode.
    pub fn parse(raw: &str) -> Result<Self, DeployError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(DeployError::MissingDatabaseUrl);
        }
        let url = match raw.strip_prefix("postgres://") {
            Some(rest) => format!("postgresql://{rest}"),
            None => raw.to_string(),
        };
        if !url.to_ascii_lowercase().starts_with("postgresql") {
            let scheme = url.split(':').next().unwrap_or_default().to_string();
            return Err(DeployError::UnsupportedDatabase(scheme));
        }
        let is_supabase = url.to_ascii_lowercase().contains("supabase");
        Ok(Self {
            url,
            ssl_mode: if is_supabase { SslMode::Require } else { SslMode::Prefer },
            is_supabase,
        })
    }

    /// The URL with the password replaced, for display.
    pub fn redacted(&self) -> String {
        let Some((scheme, rest)) = self.url.split_once("://") else {
            return self.url.clone();
        };
        let Some((userinfo, host)) = rest.rsplit_once('@') else {
            return self.url.clone();
        };
        match userinfo.split_once(':') {
            Some((user, _)) => format!("{scheme}://{user}:****@{host}"),
            None => self.url.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingLevel {
    Ok,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub level: FindingLevel,
    pub message: String,
}

impl Finding {
    fn new(level: FindingLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeploymentEnv {
    pub database_url: Result<DatabaseUrl, DeployError>,
    pub secret_key: Option<String>,
    pub port: Result<Option<u16>, DeployError>,
}

impl DeploymentEnv {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let database_url = lookup("DATABASE_URL")
            .ok_or(DeployError::MissingDatabaseUrl)
            .and_then(|raw| DatabaseUrl::parse(&raw));
        let port = match lookup("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map(Some)
                .map_err(|_| DeployError::InvalidPort(raw)),
            None => Ok(None),
        };
        Self {
            database_url,
            secret_key: lookup("SECRET_KEY").filter(|k| !k.is_empty()),
            port,
        }
    }

    pub fn findings(&self) -> Vec<Finding> {
        let mut findings = Vec::new();

        match &self.database_url {
            Ok(db) => findings.push(Finding::new(
                FindingLevel::Ok,
                format!("DATABASE_URL {} (sslmode={})", db.redacted(), db.ssl_mode.as_str()),
            )),
            Err(e) => findings.push(Finding::new(FindingLevel::Error, e.to_string())),
        }

        match self.secret_key.as_deref() {
            None => findings.push(Finding::new(
                FindingLevel::Warn,
                "SECRET_KEY is not set; sessions will use the development key",
            )),
            Some(DEV_SECRET_KEY) => findings.push(Finding::new(
                FindingLevel::Warn,
                "SECRET_KEY is the development default",
            )),
            Some(_) => findings.push(Finding::new(FindingLevel::Ok, "SECRET_KEY is set")),
        }

        match &self.port {
            Ok(Some(port)) => findings.push(Finding::new(FindingLevel::Ok, format!("PORT {port}"))),
            Ok(None) => {}
            Err(e) => findings.push(Finding::new(FindingLevel::Error, e.to_string())),
        }

        findings
    }

    pub fn is_deployable(&self) -> bool {
        self.findings().iter().all(|f| f.level != FindingLevel::Error)
    }
}
