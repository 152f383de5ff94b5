use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    /// Period of the mirror index sweep. `None` disables it.
    pub reconcile_interval: Option<Duration>,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = lookup("THREADLINE_JWT_SECRET").unwrap_or_else(|| "dev-secret-change-me".into());
        let db_path = lookup("THREADLINE_DB_PATH").unwrap_or_else(|| "threadline.db".into());
        let host = lookup("THREADLINE_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = match lookup("THREADLINE_PORT") {
            Some(port) => port
                .parse()
                .with_context(|| format!("THREADLINE_PORT is not a port: {:?}", port))?,
            None => 3000,
        };
        let reconcile_interval = match lookup("THREADLINE_RECONCILE_INTERVAL_SECS") {
            Some(secs) => {
                let secs: u64 = secs.parse().with_context(|| {
                    format!("THREADLINE_RECONCILE_INTERVAL_SECS is not a number: {:?}", secs)
                })?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            None => None,
        };

        Ok(Self {
            jwt_secret,
            db_path: PathBuf::from(db_path),
            host,
            port,
            reconcile_interval,
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("bad listen address {}:{}", self.host, self.port))
    }
}
