/// Configuration management for the OCSP responder
use crate::error::{ResponderError, ResponderResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Main responder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponderConfig {
    pub service: ServiceConfig,
    pub identity: IdentityConfig,
    pub storage: StorageConfig,
    pub protocol: ProtocolConfig,
}

/// Listener and process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub listen_address: String,
    pub pid_file: PathBuf,
    /// Serve HTTPS with the OCSP certificate as TLS identity
    pub tls_enabled: bool,
    pub max_request_bytes: usize,
    /// Grace period for in-flight requests on shutdown
    pub drain_timeout_secs: u64,
}

/// PEM file locations for the responder identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub ca_cert: PathBuf,
    pub ocsp_cert: PathBuf,
    pub ocsp_key: PathBuf,
}

/// Revocation store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database_url: String,
}

/// OCSP response configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// nextUpdate offset; omitted from responses when unset
    pub next_update_secs: Option<u64>,
}

/// Log output format, chosen with `OCSP_LOG_FORMAT` or `--log-format`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ResponderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(ResponderError::Config(format!("Unknown log format: {}", other))),
        }
    }
}

impl ResponderConfig {
    /// Load configuration from environment variables (and `.env` if present)
    pub fn from_env() -> ResponderResult<Self> {
        dotenv::dotenv().ok();

        let listen_address =
            env::var("OCSP_LISTEN_ADDRESS").unwrap_or_else(|_| "0.0.0.0:1443".to_string());
        let pid_file: PathBuf = env::var("OCSP_PID_FILE")
            .unwrap_or_else(|_| "PIDFILE".to_string())
            .into();
        let tls_enabled = env::var("OCSP_TLS_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .map_err(|_| ResponderError::Config("OCSP_TLS_ENABLED must be true or false".to_string()))?;
        let max_request_bytes = env::var("OCSP_MAX_REQUEST_BYTES")
            .unwrap_or_else(|_| "65536".to_string())
            .parse()
            .map_err(|_| ResponderError::Config("Invalid OCSP_MAX_REQUEST_BYTES".to_string()))?;
        let drain_timeout_secs = env::var("OCSP_DRAIN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|_| ResponderError::Config("Invalid OCSP_DRAIN_TIMEOUT_SECS".to_string()))?;

        let ca_cert = env::var("CA_CRT_FILENAME")
            .unwrap_or_else(|_| "certificates/ca.cer".to_string())
            .into();
        let ocsp_cert = env::var("OCSP_CERT_FILENAME")
            .unwrap_or_else(|_| "certificates/ocsp.cer".to_string())
            .into();
        let ocsp_key = env::var("OCSP_KEY_FILENAME")
            .unwrap_or_else(|_| "certificates/ocsp.key".to_string())
            .into();

        let database_url = env::var("DATABASE_URL").unwrap_or_default();

        let next_update_secs = match env::var("OCSP_NEXT_UPDATE_SECS") {
            Ok(value) if !value.trim().is_empty() => Some(value.trim().parse().map_err(|_| {
                ResponderError::Config("Invalid OCSP_NEXT_UPDATE_SECS".to_string())
            })?),
            _ => None,
        };

        Ok(ResponderConfig {
            service: ServiceConfig {
                listen_address,
                pid_file,
                tls_enabled,
                max_request_bytes,
                drain_timeout_secs,
            },
            identity: IdentityConfig {
                ca_cert,
                ocsp_cert,
                ocsp_key,
            },
            storage: StorageConfig { database_url },
            protocol: ProtocolConfig { next_update_secs },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> ResponderResult<()> {
        self.listen_addr()?;

        if self.storage.database_url.is_empty() {
            return Err(ResponderError::Config(
                "DATABASE_URL (or --dburl) is required".to_string(),
            ));
        }

        if self.service.max_request_bytes == 0 {
            return Err(ResponderError::Config(
                "OCSP_MAX_REQUEST_BYTES must be greater than zero".to_string(),
            ));
        }

        if self.protocol.next_update_secs == Some(0) {
            return Err(ResponderError::Config(
                "OCSP_NEXT_UPDATE_SECS must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    pub fn listen_addr(&self) -> ResponderResult<SocketAddr> {
        self.service.listen_address.parse().map_err(|_| {
            ResponderError::Config(format!(
                "Invalid listen address: {}",
                self.service.listen_address
            ))
        })
    }

    pub fn next_update(&self) -> Option<chrono::Duration> {
        self.protocol
            .next_update_secs
            .and_then(|secs| i64::try_from(secs).ok())
            .map(chrono::Duration::seconds)
    }

    pub fn drain_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.service.drain_timeout_secs)
    }
}
