/// Revocation store adapters
///
/// The responder only reads certificate status; the `revoke` and `register`
/// commands are the only writers. Revocation is monotonic: there is no
/// operation that removes a revocation entry.

pub mod memory;
pub mod postgres;
pub mod sqlite;

pub use memory::MemoryRevocationStore;
pub use postgres::PostgresRevocationStore;
pub use sqlite::SqliteRevocationStore;

use crate::error::{ResponderError, ResponderResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use der::Enumerated;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// CRLReason codes (RFC 5280 §5.3.1). Code 7 is unassigned.
#[derive(Enumerated, Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[repr(u32)]
pub enum RevocationReason {
    Unspecified = 0,
    KeyCompromise = 1,
    CaCompromise = 2,
    AffiliationChanged = 3,
    Superseded = 4,
    CessationOfOperation = 5,
    CertificateHold = 6,
    RemoveFromCrl = 8,
    PrivilegeWithdrawn = 9,
    AaCompromise = 10,
}

impl RevocationReason {
    pub fn from_code(code: i64) -> ResponderResult<Self> {
        match code {
            0 => Ok(RevocationReason::Unspecified),
            1 => Ok(RevocationReason::KeyCompromise),
            2 => Ok(RevocationReason::CaCompromise),
            3 => Ok(RevocationReason::AffiliationChanged),
            4 => Ok(RevocationReason::Superseded),
            5 => Ok(RevocationReason::CessationOfOperation),
            6 => Ok(RevocationReason::CertificateHold),
            8 => Ok(RevocationReason::RemoveFromCrl),
            9 => Ok(RevocationReason::PrivilegeWithdrawn),
            10 => Ok(RevocationReason::AaCompromise),
            other => Err(ResponderError::InvalidReason(other)),
        }
    }

    pub fn code(&self) -> i32 {
        *self as i32
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RevocationReason::Unspecified => "unspecified",
            RevocationReason::KeyCompromise => "keyCompromise",
            RevocationReason::CaCompromise => "cACompromise",
            RevocationReason::AffiliationChanged => "affiliationChanged",
            RevocationReason::Superseded => "superseded",
            RevocationReason::CessationOfOperation => "cessationOfOperation",
            RevocationReason::CertificateHold => "certificateHold",
            RevocationReason::RemoveFromCrl => "removeFromCRL",
            RevocationReason::PrivilegeWithdrawn => "privilegeWithdrawn",
            RevocationReason::AaCompromise => "aACompromise",
        }
    }
}

/// Status reported for one queried certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateStatus {
    Good,
    Revoked {
        reason: RevocationReason,
        revoked_at: DateTime<Utc>,
    },
    Unknown,
}

impl CertificateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateStatus::Good => "good",
            CertificateStatus::Revoked { .. } => "revoked",
            CertificateStatus::Unknown => "unknown",
        }
    }
}

/// Revocation entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revocation {
    pub reason: RevocationReason,
    pub revoked_at: DateTime<Utc>,
    pub info: String,
}

/// Everything the store knows about one serial number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub serial: u64,
    pub description: Option<String>,
    pub expiry: Option<DateTime<Utc>>,
    pub revocation: Option<Revocation>,
}

impl StatusRecord {
    /// Expiry is not consulted: an expired, unrevoked certificate is `Good`.
    pub fn status(&self) -> CertificateStatus {
        match &self.revocation {
            Some(revocation) => CertificateStatus::Revoked {
                reason: revocation.reason,
                revoked_at: revocation.revoked_at,
            },
            None => CertificateStatus::Good,
        }
    }
}

/// Query and write interface the responder needs from the certificate ledger.
///
/// Implementations must be safe for concurrent reads. `record_revocation`
/// must be atomic per serial: concurrent calls yield one success and
/// `AlreadyRevoked` for the rest.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Look up a serial number. `None` when neither issued nor revoked.
    async fn status(&self, serial: u64) -> ResponderResult<Option<StatusRecord>>;

    /// Mark a serial revoked. Fails with `AlreadyRevoked` if it already is.
    async fn record_revocation(
        &self,
        serial: u64,
        reason: RevocationReason,
        info: &str,
    ) -> ResponderResult<Revocation>;

    /// Record an issued certificate so it reports `Good`.
    async fn record_issued(
        &self,
        serial: u64,
        expiry: DateTime<Utc>,
        description: &str,
    ) -> ResponderResult<()>;

    /// Cheap reachability check for readiness probes
    async fn ping(&self) -> ResponderResult<()>;
}

/// Open the store named by a connection string.
///
/// `sqlite:` URLs open (and create) a SQLite database, `postgres://` and
/// `postgresql://` URLs connect to PostgreSQL. Migrations run on connect.
pub async fn connect(url: &str) -> ResponderResult<Arc<dyn RevocationStore>> {
    if url.starts_with("sqlite:") {
        let store = SqliteRevocationStore::connect(url).await?;
        Ok(Arc::new(store))
    } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        let store = PostgresRevocationStore::connect(url).await?;
        Ok(Arc::new(store))
    } else {
        Err(ResponderError::Config(format!(
            "Unsupported store connection string (expected sqlite: or postgres://): {}",
            redact_url(url)
        )))
    }
}

/// Serial numbers are stored and displayed as 16 lowercase hex digits
pub fn format_serial(serial: u64) -> String {
    format!("{:016x}", serial)
}

/// Parse an operator-supplied hex serial (`feeddeadbeef1234`, `0x1001`, `10:01`)
pub fn parse_serial(input: &str) -> ResponderResult<u64> {
    let trimmed = input.trim();
    let digits: String = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed)
        .chars()
        .filter(|c| *c != ':')
        .collect();

    if digits.is_empty() || digits.len() > 16 {
        return Err(ResponderError::Config(format!(
            "Serial number must be 1 to 16 hex digits: {}",
            input
        )));
    }

    u64::from_str_radix(&digits, 16).map_err(|e| {
        ResponderError::Config(format!("Could not parse serial number {}: {}", input, e))
    })
}

pub(crate) fn parse_timestamp(value: &str) -> ResponderResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ResponderError::Internal(format!("Corrupt timestamp {:?} in store: {}", value, e)))
}

pub(crate) fn decode_revocation(
    reason: i32,
    info: String,
    revoked_at: &str,
) -> ResponderResult<Revocation> {
    Ok(Revocation {
        reason: RevocationReason::from_code(i64::from(reason))?,
        revoked_at: parse_timestamp(revoked_at)?,
        info,
    })
}

/// Hide credentials before a connection string reaches a log line
pub(crate) fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
