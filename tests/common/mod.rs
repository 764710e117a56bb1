//! Shared fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use der::DecodePem;
use ocsp_responder::{
    config::{IdentityConfig, ProtocolConfig, ResponderConfig, ServiceConfig, StorageConfig},
    context::AppContext,
    identity::ResponderIdentity,
    store::{Revocation, RevocationReason, RevocationStore, StatusRecord},
    ResponderError, ResponderResult,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use x509_cert::Certificate;

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn certificate(name: &str) -> Certificate {
    Certificate::from_pem(std::fs::read(fixture(name)).unwrap()).unwrap()
}

pub fn identity() -> ResponderIdentity {
    ResponderIdentity::load(
        &fixture("ca.cer"),
        &fixture("ocsp.cer"),
        &fixture("ocsp.key"),
    )
    .unwrap()
}

/// Plain-HTTP config on an ephemeral loopback port
pub fn test_config(database_url: &str, pid_file: &Path) -> ResponderConfig {
    ResponderConfig {
        service: ServiceConfig {
            listen_address: "127.0.0.1:0".to_string(),
            pid_file: pid_file.to_path_buf(),
            tls_enabled: false,
            max_request_bytes: 4096,
            drain_timeout_secs: 2,
        },
        identity: IdentityConfig {
            ca_cert: fixture("ca.cer"),
            ocsp_cert: fixture("ocsp.cer"),
            ocsp_key: fixture("ocsp.key"),
        },
        storage: StorageConfig {
            database_url: database_url.to_string(),
        },
        protocol: ProtocolConfig {
            next_update_secs: Some(300),
        },
    }
}

pub fn context(store: Arc<dyn RevocationStore>, pid_file: &Path) -> AppContext {
    AppContext::from_parts(test_config("sqlite::memory:", pid_file), identity(), store).unwrap()
}

fn read_only() -> ResponderError {
    ResponderError::Internal("test store is read-only".to_string())
}

/// Store whose lookups never complete
pub struct StalledStore;

#[async_trait]
impl RevocationStore for StalledStore {
    async fn status(&self, _serial: u64) -> ResponderResult<Option<StatusRecord>> {
        std::future::pending().await
    }

    async fn record_revocation(
        &self,
        _serial: u64,
        _reason: RevocationReason,
        _info: &str,
    ) -> ResponderResult<Revocation> {
        Err(read_only())
    }

    async fn record_issued(
        &self,
        _serial: u64,
        _expiry: DateTime<Utc>,
        _description: &str,
    ) -> ResponderResult<()> {
        Err(read_only())
    }

    async fn ping(&self) -> ResponderResult<()> {
        Ok(())
    }
}

/// Which error a `FailingStore` reports
#[derive(Debug, Clone, Copy)]
pub enum Failure {
    /// Database cannot be reached
    Unavailable,
    /// Stored row cannot be decoded
    Corrupt,
}

/// Store that fails every call until `recover` is called, then knows no serials
pub struct FailingStore {
    failure: Failure,
    failing: AtomicBool,
}

impl FailingStore {
    pub fn new(failure: Failure) -> Self {
        Self {
            failure,
            failing: AtomicBool::new(true),
        }
    }

    pub fn recover(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }

    fn check(&self) -> ResponderResult<()> {
        if !self.failing.load(Ordering::SeqCst) {
            return Ok(());
        }
        Err(match self.failure {
            Failure::Unavailable => ResponderError::StoreUnavailable(sqlx::Error::PoolTimedOut),
            Failure::Corrupt => {
                ResponderError::Internal("Corrupt timestamp \"yesterday\" in store".to_string())
            }
        })
    }
}

#[async_trait]
impl RevocationStore for FailingStore {
    async fn status(&self, _serial: u64) -> ResponderResult<Option<StatusRecord>> {
        self.check()?;
        Ok(None)
    }

    async fn record_revocation(
        &self,
        _serial: u64,
        _reason: RevocationReason,
        _info: &str,
    ) -> ResponderResult<Revocation> {
        self.check()?;
        Err(read_only())
    }

    async fn record_issued(
        &self,
        _serial: u64,
        _expiry: DateTime<Utc>,
        _description: &str,
    ) -> ResponderResult<()> {
        self.check()?;
        Err(read_only())
    }

    async fn ping(&self) -> ResponderResult<()> {
        self.check()
    }
}

/// Store that answers `Good` for every serial after `delay`
pub struct SlowStore {
    delay: Duration,
    lookups_started: AtomicUsize,
    entered: Notify,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            lookups_started: AtomicUsize::new(0),
            entered: Notify::new(),
        }
    }

    /// Wait until at least one lookup is in progress
    pub async fn wait_for_lookup(&self) {
        loop {
            let entered = self.entered.notified();
            if self.lookups_started.load(Ordering::SeqCst) > 0 {
                return;
            }
            entered.await;
        }
    }
}

#[async_trait]
impl RevocationStore for SlowStore {
    async fn status(&self, serial: u64) -> ResponderResult<Option<StatusRecord>> {
        self.lookups_started.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_waiters();
        tokio::time::sleep(self.delay).await;

        Ok(Some(StatusRecord {
            serial,
            description: Some("slow".to_string()),
            expiry: None,
            revocation: None,
        }))
    }

    async fn record_revocation(
        &self,
        _serial: u64,
        _reason: RevocationReason,
        _info: &str,
    ) -> ResponderResult<Revocation> {
        Err(read_only())
    }

    async fn record_issued(
        &self,
        _serial: u64,
        _expiry: DateTime<Utc>,
        _description: &str,
    ) -> ResponderResult<()> {
        Err(read_only())
    }

    async fn ping(&self) -> ResponderResult<()> {
        Ok(())
    }
}
