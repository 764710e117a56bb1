/// In-memory revocation store
///
/// Used by tests and for running the responder without a database. The
/// lookup counter lets tests assert which queries reached the store.
use super::{Revocation, RevocationReason, RevocationStore, StatusRecord};
use crate::error::{ResponderError, ResponderResult};
use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct IssuedEntry {
    description: String,
    expiry: DateTime<Utc>,
}

#[derive(Default)]
pub struct MemoryRevocationStore {
    issued: RwLock<HashMap<u64, IssuedEntry>>,
    revoked: RwLock<HashMap<u64, Revocation>>,
    lookups: AtomicUsize,
}

impl MemoryRevocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `status` calls served so far
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RevocationStore for MemoryRevocationStore {
    async fn status(&self, serial: u64) -> ResponderResult<Option<StatusRecord>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);

        let issued = self.issued.read().await.get(&serial).cloned();
        let revocation = self.revoked.read().await.get(&serial).cloned();

        if issued.is_none() && revocation.is_none() {
            return Ok(None);
        }

        Ok(Some(StatusRecord {
            serial,
            description: issued.as_ref().map(|e| e.description.clone()),
            expiry: issued.map(|e| e.expiry),
            revocation,
        }))
    }

    async fn record_revocation(
        &self,
        serial: u64,
        reason: RevocationReason,
        info: &str,
    ) -> ResponderResult<Revocation> {
        // Check and insert under one write lock
        let mut revoked = self.revoked.write().await;
        if revoked.contains_key(&serial) {
            return Err(ResponderError::AlreadyRevoked(serial));
        }

        let revocation = Revocation {
            reason,
            revoked_at: Utc::now().trunc_subsecs(0),
            info: info.to_string(),
        };
        revoked.insert(serial, revocation.clone());
        Ok(revocation)
    }

    async fn record_issued(
        &self,
        serial: u64,
        expiry: DateTime<Utc>,
        description: &str,
    ) -> ResponderResult<()> {
        self.issued.write().await.insert(
            serial,
            IssuedEntry {
                description: description.to_string(),
                expiry,
            },
        );
        Ok(())
    }

    async fn ping(&self) -> ResponderResult<()> {
        Ok(())
    }
}
