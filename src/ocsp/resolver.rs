/// Status resolution against the configured CA and the revocation store
use super::asn1::CertId;
use super::request::{serial_from_u64, HashAlgorithm, OcspQuery};
use crate::error::ResponderResult;
use crate::metrics;
use crate::store::{format_serial, CertificateStatus, RevocationStore};
use der::asn1::{Any, OctetString};
use der::Encode;
use futures::future::try_join_all;
use spki::AlgorithmIdentifierOwned;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use x509_cert::Certificate;

/// The parts of the CA certificate a CertID is computed from
#[derive(Debug, Clone)]
pub struct IssuerIdentity {
    subject_der: Vec<u8>,
    public_key: Vec<u8>,
}

impl IssuerIdentity {
    pub fn from_certificate(ca: &Certificate) -> ResponderResult<Self> {
        Ok(Self {
            subject_der: ca.tbs_certificate.subject.to_der()?,
            public_key: ca
                .tbs_certificate
                .subject_public_key_info
                .subject_public_key
                .raw_bytes()
                .to_vec(),
        })
    }

    pub fn name_hash(&self, algorithm: HashAlgorithm) -> Vec<u8> {
        algorithm.digest(&self.subject_der)
    }

    pub fn key_hash(&self, algorithm: HashAlgorithm) -> Vec<u8> {
        algorithm.digest(&self.public_key)
    }

    /// Both issuer hashes, computed with the query's own algorithm, match this CA
    pub fn matches(&self, query: &OcspQuery) -> bool {
        query.issuer_name_hash() == self.name_hash(query.hash_algorithm).as_slice()
            && query.issuer_key_hash() == self.key_hash(query.hash_algorithm).as_slice()
    }

    pub fn cert_id(&self, algorithm: HashAlgorithm, serial: u64) -> ResponderResult<CertId> {
        Ok(CertId {
            hash_algorithm: AlgorithmIdentifierOwned {
                oid: algorithm.oid(),
                parameters: Some(Any::null()),
            },
            issuer_name_hash: OctetString::new(self.name_hash(algorithm))?,
            issuer_key_hash: OctetString::new(self.key_hash(algorithm))?,
            serial_number: serial_from_u64(serial)?,
        })
    }
}

/// Maps decoded queries to certificate statuses
pub struct StatusResolver {
    issuer: IssuerIdentity,
    store: Arc<dyn RevocationStore>,
}

impl StatusResolver {
    pub fn new(issuer: IssuerIdentity, store: Arc<dyn RevocationStore>) -> Self {
        Self { issuer, store }
    }

    /// Resolve every query concurrently. Output order follows input order.
    pub async fn resolve(&self, queries: &[OcspQuery]) -> ResponderResult<Vec<CertificateStatus>> {
        try_join_all(queries.iter().map(|query| self.resolve_one(query))).await
    }

    pub async fn resolve_one(&self, query: &OcspQuery) -> ResponderResult<CertificateStatus> {
        if !self.issuer.matches(query) {
            debug!("CertID issuer does not match the configured CA");
            return Ok(CertificateStatus::Unknown);
        }

        let serial = match query.serial_u64() {
            Some(serial) => serial,
            None => {
                debug!(
                    serial = %hex::encode(query.cert_id.serial_number.as_bytes()),
                    "Serial number outside the store's range"
                );
                return Ok(CertificateStatus::Unknown);
            }
        };

        let started = Instant::now();
        let record = self.store.status(serial).await;
        metrics::record_store_lookup(started.elapsed().as_secs_f64());

        let status = match record? {
            Some(record) => record.status(),
            None => CertificateStatus::Unknown,
        };

        debug!(serial = %format_serial(serial), status = status.as_str(), "Resolved certificate status");
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryRevocationStore, RevocationReason};
    use der::{Decode, DecodePem};

    const CA_PEM: &str = include_str!("../../tests/fixtures/ca.cer");
    const OTHER_CA_PEM: &str = include_str!("../../tests/fixtures/other_ca.cer");

    fn issuer(pem: &str) -> IssuerIdentity {
        IssuerIdentity::from_certificate(&Certificate::from_pem(pem).unwrap()).unwrap()
    }

    fn query(issuer: &IssuerIdentity, algorithm: HashAlgorithm, serial: u64) -> OcspQuery {
        OcspQuery {
            cert_id: issuer.cert_id(algorithm, serial).unwrap(),
            hash_algorithm: algorithm,
        }
    }

    async fn seeded_store() -> Arc<MemoryRevocationStore> {
        let store = Arc::new(MemoryRevocationStore::new());
        let expiry = chrono::Utc::now() + chrono::Duration::days(365);
        store.record_issued(0x1001, expiry, "good").await.unwrap();
        store.record_issued(0x1002, expiry, "revoked").await.unwrap();
        store
            .record_revocation(0x1002, RevocationReason::KeyCompromise, "")
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_resolves_good_revoked_unknown_in_order() {
        let store = seeded_store().await;
        let ca = issuer(CA_PEM);
        let resolver = StatusResolver::new(ca.clone(), store.clone());

        let statuses = resolver
            .resolve(&[
                query(&ca, HashAlgorithm::Sha1, 0x1002),
                query(&ca, HashAlgorithm::Sha256, 0x9999),
                query(&ca, HashAlgorithm::Sha512, 0x1001),
            ])
            .await
            .unwrap();

        assert!(matches!(
            statuses[0],
            CertificateStatus::Revoked {
                reason: RevocationReason::KeyCompromise,
                ..
            }
        ));
        assert_eq!(statuses[1], CertificateStatus::Unknown);
        assert_eq!(statuses[2], CertificateStatus::Good);
    }

    #[tokio::test]
    async fn test_issuer_mismatch_skips_store() {
        let store = seeded_store().await;
        let resolver = StatusResolver::new(issuer(CA_PEM), store.clone());
        let foreign = query(&issuer(OTHER_CA_PEM), HashAlgorithm::Sha1, 0x1001);

        let status = resolver.resolve_one(&foreign).await.unwrap();

        assert_eq!(status, CertificateStatus::Unknown);
        assert_eq!(store.lookup_count(), 0);
    }

    #[tokio::test]
    async fn test_negative_serial_is_unknown_without_lookup() {
        let store = seeded_store().await;
        let ca = issuer(CA_PEM);
        let resolver = StatusResolver::new(ca.clone(), store.clone());

        let mut negative = query(&ca, HashAlgorithm::Sha1, 1);
        negative.cert_id.serial_number =
            x509_cert::serial_number::SerialNumber::from_der(&[0x02, 0x02, 0x80, 0x01]).unwrap();

        assert_eq!(
            resolver.resolve_one(&negative).await.unwrap(),
            CertificateStatus::Unknown
        );
        assert_eq!(store.lookup_count(), 0);
    }

    #[test]
    fn test_hashes_differ_per_algorithm() {
        let ca = issuer(CA_PEM);
        assert_eq!(ca.name_hash(HashAlgorithm::Sha1).len(), 20);
        assert_eq!(ca.key_hash(HashAlgorithm::Sha384).len(), 48);
        assert_ne!(
            ca.name_hash(HashAlgorithm::Sha256),
            issuer(OTHER_CA_PEM).name_hash(HashAlgorithm::Sha256)
        );
    }
}
