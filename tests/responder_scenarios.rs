/// End-to-end responder scenarios: request bytes in, signed response bytes out
mod common;

use common::{certificate, context, FailingStore, Failure};
use ocsp_responder::{
    ocsp::{
        asn1::OcspResponseStatus,
        request::{HashAlgorithm, Nonce, OcspRequestBuilder},
        resolver::IssuerIdentity,
        response::ParsedResponse,
    },
    store::{
        CertificateStatus, MemoryRevocationStore, RevocationReason, RevocationStore,
        SqliteRevocationStore,
    },
    ResponderError,
};
use std::sync::Arc;

async fn scenario_store(store: &dyn RevocationStore) -> chrono::DateTime<chrono::Utc> {
    let expiry = chrono::Utc::now() + chrono::Duration::days(365);
    store.record_issued(0x1001, expiry, "agent-01").await.unwrap();
    store.record_issued(0x1002, expiry, "agent-02").await.unwrap();
    store
        .record_revocation(0x1002, RevocationReason::KeyCompromise, "key leaked")
        .await
        .unwrap()
        .revoked_at
}

fn request(serials: &[u64], nonce: Option<Nonce>) -> Vec<u8> {
    let mut builder = OcspRequestBuilder::new(&certificate("ca.cer"), HashAlgorithm::Sha1).unwrap();
    for serial in serials {
        builder = builder.add_serial(*serial).unwrap();
    }
    if let Some(nonce) = nonce {
        builder = builder.with_nonce(nonce);
    }
    builder.to_der().unwrap()
}

fn statuses(response: &[u8]) -> Vec<CertificateStatus> {
    ParsedResponse::from_der(response)
        .unwrap()
        .statuses()
        .unwrap()
        .into_iter()
        .map(|(_, status)| status)
        .collect()
}

#[tokio::test]
async fn test_good_and_revoked_scenario_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("ocsp.sqlite").display());
    let store = Arc::new(SqliteRevocationStore::connect(&url).await.unwrap());
    let revoked_at = scenario_store(store.as_ref()).await;

    let ctx = context(store, &dir.path().join("PIDFILE"));
    let bytes = ctx.responder.respond(&request(&[0x1001, 0x1002], None), "POST").await;

    let parsed = ParsedResponse::from_der(&bytes).unwrap();
    assert_eq!(parsed.status, OcspResponseStatus::Successful);
    parsed.verify_signature(&certificate("ocsp.cer")).unwrap();

    assert_eq!(
        statuses(&bytes),
        vec![
            CertificateStatus::Good,
            CertificateStatus::Revoked {
                reason: RevocationReason::KeyCompromise,
                revoked_at,
            },
        ]
    );
}

#[tokio::test]
async fn test_response_echoes_cert_ids_in_request_order() {
    let store = Arc::new(MemoryRevocationStore::new());
    scenario_store(store.as_ref()).await;
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(store, &dir.path().join("PIDFILE"));

    let serials = [0x1002, 0x5555, 0x1001, 0x1002];
    let bytes = ctx.responder.respond(&request(&serials, None), "POST").await;

    let issuer = IssuerIdentity::from_certificate(&certificate("ca.cer")).unwrap();
    let entries = ParsedResponse::from_der(&bytes).unwrap().statuses().unwrap();
    assert_eq!(entries.len(), serials.len());
    for ((cert_id, _), serial) in entries.iter().zip(serials) {
        assert_eq!(*cert_id, issuer.cert_id(HashAlgorithm::Sha1, serial).unwrap());
    }

    let found: Vec<_> = entries.iter().map(|(_, status)| status.as_str()).collect();
    assert_eq!(found, vec!["revoked", "unknown", "good", "revoked"]);
}

#[tokio::test]
async fn test_same_request_twice_gives_same_statuses() {
    let store = Arc::new(MemoryRevocationStore::new());
    scenario_store(store.as_ref()).await;
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(store, &dir.path().join("PIDFILE"));
    let body = request(&[0x1001, 0x1002, 0x1003], None);

    let first = ctx.responder.respond(&body, "POST").await;
    let second = ctx.responder.respond(&body, "POST").await;

    assert_eq!(statuses(&first), statuses(&second));
}

#[tokio::test]
async fn test_revocation_never_reverts() {
    let store = Arc::new(MemoryRevocationStore::new());
    let revoked_at = scenario_store(store.as_ref()).await;
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(store.clone(), &dir.path().join("PIDFILE"));

    // A second revocation attempt and a re-registration leave the entry alone
    let again = store
        .record_revocation(0x1002, RevocationReason::Superseded, "")
        .await;
    assert!(matches!(again, Err(ResponderError::AlreadyRevoked(0x1002))));
    store
        .record_issued(0x1002, chrono::Utc::now(), "re-issued")
        .await
        .unwrap();

    let bytes = ctx.responder.respond(&request(&[0x1002], None), "POST").await;
    assert_eq!(
        statuses(&bytes),
        vec![CertificateStatus::Revoked {
            reason: RevocationReason::KeyCompromise,
            revoked_at,
        }]
    );
}

#[tokio::test]
async fn test_nonce_in_nonce_out() {
    let store = Arc::new(MemoryRevocationStore::new());
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(store, &dir.path().join("PIDFILE"));

    let nonce = Nonce::from_value(&rand::random::<[u8; 16]>()).unwrap();
    let with = ctx
        .responder
        .respond(&request(&[1], Some(nonce.clone())), "POST")
        .await;
    let without = ctx.responder.respond(&request(&[1], None), "POST").await;

    assert_eq!(ParsedResponse::from_der(&with).unwrap().nonce().unwrap(), Some(nonce));
    assert_eq!(ParsedResponse::from_der(&without).unwrap().nonce().unwrap(), None);
}

#[tokio::test]
async fn test_openssl_request_with_nonce_is_echoed() {
    let store = Arc::new(MemoryRevocationStore::new());
    scenario_store(store.as_ref()).await;
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(store, &dir.path().join("PIDFILE"));

    let body = std::fs::read(common::fixture("openssl_sha1_nonce.der")).unwrap();
    let sent = ocsp_responder::ocsp::request::decode_request(&body)
        .unwrap()
        .nonce
        .unwrap();

    let bytes = ctx.responder.respond(&body, "POST").await;
    let parsed = ParsedResponse::from_der(&bytes).unwrap();

    assert_eq!(parsed.nonce().unwrap(), Some(sent));
    assert_eq!(
        statuses(&bytes).iter().map(|s| s.as_str()).collect::<Vec<_>>(),
        vec!["good", "revoked"]
    );
}

#[tokio::test]
async fn test_zero_entry_request_is_malformed() {
    let store = Arc::new(MemoryRevocationStore::new());
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(store.clone(), &dir.path().join("PIDFILE"));

    let bytes = ctx.responder.respond(&request(&[], None), "POST").await;

    let parsed = ParsedResponse::from_der(&bytes).unwrap();
    assert_eq!(parsed.status, OcspResponseStatus::MalformedRequest);
    assert!(parsed.basic.is_none());
    assert_eq!(store.lookup_count(), 0);
}

#[tokio::test]
async fn test_foreign_issuer_is_unknown_without_store_access() {
    let store = Arc::new(MemoryRevocationStore::new());
    scenario_store(store.as_ref()).await;
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(store.clone(), &dir.path().join("PIDFILE"));

    let body = OcspRequestBuilder::new(&certificate("other_ca.cer"), HashAlgorithm::Sha256)
        .unwrap()
        .add_serial(0x1001)
        .unwrap()
        .to_der()
        .unwrap();
    let bytes = ctx.responder.respond(&body, "POST").await;

    assert_eq!(statuses(&bytes), vec![CertificateStatus::Unknown]);
    assert_eq!(store.lookup_count(), 0);
}

#[tokio::test]
async fn test_unreachable_store_gets_try_later() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(
        Arc::new(FailingStore::new(Failure::Unavailable)),
        &dir.path().join("PIDFILE"),
    );

    let bytes = ctx.responder.respond(&request(&[0x1001], None), "POST").await;
    let parsed = ParsedResponse::from_der(&bytes).unwrap();
    assert_eq!(parsed.status, OcspResponseStatus::TryLater);
    assert!(parsed.basic.is_none());
}

#[tokio::test]
async fn test_store_fault_gets_internal_error() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(
        Arc::new(FailingStore::new(Failure::Corrupt)),
        &dir.path().join("PIDFILE"),
    );

    let bytes = ctx.responder.respond(&request(&[0x1001], None), "POST").await;
    let parsed = ParsedResponse::from_der(&bytes).unwrap();
    assert_eq!(parsed.status, OcspResponseStatus::InternalError);
    assert!(parsed.basic.is_none());
}
