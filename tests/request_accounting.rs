/// In-flight request accounting. Kept in its own binary so no other test
/// moves the process-wide gauge while these assertions run.
mod common;

use common::{certificate, context, StalledStore};
use ocsp_responder::{
    metrics,
    ocsp::request::{HashAlgorithm, OcspRequestBuilder},
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_abandoned_request_is_no_longer_counted_active() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(Arc::new(StalledStore), &dir.path().join("PIDFILE"));
    let body = OcspRequestBuilder::new(&certificate("ca.cer"), HashAlgorithm::Sha256)
        .unwrap()
        .add_serial(0x1001)
        .unwrap()
        .to_der()
        .unwrap();

    assert_eq!(metrics::OCSP_REQUESTS_ACTIVE.get(), 0);

    let mut pending = Box::pin(ctx.responder.respond(&body, "POST"));
    assert!(
        tokio::time::timeout(Duration::from_millis(100), pending.as_mut())
            .await
            .is_err()
    );
    assert_eq!(metrics::OCSP_REQUESTS_ACTIVE.get(), 1);

    // Client went away: the request future is dropped mid-lookup
    drop(pending);
    assert_eq!(metrics::OCSP_REQUESTS_ACTIVE.get(), 0);
}
