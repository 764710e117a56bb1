/// Application context and dependency injection
use crate::{
    config::ResponderConfig,
    error::ResponderResult,
    identity::ResponderIdentity,
    ocsp::{resolver::IssuerIdentity, resolver::StatusResolver, response::ResponseSigner, OcspResponder},
    store::{self, RevocationStore},
};
use std::sync::Arc;
use tracing::info;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ResponderConfig>,
    pub identity: Arc<ResponderIdentity>,
    pub store: Arc<dyn RevocationStore>,
    pub responder: Arc<OcspResponder>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ResponderConfig) -> ResponderResult<Self> {
        // Validate configuration
        config.validate()?;

        let identity = ResponderIdentity::load(
            &config.identity.ca_cert,
            &config.identity.ocsp_cert,
            &config.identity.ocsp_key,
        )?;

        info!("... connecting to revocation store");
        let store = store::connect(&config.storage.database_url).await?;

        Self::from_parts(config, identity, store)
    }

    /// Assemble a context from an already loaded identity and store
    pub fn from_parts(
        config: ResponderConfig,
        identity: ResponderIdentity,
        store: Arc<dyn RevocationStore>,
    ) -> ResponderResult<Self> {
        let resolver = StatusResolver::new(
            IssuerIdentity::from_certificate(&identity.ca_cert)?,
            store.clone(),
        );
        let signer = ResponseSigner::new(
            identity.signing_key.clone(),
            identity.signer_cert.clone(),
            config.next_update(),
        );

        Ok(Self {
            config: Arc::new(config),
            identity: Arc::new(identity),
            store,
            responder: Arc::new(OcspResponder::new(resolver, signer)),
        })
    }
}
