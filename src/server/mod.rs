use std::sync::Arc;

use state_export::define_error;
use state_export::authorization::AuthorizationCodeService;
use state_export::config::Config;
use state_export::credentials::{CredentialCache, FileCredentialSource};
use state_export::crypto::{RandomSource, SystemRandomSource};
use state_export::envelope::backend_for;
use state_export::export::ExportOrchestrator;
use state_export::identity::StateIdentityVerifier;
use state_export::records::{
    AuthorizationCodeStore, DirectoryExportedFacts, DirectoryTaxReturns, ExportedFactsSource, MemoryAuthorizationCodeStore,
    TaxReturnSource,
};
use state_export::sanitizer::Sanitizer;
use state_export::token::TokenIssuer;

mod service;

pub use service::{ExportNewService, ExportService};

define_error!(StartupError; Credentials="cannot load state credentials", Envelope="cannot configure envelope encryption", Secret="invalid signing secret", Sanitizer="invalid excluded tags");

/// Long-lived collaborators shared by every connection.
pub struct Components {
    pub credentials: Arc<CredentialCache>,
    pub codes: Arc<dyn AuthorizationCodeStore>,
    pub authorization: Arc<AuthorizationCodeService>,
    pub export: Arc<ExportOrchestrator>,
}

impl Components {
    pub fn from_config(config: &Config) -> Result<Components, StartupError> {
        let random: Arc<dyn RandomSource> = Arc::new(SystemRandomSource::new());

        let source = FileCredentialSource::new(&config.state_credentials);
        let credentials = CredentialCache::new(Box::new(source), config.credential_cache_ttl())
            .map_err(|e| {
                error!("Cannot load state credentials from {}: {}", config.state_credentials.display(), e);
                StartupError::Credentials
            })?;
        let credentials = Arc::new(credentials);
        info!("Loaded {} state credentials", credentials.len());

        let envelope = backend_for(&config.encryption, Arc::clone(&random))
            .map_err(|e| {
                error!("Cannot configure envelope encryption: {}", e);
                StartupError::Envelope
            })?;
        let issuer = TokenIssuer::new(
            config.signing_secret.as_bytes(),
            envelope,
            config.authorization_code_ttl(),
            &config.encryption_context_system,
        ).or(Err(StartupError::Secret))?;
        let issuer = Arc::new(issuer);

        let sanitizer = Sanitizer::new(&config.excluded_tags)
            .map_err(|e| {
                error!("Cannot compile excluded tags: {}", e);
                StartupError::Sanitizer
            })?;

        let codes: Arc<dyn AuthorizationCodeStore> = Arc::new(MemoryAuthorizationCodeStore::new());
        let tax_returns: Arc<dyn TaxReturnSource> = Arc::new(DirectoryTaxReturns::new(&config.tax_returns));
        let facts: Arc<dyn ExportedFactsSource> = Arc::new(DirectoryExportedFacts::new(&config.exported_facts));

        let authorization = AuthorizationCodeService::new(
            Arc::clone(&issuer),
            Arc::clone(&codes),
            Arc::clone(&tax_returns),
            Arc::clone(&credentials),
        );
        let export = ExportOrchestrator::new(
            config.export_settings(),
            Arc::new(StateIdentityVerifier::new(Arc::clone(&credentials))),
            issuer,
            Arc::clone(&codes),
            tax_returns,
            facts,
            Arc::new(sanitizer),
            random,
        );

        Ok(Components {
            credentials,
            codes,
            authorization: Arc::new(authorization),
            export: Arc::new(export),
        })
    }
}
