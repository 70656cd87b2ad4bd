//! Shared application state.

use crate::client::{CompletionClient, HttpCompletionClient};
use metering_config::MeteringConfig;
use metering_core::{CostEstimator, ModelSelector, PriceTable, TierCatalog};
use metering_ledger::UsageLedger;
use metering_snapshots::SnapshotService;
use metering_store::{MemoryStore, MeteringStore};
use metering_webhooks::{SignatureVerifier, WebhookIngestor};
use std::sync::Arc;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    /// Effective configuration.
    pub config: Arc<MeteringConfig>,
    /// Storage backend.
    pub store: Arc<dyn MeteringStore>,
    /// Enforcement core.
    pub ledger: UsageLedger,
    /// Webhook pipeline.
    pub ingestor: WebhookIngestor,
    /// Snapshot service.
    pub snapshots: SnapshotService,
    /// Tier-bounded model selection.
    pub selector: ModelSelector,
    /// Cost estimation over the price table.
    pub estimator: Arc<CostEstimator>,
    /// Tier catalog.
    pub catalog: TierCatalog,
    /// Completion backend.
    pub completions: Arc<dyn CompletionClient>,
}

impl AppState {
    /// Start building state.
    #[must_use]
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::default()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

/// Builder for [`AppState`]. Anything not supplied falls back to the
/// configuration's defaults: an in-memory store, the stock catalog and
/// price table, and an HTTP completion client pointed at the configured
/// backend.
#[derive(Default)]
pub struct AppStateBuilder {
    config: Option<MeteringConfig>,
    store: Option<Arc<dyn MeteringStore>>,
    catalog: Option<TierCatalog>,
    prices: Option<PriceTable>,
    completions: Option<Arc<dyn CompletionClient>>,
}

impl AppStateBuilder {
    /// Set the configuration.
    #[must_use]
    pub fn config(mut self, config: MeteringConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the storage backend.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn MeteringStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the tier catalog.
    #[must_use]
    pub fn catalog(mut self, catalog: TierCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Set the price table.
    #[must_use]
    pub fn prices(mut self, prices: PriceTable) -> Self {
        self.prices = Some(prices);
        self
    }

    /// Set the completion backend.
    #[must_use]
    pub fn completions(mut self, completions: Arc<dyn CompletionClient>) -> Self {
        self.completions = Some(completions);
        self
    }

    /// Assemble the state.
    ///
    /// # Errors
    /// Returns an error when no completion client was supplied and the
    /// default HTTP client cannot be constructed.
    pub fn build(self) -> Result<AppState, crate::client::CompletionError> {
        let config = Arc::new(self.config.unwrap_or_default());
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn MeteringStore>);
        let catalog = self.catalog.unwrap_or_else(TierCatalog::standard);
        let prices = self.prices.unwrap_or_else(PriceTable::standard);

        let completions = match self.completions {
            Some(completions) => completions,
            None => Arc::new(HttpCompletionClient::new(
                config.completion.base_url.clone(),
                config.completion.api_key.clone(),
                config.completion.timeout,
            )?) as Arc<dyn CompletionClient>,
        };

        let verifier = SignatureVerifier::new(
            config.webhooks.secret.clone(),
            config.webhooks.timestamp_tolerance,
        );

        Ok(AppState {
            ledger: UsageLedger::new(store.clone(), catalog.clone()),
            ingestor: WebhookIngestor::new(store.clone(), verifier),
            snapshots: SnapshotService::new(store.clone(), catalog.clone()),
            selector: ModelSelector,
            estimator: Arc::new(CostEstimator::new(prices)),
            catalog,
            config,
            store,
            completions,
        })
    }
}
