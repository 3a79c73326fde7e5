//! Shared application state handed to every route.

use std::sync::Arc;

use services::services::{
    aggregator::{AggregatorClient, HttpAggregatorClient},
    dispatcher::WebhookDispatcher,
    queue::SyncQueue,
    reconciler::TransactionReconciler,
    scheduler::PeriodicSyncService,
    store::{LinkedAccountStore, PgStore, TransactionStore},
    sync::SyncOrchestrator,
    vault::CredentialVault,
    webhook::WebhookVerifier,
};
use sqlx::PgPool;

use crate::config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<ServerConfig>,
    pub vault: CredentialVault,
    pub verifier: Arc<WebhookVerifier>,
    pub aggregator: Arc<dyn AggregatorClient>,
    pub accounts: Arc<dyn LinkedAccountStore>,
    pub queue: SyncQueue,
    pub dispatcher: Arc<WebhookDispatcher>,
    pub orchestrator: Arc<SyncOrchestrator>,
}

impl AppState {
    pub fn new(config: ServerConfig, pool: PgPool) -> Self {
        let config = Arc::new(config);
        let vault = CredentialVault::new(&config.vault_key);
        let store = Arc::new(PgStore::new(pool.clone()));
        let accounts: Arc<dyn LinkedAccountStore> = store.clone();
        let transactions: Arc<dyn TransactionStore> = store;
        let aggregator: Arc<dyn AggregatorClient> = Arc::new(HttpAggregatorClient::new(
            config.aggregator_base_url.clone(),
            config.aggregator_client_id.clone(),
            config.aggregator_secret.clone(),
        ));
        let queue = SyncQueue::new(config.queue_capacity);
        let orchestrator = Arc::new(SyncOrchestrator::new(
            accounts.clone(),
            TransactionReconciler::new(transactions),
            aggregator.clone(),
            vault.clone(),
        ));
        let dispatcher = Arc::new(WebhookDispatcher::new(accounts.clone(), queue.clone()));

        Self {
            pool,
            config,
            vault,
            verifier: Arc::new(WebhookVerifier::default()),
            aggregator,
            accounts,
            queue,
            dispatcher,
            orchestrator,
        }
    }

    /// Start the worker pool and the periodic sweep. Called once from `main`.
    pub fn spawn_background_services(&self) {
        self.queue
            .spawn_workers(self.config.sync_workers, self.orchestrator.clone());
        PeriodicSyncService::spawn_with_interval(
            self.accounts.clone(),
            self.queue.clone(),
            self.config.sync_interval,
        );
    }
}
