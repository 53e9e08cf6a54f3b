//! Shared process state handed to every router (SPEC_FULL.md §5 "Shared
//! resources"): the Bedrock invoker, the PTC session map and orchestrator,
//! the sandbox executor, and the store collaborators. Constructed once at
//! startup and cloned cheaply (every field is an `Arc`) into each request.

use std::collections::HashMap;
use std::sync::Arc;

use crate::bedrock::invoker::BedrockInvoker;
use crate::config::Settings;
use crate::ptc::sandbox::SandboxExecutor;
use crate::ptc::session::SessionStore;
use crate::ptc::{InMemorySandbox, PtcOrchestrator};
use crate::store::{ApiKeyStore, InMemoryStore, PricingStore, UsageStore};

#[derive(Clone)]
pub struct AppContext {
    pub settings: Arc<Settings>,
    pub invoker: Arc<BedrockInvoker>,
    pub model_mapping: Arc<HashMap<String, String>>,
    pub ptc_sessions: SessionStore,
    pub ptc_orchestrator: Arc<PtcOrchestrator>,
    pub sandbox: Arc<dyn SandboxExecutor>,
    pub api_keys: Arc<dyn ApiKeyStore>,
    pub usage: Arc<dyn UsageStore>,
    pub pricing: Arc<dyn PricingStore>,
}

impl AppContext {
    pub async fn build(settings: Settings) -> anyhow::Result<Self> {
        let settings = Arc::new(settings);
        let model_mapping = Arc::new(Settings::default_model_mapping());
        let invoker = Arc::new(BedrockInvoker::new(&settings).await?);
        let sandbox: Arc<dyn SandboxExecutor> = Arc::new(InMemorySandbox::new());
        let ptc_sessions = SessionStore::new();
        let store = Arc::new(InMemoryStore::new());

        let ptc_orchestrator = Arc::new(PtcOrchestrator::new(
            invoker.clone(),
            ptc_sessions.clone(),
            sandbox.clone(),
            settings.clone(),
            (*model_mapping).clone(),
        ));

        Ok(Self {
            settings,
            invoker,
            model_mapping,
            ptc_sessions,
            ptc_orchestrator,
            sandbox,
            api_keys: store.clone(),
            usage: store.clone(),
            pricing: store,
        })
    }
}
