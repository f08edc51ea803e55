//! `AgentService` — the facade the transport layer consumes.
//!
//! One instance per process. Turns for the same user serialize on a
//! per-user mutex; different users run concurrently.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use confab_core::config::ConfabConfig;
use confab_core::error::{ConfabError, Result};
use confab_core::observe::TracingObserver;
use confab_core::types::{MessageKind, Principal};
use confab_memory::{MemoryManager, StoredMessage};
use confab_providers::ProviderMux;
use confab_store::{Repository, SqliteRepository};
use confab_tools::builtin::{
    register_builtins, DisabledSearchBackend, HttpSearchBackend, SearchBackend,
};
use confab_tools::ToolRegistry;
use confab_training::TrainingTracker;

use crate::graph::{run_turn, AgentDeps};

/// Hard ceiling on `recall` limits, independent of what the caller asks.
const MAX_RECALL: usize = 50;

#[derive(Debug, Clone)]
pub struct ChatMetrics {
    pub provider: Option<String>,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub tool_loop_iterations: u32,
    pub rate_limit_waited_ms: u64,
    pub duration_ms: u64,
}

#[derive(Debug)]
pub struct ChatReply {
    pub response_text: String,
    pub conversation_id: String,
    pub tools_used: Vec<String>,
    pub metrics: ChatMetrics,
}

pub struct AgentService {
    deps: AgentDeps,
    user_locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl AgentService {
    pub fn new(deps: AgentDeps) -> Self {
        Self {
            deps,
            user_locks: DashMap::new(),
        }
    }

    /// Build the full dependency graph from configuration: SQLite store,
    /// provider pool, built-in tools, training tracker, tracing observer.
    pub fn from_config(config: &ConfabConfig) -> Result<Self> {
        let repo: Arc<dyn Repository> = Arc::new(
            SqliteRepository::open(&config.database.path)
                .map_err(|e| ConfabError::Repository(e.to_string()))?,
        );
        Self::with_repo(config, repo)
    }

    /// Same wiring with a caller-supplied repository (tests, in-memory DBs).
    pub fn with_repo(config: &ConfabConfig, repo: Arc<dyn Repository>) -> Result<Self> {
        let mux = Arc::new(ProviderMux::new());
        for settings in &config.providers {
            mux.add_provider(settings)
                .map_err(|e| ConfabError::Config(e.to_string()))?;
        }

        let search: Arc<dyn SearchBackend> = match config.search.endpoint.as_deref() {
            Some(url) if !url.is_empty() => Arc::new(HttpSearchBackend::new(
                url.to_string(),
                config.search.api_key.clone(),
                config.search.timeout_secs,
            )),
            _ => Arc::new(DisabledSearchBackend),
        };

        let mut registry = ToolRegistry::new();
        register_builtins(&mut registry, Arc::clone(&repo), search, None)
            .map_err(ConfabError::Config)?;

        Ok(Self::new(AgentDeps {
            repo: Arc::clone(&repo),
            mux,
            registry: Arc::new(registry),
            tracker: TrainingTracker::new(repo),
            observer: Arc::new(TracingObserver::new()),
            agent_config: config.agent.clone(),
            memory_config: config.memory.clone(),
        }))
    }

    fn user_lock(&self, user_id: i64) -> Arc<Mutex<()>> {
        self.user_locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn memory_for(&self, principal: &Principal) -> Result<MemoryManager> {
        let key = self
            .deps
            .repo
            .ensure_encryption_key(principal.id)
            .map_err(|e| ConfabError::Repository(e.to_string()))?;
        Ok(MemoryManager::with_limits(
            Arc::clone(&self.deps.repo),
            principal.id,
            key,
            self.deps.memory_config.max_general,
            self.deps.memory_config.max_ai,
        ))
    }

    /// Run one chat turn. Messages from the same user queue; messages from
    /// different users run concurrently.
    pub async fn chat(
        &self,
        principal: &Principal,
        text: &str,
        provider_pref: Option<&str>,
        conversation_id: Option<String>,
        cancel: Option<&CancellationToken>,
    ) -> Result<ChatReply> {
        if text.trim().is_empty() {
            return Err(ConfabError::Validation("message is empty".to_string()));
        }

        let lock = self.user_lock(principal.id);
        let _guard = lock.lock().await;

        let started = Instant::now();
        let outcome = run_turn(&self.deps, principal, text, provider_pref, cancel).await?;

        let conversation_id =
            conversation_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        info!(
            user_id = principal.id,
            conversation = %conversation_id,
            ms = started.elapsed().as_millis() as u64,
            "chat served"
        );

        Ok(ChatReply {
            response_text: outcome.response_text,
            conversation_id,
            tools_used: outcome.tools_used,
            metrics: ChatMetrics {
                provider: outcome.provider,
                tokens_in: outcome.tokens_in,
                tokens_out: outcome.tokens_out,
                tool_loop_iterations: outcome.tool_loop_iterations,
                rate_limit_waited_ms: outcome.rate_limit_waited_ms,
                duration_ms: started.elapsed().as_millis() as u64,
            },
        })
    }

    /// Read-only recall of the user's last messages, capped at 50.
    pub async fn recall(
        &self,
        principal: &Principal,
        limit: usize,
        kind: Option<MessageKind>,
    ) -> Result<Vec<StoredMessage>> {
        let lock = self.user_lock(principal.id);
        let _guard = lock.lock().await;

        let mut memory = self.memory_for(principal)?;
        memory
            .recall(limit.min(MAX_RECALL), kind)
            .map_err(|e| ConfabError::Repository(e.to_string()))
    }

    /// Ensure trainings are enrolled and produce the login reminder.
    pub async fn login_reminder(&self, principal: &Principal) -> Result<String> {
        let lock = self.user_lock(principal.id);
        let _guard = lock.lock().await;

        let mut memory = self.memory_for(principal)?;
        self.deps
            .tracker
            .on_login(principal, &mut memory)
            .map_err(|e| ConfabError::Internal(e.to_string()))
    }

    /// Persist training progress at logout, applying a final analysis when
    /// the caller supplies one.
    pub async fn save_progress_on_logout(
        &self,
        principal: &Principal,
        final_analysis: Option<&Value>,
    ) -> Result<()> {
        let lock = self.user_lock(principal.id);
        let _guard = lock.lock().await;

        let mut memory = self.memory_for(principal)?;
        self.deps
            .tracker
            .on_logout(&mut memory, final_analysis)
            .map_err(|e| ConfabError::Internal(e.to_string()))
    }
}
