use std::sync::Arc;

use tracing::{debug, warn};

use confab_core::types::MessageKind;
use confab_store::Repository;

use crate::error::Result;
use crate::filter::is_internal_prompt;
use crate::types::*;

/// Decrypted view of one user's memory, loaded lazily on first use.
///
/// Not internally synchronized: callers serialize access per user (the
/// agent holds a user-scoped mutex for the whole turn). A blob that fails
/// to decrypt is treated as missing — the on-disk state is always a
/// well-formed checkpoint, so the worst outcome is starting fresh.
pub struct MemoryManager {
    repo: Arc<dyn Repository>,
    user_id: i64,
    key: String,
    max_general: usize,
    max_ai: usize,
    view: Option<MemoryView>,
    dirty: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryStats {
    pub total_messages: usize,
    pub general_count: usize,
    pub ai_count: usize,
    pub last_updated: String,
    pub version: String,
}

impl MemoryManager {
    pub fn new(repo: Arc<dyn Repository>, user_id: i64, key: String) -> Self {
        Self::with_limits(repo, user_id, key, DEFAULT_MAX_GENERAL, DEFAULT_MAX_AI)
    }

    pub fn with_limits(
        repo: Arc<dyn Repository>,
        user_id: i64,
        key: String,
        max_general: usize,
        max_ai: usize,
    ) -> Self {
        Self {
            repo,
            user_id,
            key,
            max_general,
            max_ai,
            view: None,
            dirty: false,
        }
    }

    /// Force the lazy load and return the current view.
    pub fn view(&mut self) -> Result<&MemoryView> {
        self.ensure_loaded()?;
        Ok(self.view.as_ref().expect("loaded above"))
    }

    fn ensure_loaded(&mut self) -> Result<()> {
        if self.view.is_some() {
            return Ok(());
        }

        let blob = self.repo.get_encrypted_memory(self.user_id)?;
        let view = match blob {
            Some(ciphertext) if confab_crypto::is_encrypted(&ciphertext) => {
                match confab_crypto::decrypt(&self.key, &ciphertext)
                    .map_err(|e| e.to_string())
                    .and_then(|bytes| {
                        serde_json::from_slice::<MemoryView>(&bytes).map_err(|e| e.to_string())
                    }) {
                    Ok(view) => view,
                    Err(e) => {
                        // Undecryptable memory is unrecoverable; start fresh
                        // rather than surfacing an error to the user.
                        warn!(user_id = self.user_id, err = %e, "memory blob unreadable, starting fresh");
                        MemoryView::empty(self.user_id)
                    }
                }
            }
            _ => MemoryView::empty(self.user_id),
        };

        self.view = Some(view);
        Ok(())
    }

    /// Append a message, honoring the internal-prompt filter.
    /// Returns false when the message was silently rejected.
    pub fn append(&mut self, mut message: StoredMessage) -> Result<bool> {
        if is_internal_prompt(&message.content) {
            debug!(user_id = self.user_id, "blocked internal prompt from memory");
            return Ok(false);
        }

        self.ensure_loaded()?;
        if message.timestamp.is_empty() {
            message.timestamp = chrono::Utc::now().to_rfc3339();
        }

        let view = self.view.as_mut().expect("loaded above");
        view.messages.push(message.clone());
        match message.kind {
            MessageKind::General => view.general_chat.push(message),
            MessageKind::Ai => view.ai_conversation.push(message),
        }
        self.dirty = true;

        let (max_general, max_ai) = (self.max_general, self.max_ai);
        self.trim(max_general, max_ai)?;
        Ok(true)
    }

    /// Enforce per-bucket bounds by dropping oldest entries, then rebuild
    /// `messages` as the chronological tail of the union.
    pub fn trim(&mut self, max_general: usize, max_ai: usize) -> Result<()> {
        self.ensure_loaded()?;
        let view = self.view.as_mut().expect("loaded above");

        if view.general_chat.len() > max_general {
            let drop = view.general_chat.len() - max_general;
            view.general_chat.drain(..drop);
            self.dirty = true;
        }
        if view.ai_conversation.len() > max_ai {
            let drop = view.ai_conversation.len() - max_ai;
            view.ai_conversation.drain(..drop);
            self.dirty = true;
        }

        let mut merged: Vec<StoredMessage> = view
            .general_chat
            .iter()
            .chain(view.ai_conversation.iter())
            .cloned()
            .collect();
        merged.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        let cap = max_general + max_ai;
        if merged.len() > cap {
            merged.drain(..merged.len() - cap);
        }
        if merged != view.messages {
            view.messages = merged;
            self.dirty = true;
        }
        Ok(())
    }

    /// Re-encrypt and persist the view. Idempotent when nothing changed;
    /// returns whether a write happened.
    pub fn flush(&mut self) -> Result<bool> {
        if !self.dirty {
            return Ok(false);
        }
        self.ensure_loaded()?;

        let view = self.view.as_mut().expect("loaded above");
        view.metadata.last_updated = chrono::Utc::now().to_rfc3339();
        view.metadata.message_counts = MessageCounts {
            general: view.general_chat.len(),
            ai: view.ai_conversation.len(),
            total: view.messages.len(),
        };

        let plaintext = serde_json::to_vec(&view)?;
        let ciphertext = confab_crypto::encrypt(&self.key, &plaintext)?;
        self.repo.set_encrypted_memory(self.user_id, &ciphertext)?;
        self.dirty = false;
        debug!(user_id = self.user_id, bytes = plaintext.len(), "memory flushed");
        Ok(true)
    }

    /// Read-only slice of the last `limit` messages, optionally filtered by
    /// bucket. Falls back to the legacy plaintext column when the encrypted
    /// blob holds nothing.
    pub fn recall(&mut self, limit: usize, kind: Option<MessageKind>) -> Result<Vec<StoredMessage>> {
        self.ensure_loaded()?;
        let view = self.view.as_ref().expect("loaded above");

        let source: Vec<StoredMessage> = match kind {
            Some(MessageKind::General) => view.general_chat.clone(),
            Some(MessageKind::Ai) => view.ai_conversation.clone(),
            None => view.messages.clone(),
        };

        let source = if source.is_empty() && view.messages.is_empty() {
            self.legacy_messages(kind)?
        } else {
            source
        };

        let start = source.len().saturating_sub(limit);
        Ok(source[start..].to_vec())
    }

    fn legacy_messages(&self, kind: Option<MessageKind>) -> Result<Vec<StoredMessage>> {
        let Some(raw) = self.repo.get_legacy_messages(self.user_id)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str::<Vec<StoredMessage>>(&raw) {
            Ok(messages) => Ok(messages
                .into_iter()
                .filter(|m| kind.map(|k| m.kind == k).unwrap_or(true))
                .collect()),
            Err(e) => {
                warn!(user_id = self.user_id, err = %e, "legacy history column unreadable");
                Ok(Vec::new())
            }
        }
    }

    /// Replace with an empty view and persist it.
    pub fn clear(&mut self) -> Result<()> {
        self.view = Some(MemoryView::empty(self.user_id));
        self.dirty = true;
        self.flush()?;
        Ok(())
    }

    /// Drop any in-memory state without flushing. Used on cancellation so
    /// partial turns never reach disk.
    pub fn discard(&mut self) {
        self.view = None;
        self.dirty = false;
    }

    pub fn stats(&mut self) -> Result<MemoryStats> {
        self.ensure_loaded()?;
        let view = self.view.as_ref().expect("loaded above");
        Ok(MemoryStats {
            total_messages: view.messages.len(),
            general_count: view.general_chat.len(),
            ai_count: view.ai_conversation.len(),
            last_updated: view.metadata.last_updated.clone(),
            version: view.metadata.version.clone(),
        })
    }

    pub fn training_plan(&mut self) -> Result<Option<TrainingPlan>> {
        self.ensure_loaded()?;
        Ok(self.view.as_ref().expect("loaded above").training_plan.clone())
    }

    pub fn set_training_plan(&mut self, plan: TrainingPlan) -> Result<()> {
        self.ensure_loaded()?;
        self.view.as_mut().expect("loaded above").training_plan = Some(plan);
        self.dirty = true;
        Ok(())
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }
}
