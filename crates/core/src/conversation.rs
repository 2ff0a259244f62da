//! Bounded per-(tenant, end-user) dialogue history.
//!
//! The store is two-level (tenant, then end-user) and is owned by exactly one
//! session. Nothing here is persisted.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};

use crate::domain::tenant::{TenantId, UserId};

pub const DEFAULT_HISTORY_LIMIT: usize = 20;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationKey {
    pub tenant_id: TenantId,
    pub user_id: UserId,
}

impl ConversationKey {
    pub fn new(tenant_id: TenantId, user_id: UserId) -> Self {
        Self { tenant_id, user_id }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub text: String,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: TurnRole::User, text: text.into() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: TurnRole::Assistant, text: text.into() }
    }
}

#[derive(Clone, Debug)]
pub struct ConversationBuffer {
    limit: usize,
    turns: VecDeque<ConversationTurn>,
}

impl ConversationBuffer {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self { limit, turns: VecDeque::with_capacity(limit) }
    }

    /// Appends and evicts from the front until at most `limit` turns remain.
    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push_back(turn);
        while self.turns.len() > self.limit {
            self.turns.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn snapshot(&self) -> Vec<ConversationTurn> {
        self.turns.iter().cloned().collect()
    }
}

type UserBuffers = HashMap<UserId, Arc<Mutex<ConversationBuffer>>>;

pub struct ConversationStore {
    limit: usize,
    tenants: RwLock<HashMap<TenantId, UserBuffers>>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl ConversationStore {
    pub fn new(limit: usize) -> Self {
        Self { limit: limit.max(1), tenants: RwLock::new(HashMap::new()) }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn append(&self, key: &ConversationKey, turn: ConversationTurn) {
        let buffer = self.buffer(key);
        let mut buffer = match buffer.lock() {
            Ok(buffer) => buffer,
            Err(poisoned) => poisoned.into_inner(),
        };
        buffer.push(turn);
    }

    /// Snapshot of the turns for `key`; empty if the end-user never wrote.
    pub fn history(&self, key: &ConversationKey) -> Vec<ConversationTurn> {
        self.existing(key)
            .map(|buffer| match buffer.lock() {
                Ok(buffer) => buffer.snapshot(),
                Err(poisoned) => poisoned.into_inner().snapshot(),
            })
            .unwrap_or_default()
    }

    pub fn len(&self, key: &ConversationKey) -> usize {
        self.history(key).len()
    }

    fn existing(&self, key: &ConversationKey) -> Option<Arc<Mutex<ConversationBuffer>>> {
        let tenants = match self.tenants.read() {
            Ok(tenants) => tenants,
            Err(poisoned) => poisoned.into_inner(),
        };
        tenants.get(&key.tenant_id).and_then(|users| users.get(&key.user_id)).cloned()
    }

    fn buffer(&self, key: &ConversationKey) -> Arc<Mutex<ConversationBuffer>> {
        if let Some(buffer) = self.existing(key) {
            return buffer;
        }

        let mut tenants = match self.tenants.write() {
            Ok(tenants) => tenants,
            Err(poisoned) => poisoned.into_inner(),
        };
        tenants
            .entry(key.tenant_id.clone())
            .or_default()
            .entry(key.user_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(ConversationBuffer::new(self.limit))))
            .clone()
    }
}
