use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use cqbridge_contracts::MessageType;

use crate::error::LogError;

/// A message the bridge sent, kept so it can be looked up or withdrawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub message_id: i64,
    pub bot_id: i64,
    pub message_type: MessageType,
    pub group_id: i64,
    pub user_id: i64,
    /// Reference the engine returned from the send.
    pub engine_ref: String,
    /// Engine tag text as sent.
    pub text: String,
    pub time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub bot_id: i64,
    pub message_type: MessageType,
    pub group_id: i64,
    pub user_id: i64,
    pub engine_ref: String,
    pub text: String,
    pub time: i64,
}

impl NewMessage {
    fn stored(self, message_id: i64) -> StoredMessage {
        StoredMessage {
            message_id,
            bot_id: self.bot_id,
            message_type: self.message_type,
            group_id: self.group_id,
            user_id: self.user_id,
            engine_ref: self.engine_ref,
            text: self.text,
            time: self.time,
        }
    }
}

pub trait MessageLog: Send + Sync {
    /// Stores the message and returns its id. Ids start at 1.
    fn record(&self, message: NewMessage) -> Result<i64, LogError>;
    fn find(&self, bot_id: i64, message_id: i64) -> Result<Option<StoredMessage>, LogError>;
}

/// Retained messages when no explicit cap is configured.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

#[derive(Default)]
struct MemoryInner {
    next_id: i64,
    messages: HashMap<i64, StoredMessage>,
    order: VecDeque<i64>,
}

/// In-process log holding the most recent `max_entries` messages. Older
/// messages are evicted; ids keep increasing regardless.
pub struct MemoryMessageLog {
    max_entries: usize,
    inner: Mutex<MemoryInner>,
}

impl MemoryMessageLog {
    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            inner: Mutex::new(MemoryInner::default()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryInner>, LogError> {
        self.inner
            .lock()
            .map_err(|_| LogError::Backend("message log lock poisoned".to_string()))
    }
}

impl Default for MemoryMessageLog {
    fn default() -> Self {
        Self::with_max_entries(DEFAULT_MAX_ENTRIES)
    }
}

impl MessageLog for MemoryMessageLog {
    fn record(&self, message: NewMessage) -> Result<i64, LogError> {
        let mut inner = self.lock()?;
        inner.next_id += 1;
        let id = inner.next_id;
        inner.messages.insert(id, message.stored(id));
        inner.order.push_back(id);
        while inner.order.len() > self.max_entries {
            if let Some(oldest) = inner.order.pop_front() {
                inner.messages.remove(&oldest);
            }
        }
        Ok(id)
    }

    fn find(&self, bot_id: i64, message_id: i64) -> Result<Option<StoredMessage>, LogError> {
        let inner = self.lock()?;
        Ok(inner
            .messages
            .get(&message_id)
            .filter(|m| m.bot_id == bot_id)
            .cloned())
    }
}
