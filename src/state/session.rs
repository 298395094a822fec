use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agent::Message;

/// 会话状态：有序消息历史 + 元数据
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionState {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            metadata: Map::new(),
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Drops the oldest messages until at most `max` remain. Returns how many were dropped.
    pub fn trim(&mut self, max: usize) -> usize {
        let excess = self.messages.len().saturating_sub(max);
        if excess > 0 {
            self.messages.drain(..excess);
        }
        excess
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// 按 session id 保存会话状态
///
/// 每个 session 额外持有一把异步锁，同一 session 的并发运行会被串行化。
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionState>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy; callers never alias the stored state.
    pub fn get(&self, session_id: &str) -> Option<SessionState> {
        self.sessions.read().get(session_id).cloned()
    }

    pub fn put(&self, session_id: &str, state: SessionState) {
        self.sessions.write().insert(session_id.to_string(), state);
    }

    /// 正在运行的 session 保留其锁，后续运行仍与之串行
    pub fn remove(&self, session_id: &str) -> Option<SessionState> {
        let mut locks = self.locks.lock();
        if locks
            .get(session_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(session_id);
        }
        drop(locks);
        self.sessions.write().remove(session_id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn session_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(session_id.to_string()).or_default())
    }
}
