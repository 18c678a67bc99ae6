// src/chat/history.rs
//! In-memory fallback store of recent chat exchanges, used to backfill
//! conversation history when a client sends none.

use std::sync::Mutex;

use crate::now_unix;

use super::provider::ChatTurn;

#[derive(Debug, Clone)]
pub struct ChatExchange {
    pub caller: String,
    pub ts_unix: u64,
    pub user_text: String,
    pub assistant_text: String,
}

#[derive(Debug)]
pub struct ChatHistory {
    inner: Mutex<Vec<ChatExchange>>,
    cap: usize,
}

impl ChatHistory {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            inner: Mutex::new(Vec::with_capacity(cap.min(10_000))),
            cap: cap.min(10_000),
        }
    }

    pub fn push(&self, caller: &str, user_text: &str, assistant_text: &str) {
        let entry = ChatExchange {
            caller: caller.to_string(),
            ts_unix: now_unix(),
            user_text: user_text.to_string(),
            assistant_text: assistant_text.to_string(),
        };
        let mut v = self.inner.lock().expect("chat history mutex poisoned");
        v.push(entry);
        if v.len() > self.cap {
            let excess = v.len() - self.cap;
            v.drain(0..excess);
        }
    }

    /// Most recent `n` exchanges for one caller, oldest first, as chat turns.
    pub fn recent_turns(&self, caller: &str, n: usize) -> Vec<ChatTurn> {
        let v = self.inner.lock().expect("chat history mutex poisoned");
        let picked: Vec<&ChatExchange> = v
            .iter()
            .rev()
            .filter(|e| e.caller == caller)
            .take(n)
            .collect();
        let mut turns = Vec::with_capacity(picked.len() * 2);
        for e in picked.into_iter().rev() {
            turns.push(ChatTurn {
                role: "user".into(),
                content: e.user_text.clone(),
            });
            turns.push(ChatTurn {
                role: "assistant".into(),
                content: e.assistant_text.clone(),
            });
        }
        turns
    }
}
