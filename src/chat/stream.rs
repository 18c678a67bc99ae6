// src/chat/stream.rs
//! Newline-delimited JSON frames for the chat response body: zero or more
//! `chunk` frames, then exactly one `complete` or `error` terminal frame.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Chunk { content: String, id: String },
    Complete { message: ChatMessage },
    Error { code: String, error: String },
}

impl Frame {
    /// Serialize as one NDJSON line.
    pub fn encode(&self) -> Bytes {
        let mut line = serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","code":"internal","error":"frame encoding failed"}"#.to_string()
        });
        line.push('\n');
        Bytes::from(line)
    }
}
