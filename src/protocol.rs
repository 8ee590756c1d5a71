//! Wire protocol: the JSON envelopes exchanged over the `/ws` WebSocket.
//!
//! Shaped after the teacher's `ClientMessage`/`ServerMessage` tagged enums —
//! `#[serde(tag = "type")]` with a `rename_all` case convention — generalized
//! from DID-keyed point-to-point messages to session-room broadcasts, and
//! switched to `camelCase` to match this wire's field-naming convention.
//! Binary fields travel as base64 strings inside the JSON text frame.

use serde::{Deserialize, Serialize};

/// Messages a client sends to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename = "session:create")]
    SessionCreate { request_id: String },

    #[serde(rename = "session:join")]
    SessionJoin { request_id: String, id: String },

    #[serde(rename = "session:leave")]
    SessionLeave { request_id: String },

    #[serde(rename = "file:upload")]
    FileUpload {
        request_id: String,
        #[serde(with = "base64_bytes")]
        bytes: Vec<u8>,
        mime: Option<String>,
        filename: String,
        size: u64,
    },

    #[serde(rename = "file:upload-start")]
    FileUploadStart {
        request_id: String,
        filename: String,
        mime: Option<String>,
        size: u64,
        total_chunks: u32,
    },

    #[serde(rename = "file:upload-chunk")]
    FileUploadChunk {
        request_id: String,
        upload_id: String,
        index: u32,
        #[serde(with = "base64_bytes")]
        bytes: Vec<u8>,
    },

    #[serde(rename = "file:upload-complete")]
    FileUploadComplete { request_id: String, upload_id: String },

    #[serde(rename = "file:request")]
    FileRequest { request_id: String, file_id: String },

    #[serde(rename = "file:delete")]
    FileDelete { request_id: String, file_id: String },

    #[serde(rename = "message:send")]
    MessageSend { request_id: String, content: String },

    #[serde(rename = "message:delete")]
    MessageDelete { request_id: String, message_id: String },
}

impl ClientMessage {
    pub fn request_id(&self) -> &str {
        match self {
            ClientMessage::SessionCreate { request_id }
            | ClientMessage::SessionJoin { request_id, .. }
            | ClientMessage::SessionLeave { request_id }
            | ClientMessage::FileUpload { request_id, .. }
            | ClientMessage::FileUploadStart { request_id, .. }
            | ClientMessage::FileUploadChunk { request_id, .. }
            | ClientMessage::FileUploadComplete { request_id, .. }
            | ClientMessage::FileRequest { request_id, .. }
            | ClientMessage::FileDelete { request_id, .. }
            | ClientMessage::MessageSend { request_id, .. }
            | ClientMessage::MessageDelete { request_id, .. } => request_id,
        }
    }
}

/// Messages the server sends, either as a direct ack or a room broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Reply to an RPC-shaped client message.
    Ack {
        in_reply_to: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        #[serde(flatten)]
        payload: serde_json::Value,
    },

    /// The normative reply to a successful `session:create`, sent only to
    /// the caller (not a room broadcast despite living alongside the other
    /// named events) — `request_id` still lets the caller match it to its
    /// pending request the same way an `Ack`'s `in_reply_to` would.
    #[serde(rename = "session:created")]
    SessionCreated { request_id: String, session: SessionSnapshot },

    /// The normative reply to a successful `session:join`, sent only to the
    /// caller.
    #[serde(rename = "session:joined")]
    SessionJoined { request_id: String, session: SessionSnapshot },

    #[serde(rename = "session:expired")]
    SessionExpired { id: String, reason: String },

    #[serde(rename = "file:added")]
    FileAdded { file: FileMetadata },

    #[serde(rename = "file:deleted")]
    FileDeleted { file_id: String },

    #[serde(rename = "message:added")]
    MessageAdded { message: MessageView },

    #[serde(rename = "message:deleted")]
    MessageDeleted { message_id: String },

    #[serde(rename = "member:joined")]
    MemberJoined { member_count: usize },

    #[serde(rename = "member:left")]
    MemberLeft { member_count: usize },

    #[serde(rename = "file:chunk-received")]
    FileChunkReceived {
        upload_id: String,
        index: u32,
        received: u32,
        total: u32,
        progress: f64,
    },
}

/// A successful ack carrying no extra payload fields beyond `success: true`.
pub fn ok_ack(in_reply_to: impl Into<String>) -> ServerMessage {
    ServerMessage::Ack {
        in_reply_to: in_reply_to.into(),
        success: true,
        error: None,
        code: None,
        payload: serde_json::Value::Object(serde_json::Map::new()),
    }
}

/// A successful ack carrying `payload` merged in alongside `success: true`.
pub fn ok_ack_with(in_reply_to: impl Into<String>, payload: serde_json::Value) -> ServerMessage {
    ServerMessage::Ack {
        in_reply_to: in_reply_to.into(),
        success: true,
        error: None,
        code: None,
        payload,
    }
}

/// A failure ack derived from a [`crate::error::RelayError`].
pub fn err_ack(in_reply_to: impl Into<String>, err: &crate::error::RelayError) -> ServerMessage {
    ServerMessage::Ack {
        in_reply_to: in_reply_to.into(),
        success: false,
        error: Some(err.message()),
        code: Some(err.code().to_string()),
        payload: serde_json::Value::Object(serde_json::Map::new()),
    }
}

// ── Wire-facing view types ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub files: Vec<FileMetadata>,
    pub messages: Vec<MessageView>,
    pub member_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub id: String,
    pub mime_type: String,
    pub filename: String,
    pub size: u64,
    pub uploaded_at: i64,
}

/// A file plus its bytes, returned only from `file:request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileWithBytes {
    pub id: String,
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub filename: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: String,
    pub content: String,
    pub sent_by_name: String,
    pub sent_at: i64,
}

/// `serde(with = "base64_bytes")` helper so binary fields carry as base64
/// strings inside the JSON text frame rather than raw byte arrays.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        BASE64.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}
