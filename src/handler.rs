//! WebSocket connection handling and per-message dispatch.
//!
//! Grounded on the teacher's `handle_websocket`: split the socket into
//! sender/receiver halves, spawn a dedicated outbound-forwarding task reading
//! from an `mpsc::UnboundedSender<ServerMessage>`, then loop over inbound
//! frames dispatching by parsed `ClientMessage` variant — generalized here
//! from a single registered DID to a connection that may join at most one
//! session room at a time.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::RelayError;
use crate::protocol::{
    err_ack, ok_ack_with, ClientMessage, FileMetadata, FileWithBytes, MessageView, ServerMessage, SessionSnapshot,
};
use crate::state::RelayState;
use crate::store::{ConnectionId, FileRecord, MessageRecord};
use crate::{ids, upload};

pub async fn handle_websocket(socket: WebSocket, state: RelayState) {
    let connection_id: ConnectionId = Uuid::new_v4();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    state.register_connection(connection_id, tx);

    let sender_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::error!(error = %e, "failed to serialize server message"),
            }
        }
    });

    while let Some(msg_result) = ws_receiver.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_msg) => handle_client_message(&state, connection_id, client_msg),
                Err(e) => {
                    tracing::warn!(connection = %connection_id, error = %e, "failed to parse client message");
                }
            },
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::warn!(connection = %connection_id, error = %e, "websocket error");
                break;
            }
            _ => {}
        }
    }

    if let Some((session_id, remaining)) = state.store.remove_member(connection_id) {
        state.broadcast_to_session(&session_id, ServerMessage::MemberLeft { member_count: remaining }, None);
    }
    state.unregister_connection(connection_id);
    sender_task.abort();
}

fn handle_client_message(state: &RelayState, conn: ConnectionId, msg: ClientMessage) {
    let request_id = msg.request_id().to_string();
    match msg {
        ClientMessage::SessionCreate { .. } => handle_session_create(state, conn, &request_id),
        ClientMessage::SessionJoin { id, .. } => handle_session_join(state, conn, &request_id, &id),
        ClientMessage::SessionLeave { .. } => handle_session_leave(state, conn, &request_id),
        ClientMessage::FileUpload { bytes, mime, filename, size, .. } => {
            handle_file_upload(state, conn, &request_id, bytes, mime, filename, size)
        }
        ClientMessage::FileUploadStart { filename, mime, size, total_chunks, .. } => {
            handle_file_upload_start(state, conn, &request_id, filename, mime, size, total_chunks)
        }
        ClientMessage::FileUploadChunk { upload_id, index, bytes, .. } => {
            handle_file_upload_chunk(state, conn, &request_id, &upload_id, index, bytes)
        }
        ClientMessage::FileUploadComplete { upload_id, .. } => {
            handle_file_upload_complete(state, conn, &request_id, &upload_id)
        }
        ClientMessage::FileRequest { file_id, .. } => handle_file_request(state, conn, &request_id, &file_id),
        ClientMessage::FileDelete { file_id, .. } => handle_file_delete(state, conn, &request_id, &file_id),
        ClientMessage::MessageSend { content, .. } => handle_message_send(state, conn, &request_id, content),
        ClientMessage::MessageDelete { message_id, .. } => {
            handle_message_delete(state, conn, &request_id, &message_id)
        }
    }
}

fn require_membership(state: &RelayState, conn: ConnectionId) -> Result<String, RelayError> {
    state.store.session_of_connection(conn).ok_or(RelayError::NotJoined)
}

fn snapshot_of(session: &crate::store::Session) -> SessionSnapshot {
    SessionSnapshot {
        id: session.id.clone(),
        created_at: session.created_at,
        expires_at: session.expires_at,
        files: session.files.iter().map(file_metadata_of).collect(),
        messages: session.messages.iter().map(message_view_of).collect(),
        member_count: session.members.len(),
    }
}

fn file_metadata_of(record: &FileRecord) -> FileMetadata {
    FileMetadata {
        id: record.id.clone(),
        mime_type: record.mime_type.clone(),
        filename: record.filename.clone(),
        size: record.size(),
        uploaded_at: record.uploaded_at,
    }
}

fn message_view_of(record: &MessageRecord) -> MessageView {
    MessageView {
        id: record.id.clone(),
        content: record.content.clone(),
        sent_by_name: record.sent_by_name.clone(),
        sent_at: record.sent_at,
    }
}

fn handle_session_create(state: &RelayState, conn: ConnectionId, request_id: &str) {
    let session = state.store.create_session();
    state.store.add_member(&session.id, conn).expect("just created");
    let snapshot = snapshot_of(&session);
    state.send_to(conn, ServerMessage::SessionCreated { request_id: request_id.to_string(), session: snapshot });
}

fn handle_session_join(state: &RelayState, conn: ConnectionId, request_id: &str, id: &str) {
    if !ids::is_valid_session_code(id) {
        state.send_to(conn, err_ack(request_id, &RelayError::InvalidSessionCode));
        return;
    }
    match state.store.get_session(id) {
        Err(e) => state.send_to(conn, err_ack(request_id, &e)),
        Ok(_) => {
            let member_count = state.store.add_member(id, conn).expect("session exists");
            let session = state.store.get_session(id).expect("session exists");
            let snapshot = snapshot_of(&session);
            state.send_to(
                conn,
                ServerMessage::SessionJoined { request_id: request_id.to_string(), session: snapshot },
            );
            state.broadcast_to_session(&session.id, ServerMessage::MemberJoined { member_count }, Some(conn));
        }
    }
}

fn handle_session_leave(state: &RelayState, conn: ConnectionId, request_id: &str) {
    if let Some((session_id, remaining)) = state.store.remove_member(conn) {
        state.broadcast_to_session(&session_id, ServerMessage::MemberLeft { member_count: remaining }, None);
    }
    state.send_to(conn, ok_ack_with(request_id, serde_json::json!({ "ok": true })));
}

fn handle_file_upload(
    state: &RelayState,
    conn: ConnectionId,
    request_id: &str,
    bytes: Vec<u8>,
    mime: Option<String>,
    filename: String,
    _declared_size: u64,
) {
    let session_id = match require_membership(state, conn) {
        Ok(id) => id,
        Err(e) => return state.send_to(conn, err_ack(request_id, &e)),
    };

    let record = FileRecord {
        id: ids::new_file_id(),
        payload: std::sync::Arc::new(bytes),
        mime_type: mime.filter(|m| !m.is_empty()).unwrap_or_else(|| "application/octet-stream".to_string()),
        filename: ids::sanitize_filename(&filename),
        uploaded_at: state.now(),
        uploaded_by: conn,
    };

    match state.store.add_file(&session_id, record) {
        Err(e) => state.send_to(conn, err_ack(request_id, &e)),
        Ok(stored) => {
            let metadata = file_metadata_of(&stored);
            let payload = serde_json::json!({ "file": metadata });
            state.send_to(conn, ok_ack_with(request_id, payload));
            state.broadcast_to_session(&session_id, ServerMessage::FileAdded { file: metadata }, Some(conn));
        }
    }
}

fn handle_file_upload_start(
    state: &RelayState,
    conn: ConnectionId,
    request_id: &str,
    filename: String,
    mime: Option<String>,
    size: u64,
    total_chunks: u32,
) {
    let session_id = match require_membership(state, conn) {
        Ok(id) => id,
        Err(e) => return state.send_to(conn, err_ack(request_id, &e)),
    };

    let mime_type = mime.filter(|m| !m.is_empty()).unwrap_or_else(|| "application/octet-stream".to_string());
    let sanitized = ids::sanitize_filename(&filename);

    match state.uploads.start(&session_id, conn, sanitized, mime_type, size, total_chunks) {
        Err(e) => state.send_to(conn, err_ack(request_id, &e)),
        Ok(upload_id) => {
            state.send_to(conn, ok_ack_with(request_id, serde_json::json!({ "uploadId": upload_id })));
        }
    }
}

fn handle_file_upload_chunk(
    state: &RelayState,
    conn: ConnectionId,
    request_id: &str,
    upload_id: &str,
    index: u32,
    bytes: Vec<u8>,
) {
    match state.uploads.chunk(upload_id, index, bytes) {
        Err(e) => state.send_to(conn, err_ack(request_id, &e)),
        Ok((received, total, is_complete, _duplicate)) => {
            let progress = if total > 0 { received as f64 / total as f64 } else { 1.0 };
            state.send_to(
                conn,
                ok_ack_with(
                    request_id,
                    serde_json::json!({ "received": received, "total": total, "isComplete": is_complete }),
                ),
            );
            state.send_to(
                conn,
                ServerMessage::FileChunkReceived {
                    upload_id: upload_id.to_string(),
                    index,
                    received,
                    total,
                    progress,
                },
            );
        }
    }
}

fn handle_file_upload_complete(state: &RelayState, conn: ConnectionId, request_id: &str, upload_id: &str) {
    let session_id = match state.uploads.session_of(upload_id) {
        Some(id) => id,
        None => return state.send_to(conn, err_ack(request_id, &RelayError::UploadNotFound)),
    };

    let assembled: upload::AssembledUpload = match state.uploads.complete(upload_id) {
        Err(e) => return state.send_to(conn, err_ack(request_id, &e)),
        Ok(assembled) => assembled,
    };

    let record = FileRecord {
        id: ids::new_file_id(),
        payload: std::sync::Arc::new(assembled.payload),
        mime_type: assembled.mime_type,
        filename: assembled.filename,
        uploaded_at: state.now(),
        uploaded_by: conn,
    };

    match state.store.add_file(&session_id, record) {
        Err(e) => state.send_to(conn, err_ack(request_id, &e)),
        Ok(stored) => {
            let metadata = file_metadata_of(&stored);
            let payload = serde_json::json!({ "file": metadata });
            state.send_to(conn, ok_ack_with(request_id, payload));
            state.broadcast_to_session(&session_id, ServerMessage::FileAdded { file: metadata }, Some(conn));
        }
    }
}

fn handle_file_request(state: &RelayState, conn: ConnectionId, request_id: &str, file_id: &str) {
    if !ids::is_valid_file_id(file_id) {
        state.send_to(conn, err_ack(request_id, &RelayError::InvalidFileId));
        return;
    }
    let session_id = match require_membership(state, conn) {
        Ok(id) => id,
        Err(e) => return state.send_to(conn, err_ack(request_id, &e)),
    };

    match state.store.get_file_metadata(&session_id, file_id) {
        Err(e) => state.send_to(conn, err_ack(request_id, &e)),
        Ok(record) => {
            let file = FileWithBytes {
                id: record.id.clone(),
                bytes: (*record.payload).clone(),
                mime_type: record.mime_type.clone(),
                filename: record.filename.clone(),
                size: record.size(),
            };
            state.send_to(conn, ok_ack_with(request_id, serde_json::json!({ "file": file })));
        }
    }
}

fn handle_file_delete(state: &RelayState, conn: ConnectionId, request_id: &str, file_id: &str) {
    if !ids::is_valid_file_id(file_id) {
        state.send_to(conn, err_ack(request_id, &RelayError::InvalidFileId));
        return;
    }
    let session_id = match require_membership(state, conn) {
        Ok(id) => id,
        Err(e) => return state.send_to(conn, err_ack(request_id, &e)),
    };

    match state.store.delete_file(&session_id, file_id) {
        Err(e) => state.send_to(conn, err_ack(request_id, &e)),
        Ok(false) => state.send_to(conn, err_ack(request_id, &RelayError::FileNotFound)),
        Ok(true) => {
            state.send_to(conn, ok_ack_with(request_id, serde_json::json!({ "ok": true })));
            state.broadcast_to_session(
                &session_id,
                ServerMessage::FileDeleted { file_id: file_id.to_string() },
                Some(conn),
            );
        }
    }
}

fn handle_message_send(state: &RelayState, conn: ConnectionId, request_id: &str, content: String) {
    let session_id = match require_membership(state, conn) {
        Ok(id) => id,
        Err(e) => return state.send_to(conn, err_ack(request_id, &e)),
    };

    let record = MessageRecord {
        id: ids::new_message_id(state.now()),
        content,
        sent_by: conn,
        sent_by_name: "Anonymous".to_string(),
        sent_at: state.now(),
    };

    match state.store.add_message(&session_id, record) {
        Err(e) => state.send_to(conn, err_ack(request_id, &e)),
        Ok(stored) => {
            let view = message_view_of(&stored);
            let payload = serde_json::json!({ "message": view });
            state.send_to(conn, ok_ack_with(request_id, payload));
            state.broadcast_to_session(&session_id, ServerMessage::MessageAdded { message: view }, Some(conn));
        }
    }
}

fn handle_message_delete(state: &RelayState, conn: ConnectionId, request_id: &str, message_id: &str) {
    let session_id = match require_membership(state, conn) {
        Ok(id) => id,
        Err(e) => return state.send_to(conn, err_ack(request_id, &e)),
    };

    match state.store.delete_message(&session_id, message_id, conn) {
        Err(e) => state.send_to(conn, err_ack(request_id, &e)),
        Ok(false) => state.send_to(conn, err_ack(request_id, &RelayError::MessageNotFound)),
        Ok(true) => {
            state.send_to(conn, ok_ack_with(request_id, serde_json::json!({ "ok": true })));
            state.broadcast_to_session(
                &session_id,
                ServerMessage::MessageDeleted { message_id: message_id.to_string() },
                Some(conn),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::config::RelayConfig;
    use std::sync::Arc;
    use tokio::sync::mpsc::error::TryRecvError;

    fn state() -> RelayState {
        RelayState::new(RelayConfig::default(), Arc::new(TestClock::new(1_000_000)))
    }

    fn wire_up(state: &RelayState, conn: ConnectionId) -> mpsc::UnboundedReceiver<ServerMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        state.register_connection(conn, tx);
        rx
    }

    #[test]
    fn test_session_create_then_join_broadcasts_member_joined() {
        let state = state();
        let creator = Uuid::new_v4();
        let mut creator_rx = wire_up(&state, creator);
        handle_client_message(&state, creator, ClientMessage::SessionCreate { request_id: "r1".to_string() });
        let created = creator_rx.try_recv().unwrap();
        let ServerMessage::SessionCreated { session, .. } = created else { panic!("expected session:created") };
        let session_id = session.id;

        let joiner = Uuid::new_v4();
        let mut joiner_rx = wire_up(&state, joiner);
        handle_client_message(
            &state,
            joiner,
            ClientMessage::SessionJoin { request_id: "r2".to_string(), id: session_id.clone() },
        );
        let joined = joiner_rx.try_recv().unwrap();
        assert!(matches!(joined, ServerMessage::SessionJoined { .. }));
        let broadcast = creator_rx.try_recv().unwrap();
        match broadcast {
            ServerMessage::MemberJoined { member_count } => assert_eq!(member_count, 2),
            _ => panic!("expected MemberJoined"),
        }
        assert_eq!(joiner_rx.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[test]
    fn test_file_upload_small_then_request() {
        let state = state();
        let conn = Uuid::new_v4();
        let mut rx = wire_up(&state, conn);
        handle_client_message(&state, conn, ClientMessage::SessionCreate { request_id: "r1".to_string() });
        let created = rx.try_recv().unwrap();
        let ServerMessage::SessionCreated { session, .. } = created else { panic!("expected session:created") };
        let session_id = session.id;

        handle_client_message(
            &state,
            conn,
            ClientMessage::FileUpload {
                request_id: "r2".to_string(),
                bytes: b"Hello".to_vec(),
                mime: Some("text/plain".to_string()),
                filename: "hello.txt".to_string(),
                size: 5,
            },
        );
        let ack = rx.try_recv().unwrap();
        let ServerMessage::Ack { payload, success, .. } = ack else { panic!("expected ack") };
        assert!(success);
        let file_id = payload["file"]["id"].as_str().unwrap().to_string();
        assert_eq!(payload["file"]["size"], serde_json::json!(5));

        handle_client_message(
            &state,
            conn,
            ClientMessage::FileRequest { request_id: "r3".to_string(), file_id: file_id.clone() },
        );
        let ack = rx.try_recv().unwrap();
        let ServerMessage::Ack { payload, .. } = ack else { panic!("expected ack") };
        let bytes_b64 = payload["file"]["bytes"].as_str().unwrap();
        let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, bytes_b64).unwrap();
        assert_eq!(decoded, b"Hello");
    }

    #[test]
    fn test_operations_require_membership() {
        let state = state();
        let conn = Uuid::new_v4();
        let mut rx = wire_up(&state, conn);
        handle_client_message(
            &state,
            conn,
            ClientMessage::MessageSend { request_id: "r1".to_string(), content: "hi".to_string() },
        );
        let ack = rx.try_recv().unwrap();
        let ServerMessage::Ack { success, code, .. } = ack else { panic!("expected ack") };
        assert!(!success);
        assert_eq!(code.unwrap(), "NOT_JOINED");
    }

    #[test]
    fn test_disconnect_removes_member_and_broadcasts() {
        let state = state();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut rx_a = wire_up(&state, a);
        let _rx_b = wire_up(&state, b);
        handle_client_message(&state, a, ClientMessage::SessionCreate { request_id: "r1".to_string() });
        let created = rx_a.try_recv().unwrap();
        let ServerMessage::SessionCreated { session, .. } = created else { panic!("expected session:created") };
        let session_id = session.id;
        handle_client_message(&state, b, ClientMessage::SessionJoin { request_id: "r2".to_string(), id: session_id });
        rx_a.try_recv().ok(); // drain MemberJoined

        let (_session_id, remaining) = state.store.remove_member(b).unwrap();
        assert_eq!(remaining, 1);
    }
}
