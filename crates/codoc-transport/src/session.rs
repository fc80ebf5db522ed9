//! Per-connection protocol driver
//!
//! One `SessionHandler` per connection, fed decoded transport messages
//! in arrival order. States: unjoined (no active document) → joined →
//! closed. The handler owns no shared state itself; everything flows
//! through the [`Hub`].

use codoc_core::{
    ConnectionId, CursorPos, DocumentId, Error as CoreError, Hub, Identity, Payload,
};
use codoc_protocol::{
    snapshot_payload, ClientEvent, Frame, ParticipantInfo, PresenceChange, ServerEvent,
};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, warn};

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Drives the sync protocol for one connection.
pub struct SessionHandler {
    conn: ConnectionId,
    identity: Identity,
    hub: Arc<Hub>,
    /// Document the binary sync channel is bound to: the most recent
    /// successful join.
    active_doc: Option<DocumentId>,
    closed: bool,
}

impl SessionHandler {
    /// Register the connection and create its handler.
    pub fn new(
        hub: Arc<Hub>,
        identity: Identity,
        sender: mpsc::UnboundedSender<Payload>,
    ) -> Self {
        let conn = hub.connections.register(identity.clone(), sender);
        Self {
            conn,
            identity,
            hub,
            active_doc: None,
            closed: false,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.conn
    }

    /// Handle one control-channel message (JSON event).
    pub async fn handle_text(&mut self, text: &str) {
        if self.closed {
            return;
        }

        let event = match ClientEvent::from_json(text) {
            Ok(event) => event,
            Err(e) => {
                debug!(client = %self.conn, error = %e, "Malformed control event");
                self.reply_error("PROTOCOL_ERROR", e.to_string());
                return;
            }
        };

        match event {
            ClientEvent::Join {
                document_id,
                state_vector,
            } => self.handle_join(&document_id, state_vector.as_deref()).await,
            ClientEvent::Leave { document_id } => self.handle_leave(&document_id),
            ClientEvent::CursorMove {
                document_id,
                position,
            } => self.handle_cursor(&document_id, position),
            ClientEvent::TypingStart { document_id } => self.handle_typing(&document_id, true),
            ClientEvent::TypingStop { document_id } => self.handle_typing(&document_id, false),
            ClientEvent::Ping { document_id } => self.handle_ping(&document_id),
        }
    }

    /// Handle one sync-channel message (binary frame).
    pub async fn handle_binary(&mut self, data: &[u8]) {
        if self.closed {
            return;
        }

        let frame = match Frame::decode(data) {
            Ok(frame) => frame,
            Err(e) => {
                self.reply_error("PROTOCOL_ERROR", e.to_string());
                return;
            }
        };

        let Some(doc) = self.active_doc.clone() else {
            self.reply_error("NOT_JOINED", "Join a document before syncing");
            return;
        };

        match frame {
            Frame::SyncRequest(state_vector) => self.handle_sync_request(&doc, &state_vector).await,
            // Server-bound SYNC_REPLY has no meaning; clients consume these.
            Frame::SyncReply(_) => {}
            Frame::Awareness(payload) => self.handle_awareness(&doc, payload),
            Frame::AwarenessQuery => self.handle_awareness_query(&doc),
            Frame::Update(bytes) => self.handle_update(&doc, bytes).await,
        }
    }

    /// Tear the connection down. Idempotent; safe to call on any state.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.active_doc = None;

        for (doc, key, participant) in self.hub.disconnect(&self.conn) {
            let event = ServerEvent::PresenceUpdate {
                document_id: doc.to_string(),
                kind: PresenceChange::Left,
                participant: key.to_string(),
                info: None,
                is_guest: participant.is_guest,
                reason: None,
            };
            self.hub.broadcast(&doc, Payload::text(event.to_json()), None);
        }
    }

    async fn handle_join(&mut self, document_id: &str, state_vector: Option<&str>) {
        let doc = match DocumentId::new(document_id) {
            Ok(doc) => doc,
            Err(e) => {
                self.reply_error("INVALID_DOCUMENT", e.to_string());
                return;
            }
        };

        // Reject an undecodable catch-up vector before touching state
        let state_vector = match state_vector {
            Some(encoded) => match ClientEvent::decode_state_vector(encoded) {
                Ok(raw) => Some(raw),
                Err(e) => {
                    self.reply_error("PROTOCOL_ERROR", e.to_string());
                    return;
                }
            },
            None => None,
        };

        self.hub.connections.join_room(&self.conn, &doc);
        let key = self.identity.participant_key();
        let snapshot = self.hub.presence.join(&doc, &self.identity);

        // The joiner's initial view: everyone already here, not themselves
        let mut participants = snapshot_payload(&snapshot);
        participants.remove(&key.to_string());
        self.send_event(&ServerEvent::PresenceInit {
            document_id: doc.to_string(),
            participants,
        });

        // State-sync reply: full state, or a delta when the joiner
        // supplied its state vector
        match self.hub.cache.get(&doc).await {
            Ok(engine) => {
                let update = match &state_vector {
                    Some(raw) => match engine.encode_since(raw) {
                        Ok(update) => update,
                        Err(e) => {
                            self.reply_error("PROTOCOL_ERROR", e.to_string());
                            engine.encode_full()
                        }
                    },
                    None => engine.encode_full(),
                };
                self.send_binary(&Frame::SyncReply(update));
            }
            Err(e) => {
                warn!(client = %self.conn, doc = %doc, error = %e, "Document load failed on join");
                self.reply_error("STORAGE_ERROR", e.to_string());
            }
        }

        let info = snapshot.get(&key).map(ParticipantInfo::from);
        let announcement = ServerEvent::PresenceUpdate {
            document_id: doc.to_string(),
            kind: PresenceChange::Joined,
            participant: key.to_string(),
            info,
            is_guest: self.identity.is_guest(),
            reason: None,
        };
        self.hub
            .broadcast(&doc, Payload::text(announcement.to_json()), Some(&self.conn));

        debug!(client = %self.conn, doc = %doc, "Joined document room");
        self.active_doc = Some(doc);
    }

    fn handle_leave(&mut self, document_id: &str) {
        let doc = match DocumentId::new(document_id) {
            Ok(doc) => doc,
            Err(e) => {
                self.reply_error("INVALID_DOCUMENT", e.to_string());
                return;
            }
        };

        self.hub.connections.leave_room(&self.conn, &doc);
        let key = self.identity.participant_key();

        // Disconnect races are tolerated: a second leave is a no-op and
        // announces nothing
        if let Some(participant) = self.hub.presence.leave(&doc, &key) {
            let event = ServerEvent::PresenceUpdate {
                document_id: doc.to_string(),
                kind: PresenceChange::Left,
                participant: key.to_string(),
                info: None,
                is_guest: participant.is_guest,
                reason: None,
            };
            self.hub
                .broadcast(&doc, Payload::text(event.to_json()), Some(&self.conn));
        }
        self.hub.evict_if_empty(&doc);

        if self.active_doc.as_ref() == Some(&doc) {
            self.active_doc = None;
        }
    }

    fn handle_cursor(&mut self, document_id: &str, position: CursorPos) {
        // Guests have no cursors: accepted, never applied or relayed
        if self.identity.is_guest() {
            return;
        }

        let doc = match DocumentId::new(document_id) {
            Ok(doc) => doc,
            Err(e) => {
                self.reply_error("INVALID_DOCUMENT", e.to_string());
                return;
            }
        };

        let key = self.identity.participant_key();
        if !self.hub.presence.update_cursor(&doc, &key, position) {
            // Cursor frame arrived after leave; drop it
            return;
        }

        let event = ServerEvent::CursorMove {
            document_id: doc.to_string(),
            participant: key.to_string(),
            info: ParticipantInfo {
                display_name: self.identity.display_name(),
                avatar_color: self.identity.avatar_color().to_string(),
                is_admin: self.identity.is_admin(),
            },
            position,
            timestamp: now_millis(),
        };
        self.hub
            .broadcast(&doc, Payload::text(event.to_json()), Some(&self.conn));
    }

    fn handle_typing(&mut self, document_id: &str, started: bool) {
        if self.identity.is_guest() {
            return;
        }

        let doc = match DocumentId::new(document_id) {
            Ok(doc) => doc,
            Err(e) => {
                self.reply_error("INVALID_DOCUMENT", e.to_string());
                return;
            }
        };

        let key = self.identity.participant_key();
        if !self.hub.presence.contains(&doc, &key) {
            return;
        }

        let info = ParticipantInfo {
            display_name: self.identity.display_name(),
            avatar_color: self.identity.avatar_color().to_string(),
            is_admin: self.identity.is_admin(),
        };
        let event = if started {
            ServerEvent::TypingStart {
                document_id: doc.to_string(),
                participant: key.to_string(),
                info,
            }
        } else {
            ServerEvent::TypingStop {
                document_id: doc.to_string(),
                participant: key.to_string(),
                info,
            }
        };
        self.hub
            .broadcast(&doc, Payload::text(event.to_json()), Some(&self.conn));
    }

    fn handle_ping(&mut self, document_id: &str) {
        if let Ok(doc) = DocumentId::new(document_id) {
            self.hub
                .presence
                .heartbeat(&doc, &self.identity.participant_key());
        }
    }

    async fn handle_sync_request(&mut self, doc: &DocumentId, state_vector: &[u8]) {
        let engine = match self.hub.cache.get(doc).await {
            Ok(engine) => engine,
            Err(e) => {
                self.reply_error("STORAGE_ERROR", e.to_string());
                return;
            }
        };

        let update = if state_vector.is_empty() {
            Ok(engine.encode_full())
        } else {
            engine.encode_since(state_vector)
        };

        match update {
            Ok(update) => self.send_binary(&Frame::SyncReply(update)),
            Err(e) => self.reply_error("PROTOCOL_ERROR", e.to_string()),
        }
    }

    fn handle_awareness(&mut self, doc: &DocumentId, payload: Vec<u8>) {
        // Same product rule as cursors: guest awareness is not relayed
        if self.identity.is_guest() {
            return;
        }
        self.hub.broadcast(
            doc,
            Payload::binary(Frame::Awareness(payload).encode()),
            Some(&self.conn),
        );
    }

    fn handle_awareness_query(&mut self, doc: &DocumentId) {
        // Read-only: answers with the current snapshot, mutates nothing
        let participants = snapshot_payload(&self.hub.presence.snapshot(doc));
        let payload = serde_json::to_vec(&participants).unwrap_or_default();
        self.send_binary(&Frame::Awareness(payload));
    }

    async fn handle_update(&mut self, doc: &DocumentId, bytes: bytes::Bytes) {
        match self
            .hub
            .cache
            .apply_and_persist(doc, &bytes, self.identity.is_guest())
            .await
        {
            Ok(true) => {
                // Verbatim relay; no reinterpretation of the update bytes
                self.hub
                    .broadcast(doc, Payload::Binary(bytes), Some(&self.conn));
            }
            Ok(false) => {
                self.reply_error("READ_ONLY", "Guests cannot modify the document");
            }
            Err(e @ CoreError::Persistence(_)) => {
                // The in-memory state advanced and must not regress:
                // peers still get the relay, the writer retries storage
                warn!(client = %self.conn, doc = %doc, error = %e, "Update applied but not persisted");
                self.hub
                    .broadcast(doc, Payload::Binary(bytes), Some(&self.conn));
                self.reply_error("PERSIST_FAILED", e.to_string());
            }
            Err(e) => {
                self.reply_error("PROTOCOL_ERROR", e.to_string());
            }
        }
    }

    fn reply_error(&self, code: &str, message: impl Into<String>) {
        self.send_event(&ServerEvent::error(code, message));
    }

    fn send_event(&self, event: &ServerEvent) {
        self.hub
            .connections
            .send(&self.conn, Payload::text(event.to_json()));
    }

    fn send_binary(&self, frame: &Frame) {
        self.hub
            .connections
            .send(&self.conn, Payload::binary(frame.encode()));
    }
}

impl Drop for SessionHandler {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codoc_protocol::PresenceEntry;
    use codoc_storage::{DocumentStore, MemoryStore};
    use std::collections::BTreeMap;
    use tokio::sync::mpsc::UnboundedReceiver;
    use yrs::updates::decoder::Decode;
    use yrs::{Doc, GetString, ReadTxn, StateVector, Text, Transact, Update};

    fn alice() -> Identity {
        Identity::User {
            id: 1,
            display_name: "Alice".into(),
            avatar_color: "#3B82F6".into(),
            is_admin: true,
        }
    }

    fn bob() -> Identity {
        Identity::User {
            id: 2,
            display_name: "Bob".into(),
            avatar_color: "#EF4444".into(),
            is_admin: false,
        }
    }

    fn make_hub() -> (Arc<Hub>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (Arc::new(Hub::new(store.clone())), store)
    }

    fn connect(
        hub: &Arc<Hub>,
        identity: Identity,
    ) -> (SessionHandler, UnboundedReceiver<Payload>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SessionHandler::new(hub.clone(), identity, tx), rx)
    }

    async fn join(handler: &mut SessionHandler, doc: &str) {
        let event = ClientEvent::Join {
            document_id: doc.into(),
            state_vector: None,
        };
        handler.handle_text(&event.to_json()).await;
    }

    fn drain(rx: &mut UnboundedReceiver<Payload>) -> Vec<Payload> {
        let mut out = Vec::new();
        while let Ok(payload) = rx.try_recv() {
            out.push(payload);
        }
        out
    }

    fn events(payloads: &[Payload]) -> Vec<ServerEvent> {
        payloads
            .iter()
            .filter_map(|p| match p {
                Payload::Text(s) => Some(ServerEvent::from_json(s).unwrap()),
                Payload::Binary(_) => None,
            })
            .collect()
    }

    fn frames(payloads: &[Payload]) -> Vec<Frame> {
        payloads
            .iter()
            .filter_map(|p| match p {
                Payload::Binary(b) => Some(Frame::decode(b).unwrap()),
                Payload::Text(_) => None,
            })
            .collect()
    }

    /// Valid CRDT update whose first byte cannot collide with a frame
    /// tag: merging edits from four distinct clients makes the encoded
    /// client count (the leading varint) at least 4.
    fn opaque_update(text: &str) -> Vec<u8> {
        let acc = Doc::new();
        for part in ["w_", "x_", "y_", text] {
            let d = Doc::new();
            let t = d.get_or_insert_text("content");
            {
                let mut txn = d.transact_mut();
                t.insert(&mut txn, 0, part);
            }
            let update = {
                let txn = d.transact();
                txn.encode_state_as_update_v1(&StateVector::default())
            };
            let mut txn = acc.transact_mut();
            txn.apply_update(Update::decode_v1(&update).unwrap());
        }
        let txn = acc.transact();
        let bytes = txn.encode_state_as_update_v1(&StateVector::default());
        assert!(bytes[0] >= 4);
        bytes
    }

    fn text_of_bytes(bytes: &[u8]) -> String {
        let doc = Doc::new();
        {
            let mut txn = doc.transact_mut();
            txn.apply_update(Update::decode_v1(bytes).unwrap());
        }
        let text = doc.get_or_insert_text("content");
        let txn = doc.transact();
        text.get_string(&txn)
    }

    fn error_codes(payloads: &[Payload]) -> Vec<String> {
        events(payloads)
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::Error { code, .. } => Some(code),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_first_joiner_gets_empty_snapshot_and_full_state() {
        let (hub, store) = make_hub();
        let (mut a, mut rx_a) = connect(&hub, alice());

        join(&mut a, "42").await;

        let received = drain(&mut rx_a);
        match &events(&received)[..] {
            [ServerEvent::PresenceInit {
                document_id,
                participants,
            }] => {
                assert_eq!(document_id, "42");
                assert_eq!(participants, &BTreeMap::new());
            }
            other => panic!("unexpected events {:?}", other),
        }
        match &frames(&received)[..] {
            [Frame::SyncReply(update)] => assert_eq!(text_of_bytes(update), ""),
            other => panic!("unexpected frames {:?}", other),
        }

        // Nothing written: joins do not mutate the document
        assert!(store.write_log().is_empty());
    }

    #[tokio::test]
    async fn test_second_joiner_sees_existing_participant() {
        let (hub, _) = make_hub();
        let (mut a, mut rx_a) = connect(&hub, alice());
        let (mut b, mut rx_b) = connect(&hub, bob());

        join(&mut a, "42").await;
        drain(&mut rx_a);

        join(&mut b, "42").await;

        let b_events = events(&drain(&mut rx_b));
        match &b_events[0] {
            ServerEvent::PresenceInit { participants, .. } => {
                assert_eq!(participants.len(), 1);
                let entry: &PresenceEntry = &participants["1"];
                assert_eq!(entry.display_name, "Alice");
                assert_eq!(entry.is_admin, Some(true));
            }
            other => panic!("unexpected event {:?}", other),
        }

        // A hears B's join announcement
        match &events(&drain(&mut rx_a))[..] {
            [ServerEvent::PresenceUpdate {
                kind: PresenceChange::Joined,
                participant,
                is_guest: false,
                ..
            }] => assert_eq!(participant, "2"),
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_update_relay_and_persistence() {
        let (hub, store) = make_hub();
        let (mut a, mut rx_a) = connect(&hub, alice());
        let (mut b, mut rx_b) = connect(&hub, bob());
        join(&mut a, "42").await;
        join(&mut b, "42").await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        let u1 = opaque_update("hello");
        a.handle_binary(&u1).await;

        // Verbatim relay to B, nothing echoed back to A
        let b_received = drain(&mut rx_b);
        match &b_received[..] {
            [Payload::Binary(bytes)] => assert_eq!(bytes.as_ref(), &u1[..]),
            other => panic!("unexpected payloads {:?}", other),
        }
        assert!(drain(&mut rx_a).is_empty());

        // The store saw the post-apply state
        assert_eq!(store.write_log(), vec!["42"]);
        let stored = store.load("42").await.unwrap().unwrap();
        assert!(text_of_bytes(&stored).contains("hello"));
    }

    #[tokio::test]
    async fn test_guest_update_is_rejected_and_not_relayed() {
        let (hub, store) = make_hub();
        let (mut a, mut rx_a) = connect(&hub, alice());
        let (mut g, mut rx_g) = connect(&hub, Identity::Guest { id: 100 });
        join(&mut a, "42").await;
        join(&mut g, "42").await;
        drain(&mut rx_a);
        drain(&mut rx_g);

        g.handle_binary(&opaque_update("nope")).await;

        assert_eq!(error_codes(&drain(&mut rx_g)), vec!["READ_ONLY"]);
        assert!(drain(&mut rx_a).is_empty());
        assert!(store.write_log().is_empty());

        let engine = hub.cache.get(&DocumentId::new("42").unwrap()).await.unwrap();
        assert_eq!(text_of_bytes(&engine.encode_full()), "");
    }

    #[tokio::test]
    async fn test_guest_cursor_is_accepted_but_silent() {
        let (hub, _) = make_hub();
        let (mut a, mut rx_a) = connect(&hub, alice());
        let (mut g, mut rx_g) = connect(&hub, Identity::Guest { id: 101 });
        join(&mut a, "42").await;
        join(&mut g, "42").await;
        drain(&mut rx_a);
        drain(&mut rx_g);

        let event = ClientEvent::CursorMove {
            document_id: "42".into(),
            position: CursorPos { anchor: 4, head: 9 },
        };
        g.handle_text(&event.to_json()).await;

        assert!(drain(&mut rx_a).is_empty());
        assert!(drain(&mut rx_g).is_empty());

        // The guest's presence entry kept its default cursor
        let doc = DocumentId::new("42").unwrap();
        let snapshot = hub.presence.snapshot(&doc);
        let guest = &snapshot[&codoc_core::ParticipantKey::Guest(101)];
        assert_eq!(guest.position, CursorPos::default());
    }

    #[tokio::test]
    async fn test_cursor_broadcast_for_authenticated() {
        let (hub, _) = make_hub();
        let (mut a, mut rx_a) = connect(&hub, alice());
        let (mut b, mut rx_b) = connect(&hub, bob());
        join(&mut a, "42").await;
        join(&mut b, "42").await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        let event = ClientEvent::CursorMove {
            document_id: "42".into(),
            position: CursorPos { anchor: 3, head: 8 },
        };
        a.handle_text(&event.to_json()).await;

        match &events(&drain(&mut rx_b))[..] {
            [ServerEvent::CursorMove {
                participant,
                position,
                info,
                ..
            }] => {
                assert_eq!(participant, "1");
                assert_eq!(*position, CursorPos { anchor: 3, head: 8 });
                assert_eq!(info.display_name, "Alice");
            }
            other => panic!("unexpected events {:?}", other),
        }
        assert!(drain(&mut rx_a).is_empty());
    }

    #[tokio::test]
    async fn test_idempotent_leave_announces_once() {
        let (hub, _) = make_hub();
        let (mut a, mut rx_a) = connect(&hub, alice());
        let (mut b, mut rx_b) = connect(&hub, bob());
        join(&mut a, "42").await;
        join(&mut b, "42").await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        let leave = ClientEvent::Leave {
            document_id: "42".into(),
        };
        a.handle_text(&leave.to_json()).await;
        a.handle_text(&leave.to_json()).await;

        let left: Vec<ServerEvent> = events(&drain(&mut rx_b))
            .into_iter()
            .filter(|e| matches!(e, ServerEvent::PresenceUpdate { kind: PresenceChange::Left, .. }))
            .collect();
        assert_eq!(left.len(), 1);
        assert!(!hub.presence.contains(
            &DocumentId::new("42").unwrap(),
            &codoc_core::ParticipantKey::User(1)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_teardown_and_instance_eviction() {
        let (hub, store) = make_hub();
        let (mut a, mut rx_a) = connect(&hub, alice());
        let (mut b, mut rx_b) = connect(&hub, bob());
        let (mut g, mut rx_g) = connect(&hub, Identity::Guest { id: 102 });
        join(&mut a, "42").await;
        join(&mut b, "42").await;
        join(&mut g, "42").await;

        a.handle_binary(&opaque_update("content")).await;
        drain(&mut rx_a);
        drain(&mut rx_b);
        drain(&mut rx_g);

        let doc = DocumentId::new("42").unwrap();

        // A drops; B and G remain, so the instance is retained
        a.close();
        assert!(hub.cache.contains(&doc));
        match &events(&drain(&mut rx_b))[..] {
            [ServerEvent::PresenceUpdate {
                kind: PresenceChange::Left,
                participant,
                reason: None,
                ..
            }] => assert_eq!(participant, "1"),
            other => panic!("unexpected events {:?}", other),
        }

        let leave = ClientEvent::Leave {
            document_id: "42".into(),
        };
        b.handle_text(&leave.to_json()).await;
        assert!(hub.cache.contains(&doc));
        g.handle_text(&leave.to_json()).await;
        assert!(!hub.cache.contains(&doc));

        // A later join reconstructs the state the store remembers
        let (mut c, mut rx_c) = connect(&hub, bob());
        join(&mut c, "42").await;
        let received = drain(&mut rx_c);
        match &frames(&received)[..] {
            [Frame::SyncReply(update)] => {
                let stored = store.load("42").await.unwrap().unwrap();
                assert_eq!(text_of_bytes(update), text_of_bytes(&stored));
                assert!(text_of_bytes(update).contains("content"));
            }
            other => panic!("unexpected frames {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sync_request_with_vector_gets_minimal_delta() {
        let (hub, _) = make_hub();
        let (mut a, mut rx_a) = connect(&hub, alice());
        join(&mut a, "42").await;
        a.handle_binary(&opaque_update("catch me up")).await;
        drain(&mut rx_a);

        let engine = hub.cache.get(&DocumentId::new("42").unwrap()).await.unwrap();
        let full_len = engine.encode_full().len();

        // A client that has seen everything asks with the current vector
        a.handle_binary(&Frame::SyncRequest(engine.state_vector()).encode())
            .await;
        match &frames(&drain(&mut rx_a))[..] {
            [Frame::SyncReply(delta)] => assert!(delta.len() < full_len),
            other => panic!("unexpected frames {:?}", other),
        }

        // An empty request still yields the full state
        a.handle_binary(&Frame::SyncRequest(Vec::new()).encode()).await;
        match &frames(&drain(&mut rx_a))[..] {
            [Frame::SyncReply(update)] => assert_eq!(update.len(), full_len),
            other => panic!("unexpected frames {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_join_with_state_vector_gets_delta() {
        let (hub, _) = make_hub();
        let (mut a, mut rx_a) = connect(&hub, alice());
        join(&mut a, "42").await;
        a.handle_binary(&opaque_update("existing")).await;
        drain(&mut rx_a);

        let engine = hub.cache.get(&DocumentId::new("42").unwrap()).await.unwrap();
        let full_len = engine.encode_full().len();
        let sv = ClientEvent::encode_state_vector(&engine.state_vector());

        let (mut b, mut rx_b) = connect(&hub, bob());
        let event = ClientEvent::Join {
            document_id: "42".into(),
            state_vector: Some(sv),
        };
        b.handle_text(&event.to_json()).await;

        match &frames(&drain(&mut rx_b))[..] {
            [Frame::SyncReply(delta)] => assert!(delta.len() < full_len),
            other => panic!("unexpected frames {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_awareness_query_is_read_only() {
        let (hub, _) = make_hub();
        let (mut a, mut rx_a) = connect(&hub, alice());
        let (mut b, mut rx_b) = connect(&hub, bob());
        join(&mut a, "42").await;
        join(&mut b, "42").await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        let doc = DocumentId::new("42").unwrap();
        let before = hub.presence.snapshot(&doc).len();

        b.handle_binary(&Frame::AwarenessQuery.encode()).await;

        match &frames(&drain(&mut rx_b))[..] {
            [Frame::Awareness(payload)] => {
                let map: BTreeMap<String, PresenceEntry> =
                    serde_json::from_slice(payload).unwrap();
                assert!(map.contains_key("1"));
                assert!(map.contains_key("2"));
            }
            other => panic!("unexpected frames {:?}", other),
        }
        assert_eq!(hub.presence.snapshot(&doc).len(), before);
        assert!(drain(&mut rx_a).is_empty());
    }

    #[tokio::test]
    async fn test_awareness_relay_drops_guests() {
        let (hub, _) = make_hub();
        let (mut a, mut rx_a) = connect(&hub, alice());
        let (mut b, mut rx_b) = connect(&hub, bob());
        let (mut g, mut rx_g) = connect(&hub, Identity::Guest { id: 103 });
        join(&mut a, "42").await;
        join(&mut b, "42").await;
        join(&mut g, "42").await;
        drain(&mut rx_a);
        drain(&mut rx_b);
        drain(&mut rx_g);

        a.handle_binary(&Frame::Awareness(b"{\"cursor\":1}".to_vec()).encode())
            .await;
        match &frames(&drain(&mut rx_b))[..] {
            [Frame::Awareness(payload)] => assert_eq!(payload, b"{\"cursor\":1}"),
            other => panic!("unexpected frames {:?}", other),
        }

        drain(&mut rx_g);
        g.handle_binary(&Frame::Awareness(b"{}".to_vec()).encode()).await;
        assert!(drain(&mut rx_a).is_empty());
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn test_sync_before_join_is_rejected() {
        let (hub, _) = make_hub();
        let (mut a, mut rx_a) = connect(&hub, alice());

        a.handle_binary(&Frame::SyncRequest(Vec::new()).encode()).await;
        assert_eq!(error_codes(&drain(&mut rx_a)), vec!["NOT_JOINED"]);
    }

    #[tokio::test]
    async fn test_malformed_input_gets_error_reply_only() {
        let (hub, _) = make_hub();
        let (mut a, mut rx_a) = connect(&hub, alice());
        let (mut b, mut rx_b) = connect(&hub, bob());
        join(&mut a, "42").await;
        join(&mut b, "42").await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        a.handle_text("not json at all").await;
        a.handle_binary(&[]).await;

        let codes = error_codes(&drain(&mut rx_a));
        assert_eq!(codes, vec!["PROTOCOL_ERROR", "PROTOCOL_ERROR"]);
        // Other connections are unaffected
        assert!(drain(&mut rx_b).is_empty());

        // The connection stays usable afterwards
        let ping = ClientEvent::Ping {
            document_id: "42".into(),
        };
        a.handle_text(&ping.to_json()).await;
        assert!(drain(&mut rx_a).is_empty());
    }

    #[tokio::test]
    async fn test_invalid_document_id_on_join() {
        let (hub, _) = make_hub();
        let (mut a, mut rx_a) = connect(&hub, alice());

        join(&mut a, "bad/id").await;
        assert_eq!(error_codes(&drain(&mut rx_a)), vec!["INVALID_DOCUMENT"]);
        assert_eq!(
            hub.connections
                .member_count(&DocumentId::new("badid").unwrap()),
            0
        );
    }

    #[tokio::test]
    async fn test_persistence_failure_surfaces_but_relays() {
        let (hub, store) = make_hub();
        let (mut a, mut rx_a) = connect(&hub, alice());
        let (mut b, mut rx_b) = connect(&hub, bob());
        join(&mut a, "42").await;
        join(&mut b, "42").await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        store.set_fail_writes(true);
        let u1 = opaque_update("kept in memory");
        a.handle_binary(&u1).await;

        // Writer is told to retry storage
        assert_eq!(error_codes(&drain(&mut rx_a)), vec!["PERSIST_FAILED"]);

        // The room still converges on the applied update
        match &drain(&mut rx_b)[..] {
            [Payload::Binary(bytes)] => assert_eq!(bytes.as_ref(), &u1[..]),
            other => panic!("unexpected payloads {:?}", other),
        }
        let engine = hub.cache.get(&DocumentId::new("42").unwrap()).await.unwrap();
        assert!(text_of_bytes(&engine.encode_full()).contains("kept in memory"));
    }

    #[tokio::test]
    async fn test_rejoin_overwrites_presence_entry() {
        let (hub, _) = make_hub();
        let (mut tab1, mut rx1) = connect(&hub, alice());
        join(&mut tab1, "42").await;
        drain(&mut rx1);

        // Second connection, same user: last join wins, single entry
        let (mut tab2, mut rx2) = connect(&hub, alice());
        join(&mut tab2, "42").await;
        drain(&mut rx2);

        let doc = DocumentId::new("42").unwrap();
        assert_eq!(hub.presence.snapshot(&doc).len(), 1);
        assert_eq!(hub.connections.member_count(&doc), 2);
    }
}
