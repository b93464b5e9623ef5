//! NoteHub: the realtime store's state, independent of any transport.
//!
//! Holds every record and, per note, the set of subscribed clients. Each
//! request yields the messages to send and whether the records changed.
//! Every mutation broadcasts `changed` to all subscribers of the note,
//! including the client that wrote it.

use notepad_core::note_id::NoteIdGenerator;
use notepad_core::{NoteId, NoteRecord, now_ms};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

use crate::message::{ClientMessage, ServerMessage};

/// A message addressed to one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub client_id: String,
    pub message: ServerMessage,
}

/// Result of handling one request.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct HubReply {
    pub outbound: Vec<Outbound>,
    /// Records changed and should be persisted
    pub mutated: bool,
}

impl HubReply {
    fn send(&mut self, client_id: &str, message: ServerMessage) {
        self.outbound.push(Outbound {
            client_id: client_id.to_string(),
            message,
        });
    }
}

#[derive(Debug, Default)]
pub struct NoteHub {
    notes: BTreeMap<NoteId, NoteRecord>,
    subscribers: HashMap<NoteId, BTreeSet<String>>,
    ids: NoteIdGenerator,
}

impl NoteHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from previously persisted records.
    pub fn with_notes(notes: BTreeMap<NoteId, NoteRecord>) -> Self {
        Self {
            notes,
            ..Self::default()
        }
    }

    pub fn notes(&self) -> &BTreeMap<NoteId, NoteRecord> {
        &self.notes
    }

    pub fn get(&self, id: &NoteId) -> Option<&NoteRecord> {
        self.notes.get(id)
    }

    pub fn subscriber_count(&self, id: &NoteId) -> usize {
        self.subscribers.get(id).map(BTreeSet::len).unwrap_or(0)
    }

    pub fn handle(&mut self, client_id: &str, message: ClientMessage) -> HubReply {
        let mut reply = HubReply::default();
        match message {
            ClientMessage::Push { request_id } => {
                let note_id = self.allocate();
                debug!("Allocated {} for {}", note_id, client_id);
                reply.send(client_id, ServerMessage::Pushed { request_id, note_id });
            }
            ClientMessage::Set {
                request_id,
                note_id,
                record,
            } => {
                self.notes.insert(note_id.clone(), record);
                reply.send(client_id, ServerMessage::Ack { request_id });
                self.broadcast_changed(&note_id, &mut reply);
                reply.mutated = true;
            }
            ClientMessage::Update {
                request_id,
                note_id,
                patch,
            } => {
                self.notes.entry(note_id.clone()).or_default().apply(&patch);
                reply.send(client_id, ServerMessage::Ack { request_id });
                self.broadcast_changed(&note_id, &mut reply);
                reply.mutated = true;
            }
            ClientMessage::Get {
                request_id,
                note_id,
            } => {
                let record = self.notes.get(&note_id).cloned();
                reply.send(
                    client_id,
                    ServerMessage::Value {
                        request_id,
                        note_id,
                        record,
                    },
                );
            }
            ClientMessage::Subscribe { note_id } => {
                self.subscribers
                    .entry(note_id.clone())
                    .or_default()
                    .insert(client_id.to_string());
                if let Some(record) = self.notes.get(&note_id) {
                    reply.send(
                        client_id,
                        ServerMessage::Changed {
                            note_id,
                            record: record.clone(),
                        },
                    );
                }
            }
            ClientMessage::Unsubscribe { note_id } => {
                self.unsubscribe(client_id, &note_id);
            }
        }
        reply
    }

    /// Drop every subscription held by a client.
    pub fn disconnect(&mut self, client_id: &str) {
        self.subscribers.retain(|_, clients| {
            clients.remove(client_id);
            !clients.is_empty()
        });
    }

    fn unsubscribe(&mut self, client_id: &str, note_id: &NoteId) {
        if let Some(clients) = self.subscribers.get_mut(note_id) {
            clients.remove(client_id);
            if clients.is_empty() {
                self.subscribers.remove(note_id);
            }
        }
    }

    fn allocate(&mut self) -> NoteId {
        loop {
            let id = self.ids.next(now_ms());
            if !self.notes.contains_key(&id) {
                return id;
            }
        }
    }

    fn broadcast_changed(&self, note_id: &NoteId, reply: &mut HubReply) {
        let (Some(record), Some(clients)) = (self.notes.get(note_id), self.subscribers.get(note_id)) else {
            return;
        };
        for client_id in clients {
            reply.send(
                client_id,
                ServerMessage::Changed {
                    note_id: note_id.clone(),
                    record: record.clone(),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notepad_core::NotePatch;

    fn note(id: &str) -> NoteId {
        id.parse().unwrap()
    }

    fn changed_to<'a>(reply: &'a HubReply) -> Vec<&'a str> {
        reply
            .outbound
            .iter()
            .filter(|o| matches!(o.message, ServerMessage::Changed { .. }))
            .map(|o| o.client_id.as_str())
            .collect()
    }

    #[test]
    fn test_push_allocates_distinct_ids() {
        let mut hub = NoteHub::new();
        let mut ids = BTreeSet::new();
        for request_id in 0..50 {
            let reply = hub.handle("a", ClientMessage::Push { request_id });
            assert!(!reply.mutated);
            match &reply.outbound[0].message {
                ServerMessage::Pushed { note_id, .. } => assert!(ids.insert(note_id.clone())),
                other => panic!("Expected Pushed, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_subscribe_sends_current_value() {
        let mut hub = NoteHub::new();
        let reply = hub.handle("a", ClientMessage::Subscribe { note_id: note("n1") });
        assert!(reply.outbound.is_empty());

        hub.handle(
            "b",
            ClientMessage::Set {
                request_id: 1,
                note_id: note("n2"),
                record: NoteRecord::with_content("<b>hi</b>"),
            },
        );
        let reply = hub.handle("a", ClientMessage::Subscribe { note_id: note("n2") });
        assert_eq!(
            reply.outbound,
            vec![Outbound {
                client_id: "a".into(),
                message: ServerMessage::Changed {
                    note_id: note("n2"),
                    record: NoteRecord::with_content("<b>hi</b>"),
                },
            }]
        );
    }

    #[test]
    fn test_update_broadcasts_to_writer_and_others() {
        let mut hub = NoteHub::new();
        hub.handle("a", ClientMessage::Subscribe { note_id: note("n1") });
        hub.handle("b", ClientMessage::Subscribe { note_id: note("n1") });
        hub.handle("c", ClientMessage::Subscribe { note_id: note("other") });

        let reply = hub.handle(
            "a",
            ClientMessage::Update {
                request_id: 9,
                note_id: note("n1"),
                patch: NotePatch::content("typed"),
            },
        );
        assert!(reply.mutated);
        assert_eq!(reply.outbound[0].message, ServerMessage::Ack { request_id: 9 });
        assert_eq!(changed_to(&reply), vec!["a", "b"]);
        assert_eq!(hub.get(&note("n1")).unwrap().content, "typed");
    }

    #[test]
    fn test_update_preserves_other_fields() {
        let mut hub = NoteHub::new();
        hub.handle(
            "a",
            ClientMessage::Set {
                request_id: 1,
                note_id: note("n1"),
                record: NoteRecord::with_content("body"),
            },
        );
        hub.handle(
            "a",
            ClientMessage::Update {
                request_id: 2,
                note_id: note("n1"),
                patch: NotePatch::lock_with_password("pw"),
            },
        );
        let record = hub.get(&note("n1")).unwrap();
        assert_eq!(record.content, "body");
        assert!(record.is_locked);
        assert_eq!(record.password.as_deref(), Some("pw"));
    }

    #[test]
    fn test_get_missing_note() {
        let mut hub = NoteHub::new();
        let reply = hub.handle(
            "a",
            ClientMessage::Get {
                request_id: 4,
                note_id: note("nope"),
            },
        );
        assert_eq!(
            reply.outbound[0].message,
            ServerMessage::Value {
                request_id: 4,
                note_id: note("nope"),
                record: None,
            }
        );
    }

    #[test]
    fn test_unsubscribe_and_disconnect() {
        let mut hub = NoteHub::new();
        hub.handle("a", ClientMessage::Subscribe { note_id: note("n1") });
        hub.handle("b", ClientMessage::Subscribe { note_id: note("n1") });
        hub.handle("b", ClientMessage::Subscribe { note_id: note("n2") });

        hub.handle("a", ClientMessage::Unsubscribe { note_id: note("n1") });
        assert_eq!(hub.subscriber_count(&note("n1")), 1);

        hub.disconnect("b");
        assert_eq!(hub.subscriber_count(&note("n1")), 0);
        assert_eq!(hub.subscriber_count(&note("n2")), 0);
    }
}
