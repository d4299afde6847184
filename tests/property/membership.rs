// Test-specific lint overrides: property tests use unwrap/expect freely.
#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Property-based membership tests.
//!
//! Uses proptest to drive the relay engine through arbitrary sequences of
//! connects, joins, leaves, relays and disconnects, and verifies after every
//! step:
//! 1. `C ∈ members(R)` exactly when `R ∈ rooms(C)`.
//! 2. A room exists exactly when it has members.
//! 3. The engine agrees with a simple reference model.
//! 4. A relayed ciphertext never reaches its sender.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::Mutex;
use proptest::prelude::*;
use roomcast_proto::codec::{Frame, Payload};
use roomcast_relay::engine::{RelayEngine, Transport};
use roomcast_relay::registry::{ConnectionId, ConnectionState};
use serde_json::{Value, json};

const CONNECTIONS: u64 = 6;
const ROOMS: [&str; 3] = ["lobby", "dev", "random"];

/// Transport double that only remembers who received what.
#[derive(Default)]
struct Recorder {
    sent: Mutex<Vec<(ConnectionId, String)>>,
}

impl Transport for Recorder {
    fn send(&self, to: ConnectionId, frame: &Frame) -> bool {
        self.sent.lock().push((to, frame.event.clone()));
        true
    }
}

#[derive(Debug, Clone)]
enum Op {
    Connect(u64),
    Join(u64, usize),
    Leave(u64, usize),
    Relay(u64, usize),
    Disconnect(u64),
}

fn arb_op() -> impl Strategy<Value = Op> {
    let conn = 0..CONNECTIONS;
    let room = 0..ROOMS.len();
    prop_oneof![
        conn.clone().prop_map(Op::Connect),
        (conn.clone(), room.clone()).prop_map(|(c, r)| Op::Join(c, r)),
        (conn.clone(), room.clone()).prop_map(|(c, r)| Op::Leave(c, r)),
        (conn.clone(), room).prop_map(|(c, r)| Op::Relay(c, r)),
        conn.prop_map(Op::Disconnect),
    ]
}

fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other:?}"),
    }
}

/// Reference model: live connections and their rooms.
type Model = BTreeMap<u64, BTreeSet<&'static str>>;

fn apply(engine: &RelayEngine<Recorder>, model: &mut Model, op: &Op) {
    match *op {
        Op::Connect(c) => {
            if !model.contains_key(&c) {
                engine.on_connect(ConnectionId::from_raw(c));
                model.insert(c, BTreeSet::new());
            }
        }
        Op::Join(c, r) => {
            let data = json!({"username": format!("u{c}"), "room": ROOMS[r]});
            engine.on_event(ConnectionId::from_raw(c), "join", payload(data));
            if let Some(rooms) = model.get_mut(&c) {
                rooms.insert(ROOMS[r]);
            }
        }
        Op::Leave(c, r) => {
            let data = json!({"username": format!("u{c}"), "room": ROOMS[r]});
            engine.on_event(ConnectionId::from_raw(c), "leave", payload(data));
            if let Some(rooms) = model.get_mut(&c) {
                rooms.remove(ROOMS[r]);
            }
        }
        Op::Relay(c, r) => {
            let sender = ConnectionId::from_raw(c);
            engine.transport().sent.lock().clear();
            engine.on_event(sender, "ciphertext", payload(json!({"room": ROOMS[r]})));

            let sent = engine.transport().sent.lock();
            let recipients: BTreeSet<u64> = sent
                .iter()
                .filter(|(_, event)| event == "ciphertext")
                .map(|(to, _)| to.as_raw())
                .collect();
            drop(sent);
            assert!(!recipients.contains(&c), "sender received its own ciphertext");

            let expected: BTreeSet<u64> = model
                .iter()
                .filter(|(id, rooms)| **id != c && rooms.contains(ROOMS[r]))
                .map(|(id, _)| *id)
                .collect();
            assert_eq!(recipients, expected);
        }
        Op::Disconnect(c) => {
            engine.on_disconnect(ConnectionId::from_raw(c));
            model.remove(&c);
        }
    }
}

fn check_invariants(engine: &RelayEngine<Recorder>, model: &Model) {
    for c in 0..CONNECTIONS {
        let id = ConnectionId::from_raw(c);
        let joined: BTreeSet<String> = engine.rooms_of(id).into_iter().collect();

        for room in ROOMS {
            let in_directory = engine.members(room).contains(&id);
            let in_registry = joined.contains(room);
            assert_eq!(in_directory, in_registry, "tables disagree for {id} in {room}");
        }

        let expected_state = match model.get(&c) {
            None => ConnectionState::Disconnected,
            Some(rooms) if rooms.is_empty() => ConnectionState::Connected,
            Some(_) => ConnectionState::Joined,
        };
        assert_eq!(engine.state(id), expected_state);

        let model_rooms: BTreeSet<String> = model
            .get(&c)
            .map(|rooms| rooms.iter().map(|r| (*r).to_string()).collect())
            .unwrap_or_default();
        assert_eq!(joined, model_rooms);
    }

    let live_rooms = ROOMS
        .iter()
        .filter(|room| !engine.members(room).is_empty())
        .count();
    let stats = engine.stats();
    assert_eq!(stats.rooms, live_rooms, "empty rooms must not linger");
    assert_eq!(stats.connections, model.len());
}

proptest! {
    #[test]
    fn membership_tables_stay_consistent(ops in prop::collection::vec(arb_op(), 1..64)) {
        let engine = RelayEngine::new(Recorder::default());
        let mut model = Model::new();

        for op in &ops {
            apply(&engine, &mut model, op);
            check_invariants(&engine, &model);
        }
    }

    #[test]
    fn disconnect_sends_one_left_notice_per_remaining_member(
        rooms in prop::collection::btree_set(0..ROOMS.len(), 1..=ROOMS.len()),
        peers in 1u64..CONNECTIONS,
    ) {
        let engine = RelayEngine::new(Recorder::default());
        let leaver = ConnectionId::from_raw(0);
        engine.on_connect(leaver);
        for r in &rooms {
            engine.on_event(leaver, "join", payload(json!({"username": "L", "room": ROOMS[*r]})));
        }
        for p in 1..=peers {
            let id = ConnectionId::from_raw(p);
            engine.on_connect(id);
            for r in &rooms {
                engine.on_event(id, "join", payload(json!({"username": format!("p{p}"), "room": ROOMS[*r]})));
            }
        }
        engine.transport().sent.lock().clear();

        engine.on_disconnect(leaver);

        let sent = engine.transport().sent.lock();
        for p in 1..=peers {
            let notices = sent
                .iter()
                .filter(|(to, event)| to.as_raw() == p && event == "system")
                .count();
            prop_assert_eq!(notices, rooms.len());
        }
        prop_assert!(sent.iter().all(|(to, _)| *to != leaver));
    }
}
