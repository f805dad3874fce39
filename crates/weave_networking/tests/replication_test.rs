//! Integration test for snapshot building and client-side reconstruction.

use weave_core::{Position, Rotation};
use weave_networking::replication::TankState;
use weave_networking::{
    BitReader, BitWriter, ClassType, DirtyMask, EntityKind, EntityRecord, EntityStore, Packet,
    ReplicaMirror, ReplicationAction, ReplicationError, ReplicationMode, StateSnapshot,
};

fn snapshot(writer: &BitWriter) -> StateSnapshot {
    match Packet::decode(&mut BitReader::new(writer.as_bytes())).unwrap() {
        Packet::State(snapshot) => snapshot,
        other => panic!("expected state, got {other:?}"),
    }
}

fn records(store: &mut EntityStore) -> Vec<EntityRecord> {
    snapshot(&store.build_snapshot().unwrap()).records
}

fn tank() -> EntityKind {
    EntityKind::Tank(TankState::default())
}

#[test]
fn test_pool_exhaustion() {
    let mut store = EntityStore::new(2, ReplicationMode::Full, 1024);

    let a = store.add_entity("A", tank()).unwrap();
    let b = store.add_entity("B", tank()).unwrap();
    assert_eq!(a.0, 1);
    assert_eq!(b.0, 2);

    let err = store.add_entity("C", tank()).unwrap_err();
    assert!(matches!(err, ReplicationError::PoolExhausted { capacity: 2 }));
    assert_eq!(store.len(), 2);

    let sent = records(&mut store);
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|r| r.action == ReplicationAction::Create));
    assert_eq!(sent[0].name, "A");
    assert_eq!(sent[1].name, "B");
}

#[test]
fn test_destroy_is_sent_exactly_once() {
    let mut store = EntityStore::new(4, ReplicationMode::Full, 1024);
    let keep = store.add_entity("keep", EntityKind::Prop).unwrap();
    let gone = store.add_entity("gone", EntityKind::Prop).unwrap();
    records(&mut store);

    store.remove_entity(gone).unwrap();
    assert_eq!(store.free_slots(), 3);

    let first = records(&mut store);
    let destroys: Vec<_> = first
        .iter()
        .filter(|r| r.action == ReplicationAction::Destroy)
        .collect();
    assert_eq!(destroys.len(), 1);
    assert_eq!(destroys[0].network_id, gone);
    assert_eq!(destroys[0].class_type, ClassType::Prop);
    assert!(first.iter().any(|r| r.network_id == keep));

    let second = records(&mut store);
    assert!(second.iter().all(|r| r.action != ReplicationAction::Destroy));
    assert!(matches!(
        store.remove_entity(gone),
        Err(ReplicationError::UnknownEntity(id)) if id == gone
    ));
}

#[test]
fn test_full_mode_is_deterministic() {
    let build = || {
        let mut store = EntityStore::new(8, ReplicationMode::Full, 2048);
        for i in 0..5u8 {
            let id = store.add_entity(format!("e{i}"), tank()).unwrap();
            store
                .set_position(id, Position::new(f32::from(i), 0.0, -f32::from(i)))
                .unwrap();
            store.set_rotation(id, Rotation::from_yaw(0.1 * f32::from(i))).unwrap();
        }
        let first = store.build_snapshot().unwrap().as_bytes().to_vec();
        let second = store.build_snapshot().unwrap().as_bytes().to_vec();
        (first, second)
    };

    let (a1, a2) = build();
    let (b1, b2) = build();
    assert_eq!(a1, b1);
    assert_eq!(a2, b2);
}

#[test]
fn test_full_mode_resends_unchanged_entities() {
    let mut store = EntityStore::new(4, ReplicationMode::Full, 1024);
    let id = store.add_entity("still", tank()).unwrap();
    records(&mut store);

    let again = records(&mut store);
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].network_id, id);
    assert_eq!(again[0].action, ReplicationAction::Update);
    assert_eq!(again[0].dirty, DirtyMask::ALL);
    assert!(again[0].name.is_empty());
}

#[test]
fn test_delta_mode_sends_only_changes() {
    let mut store = EntityStore::new(4, ReplicationMode::Delta, 1024);
    let moving = store.add_entity("moving", tank()).unwrap();
    let _still = store.add_entity("still", tank()).unwrap();
    assert_eq!(records(&mut store).len(), 2);

    assert!(records(&mut store).is_empty());

    store.set_position(moving, Position::new(1.0, 0.0, 0.0)).unwrap();
    let changed = records(&mut store);
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0].network_id, moving);
    assert_eq!(changed[0].dirty, DirtyMask::POSITION);

    // Setting the same value again is not a change.
    store.set_position(moving, Position::new(1.0, 0.0, 0.0)).unwrap();
    assert!(records(&mut store).is_empty());
}

#[test]
fn test_mirror_follows_store() {
    let mut store = EntityStore::new(4, ReplicationMode::Delta, 1024);
    let mut mirror = ReplicaMirror::new();

    let a = store.add_entity("Alice", tank()).unwrap();
    let b = store.add_entity("crate", EntityKind::Prop).unwrap();
    mirror.apply_snapshot(&snapshot(&store.build_snapshot().unwrap()));
    assert_eq!(mirror.len(), 2);
    assert_eq!(mirror.find_by_name("Alice").map(|e| e.network_id), Some(a));

    store.set_rotation(a, Rotation::from_yaw(1.5)).unwrap();
    if let EntityKind::Tank(state) = store.kind_mut(a).unwrap() {
        state.health = 40;
    }
    store.remove_entity(b).unwrap();
    mirror.apply_snapshot(&snapshot(&store.build_snapshot().unwrap()));

    assert_eq!(mirror.len(), 1);
    assert!(mirror.get(b).is_none());
    let alice = mirror.get(a).unwrap();
    assert_eq!(alice.name, "Alice");
    assert_eq!(alice.position, Position::default());
    assert!((alice.rotation.yaw - 1.5).abs() < f32::EPSILON);
    assert!(matches!(alice.kind, EntityKind::Tank(s) if s.health == 40));
}

#[test]
fn test_late_joiner_gets_creates_after_resync() {
    let mut store = EntityStore::new(4, ReplicationMode::Delta, 1024);
    let a = store.add_entity("early", tank()).unwrap();
    store.set_position(a, Position::new(3.0, 0.0, 4.0)).unwrap();
    records(&mut store);

    let mut late = ReplicaMirror::new();
    store.resync();
    late.apply_snapshot(&snapshot(&store.build_snapshot().unwrap()));

    let early = late.get(a).unwrap();
    assert_eq!(early.name, "early");
    assert_eq!(early.position, Position::new(3.0, 0.0, 4.0));
}

#[test]
fn test_oversized_snapshot_leaves_store_untouched() {
    let mut store = EntityStore::new(16, ReplicationMode::Delta, 32);
    for i in 0..16 {
        store.add_entity(format!("entity-{i}"), tank()).unwrap();
    }

    assert!(store.build_snapshot().is_err());
    assert!(store
        .iter()
        .all(|e| e.action() == ReplicationAction::Create && e.dirty() == DirtyMask::ALL));
}
