use super::*;
use crate::value_store::MemoryValueStore;
use proptest::prelude::*;

#[test]
fn test_open_edges() {
    let first = CountTransition::plan(0, Direction::Open);
    assert_eq!(first.next, 1);
    assert_eq!(first.edge, Some(Edge::Start));

    let second = CountTransition::plan(1, Direction::Open);
    assert_eq!(second.next, 2);
    assert_eq!(second.edge, None);
}

#[test]
fn test_close_edges() {
    let intermediate = CountTransition::plan(2, Direction::Close);
    assert_eq!(intermediate.next, 1);
    assert_eq!(intermediate.edge, None);

    let last = CountTransition::plan(1, Direction::Close);
    assert_eq!(last.next, 0);
    assert_eq!(last.edge, Some(Edge::Stop));
    assert!(!last.is_unbalanced());
}

#[test]
fn test_close_at_zero_clamps() {
    let transition = CountTransition::plan(0, Direction::Close);
    assert_eq!(transition.next, 0);
    assert_eq!(transition.edge, None);
    assert!(transition.is_unbalanced());
}

#[test]
fn test_parse_count() {
    assert_eq!(parse_count("3"), Some(3));
    assert_eq!(parse_count(" 12\n"), Some(12));
    assert_eq!(parse_count("7abc"), Some(7));
    assert_eq!(parse_count("abc"), None);
    assert_eq!(parse_count(""), None);
    assert_eq!(parse_count("-1"), None);
    assert_eq!(parse_count("99999999999999999999999"), None);
}

#[test]
fn test_read_missing_and_corrupt_is_zero() {
    let store = MemoryValueStore::new();
    let counter = SessionCounter::new(&store);
    assert_eq!(counter.read("alice"), 0);

    store.set("alice", SESSION_COUNT, Some("garbage")).unwrap();
    assert_eq!(counter.read("alice"), 0);
}

#[test]
fn test_write_zero_deletes() {
    let store = MemoryValueStore::new();
    let counter = SessionCounter::new(&store);

    counter.write("alice", 2).unwrap();
    assert_eq!(store.get("alice", SESSION_COUNT).as_deref(), Some("2"));
    assert_eq!(counter.read("alice"), 2);

    counter.write("alice", 0).unwrap();
    assert_eq!(store.get("alice", SESSION_COUNT), None);
    assert!(store.is_empty());
}

fn direction_strategy() -> impl Strategy<Value = Direction> {
    prop_oneof![Just(Direction::Open), Just(Direction::Close)]
}

proptest! {
    #[test]
    fn prop_edges_alternate_and_track_open_sessions(
        ops in proptest::collection::vec(direction_strategy(), 0..64)
    ) {
        let mut count = 0u64;
        let mut open_sessions = 0u64;
        let mut last_edge: Option<Edge> = None;

        for direction in ops {
            let transition = CountTransition::plan(count, direction);
            match direction {
                Direction::Open => open_sessions += 1,
                Direction::Close => open_sessions = open_sessions.saturating_sub(1),
            }

            if let Some(edge) = transition.edge {
                match edge {
                    Edge::Start => prop_assert_ne!(last_edge, Some(Edge::Start)),
                    Edge::Stop => prop_assert_eq!(last_edge, Some(Edge::Start)),
                }
                last_edge = Some(edge);
            }

            prop_assert_eq!(transition.next, open_sessions);
            count = transition.next;
        }

        // the supervisor is running exactly while sessions are counted
        prop_assert_eq!(last_edge == Some(Edge::Start), count > 0);
    }
}
