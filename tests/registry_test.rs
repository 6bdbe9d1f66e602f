//! Session registry behavior: idempotent removal, the nickname index and
//! snapshot iteration.

mod common;

use common::duplex_session;
use db_gateway::server::SessionRegistry;

#[tokio::test]
async fn add_remove_and_double_remove() {
    let registry = SessionRegistry::new();
    let (session, _reader) = duplex_session(1);

    registry.add(session);
    assert_eq!(registry.count(), 1);

    assert!(registry.remove(1).is_some());
    assert_eq!(registry.count(), 0);

    // A second removal racing an explicit close must be a benign no-op.
    assert!(registry.remove(1).is_none());
}

#[tokio::test]
async fn nickname_resolves_only_while_registered() {
    let registry = SessionRegistry::new();
    let (session, _reader) = duplex_session(7);
    session.begin_login_wait();
    registry.add(session.clone());

    registry.bind_nickname("kim", 7).unwrap();
    session.authenticate("kim").unwrap();

    let found = registry.find_by_nickname("kim").expect("nickname should resolve");
    assert_eq!(found.id(), 7);

    registry.remove(7);
    assert!(registry.find_by_nickname("kim").is_none());
}

#[tokio::test]
async fn nickname_collision_is_rejected() {
    let registry = SessionRegistry::new();
    let (first, _r1) = duplex_session(1);
    let (second, _r2) = duplex_session(2);
    first.begin_login_wait();
    second.begin_login_wait();
    registry.add(first.clone());
    registry.add(second.clone());

    registry.bind_nickname("kim", 1).unwrap();
    first.authenticate("kim").unwrap();

    let err = registry.bind_nickname("kim", 2);
    assert!(err.is_err());

    // The loser keeps its unauthenticated state and the winner still
    // resolves.
    assert_eq!(registry.find_by_nickname("kim").unwrap().id(), 1);
}

#[tokio::test]
async fn stale_nickname_claim_is_replaced() {
    let registry = SessionRegistry::new();
    let (dead, _r1) = duplex_session(1);
    let (live, _r2) = duplex_session(2);
    dead.begin_login_wait();
    live.begin_login_wait();
    registry.add(dead.clone());
    registry.add(live.clone());

    registry.bind_nickname("kim", 1).unwrap();
    dead.close_session();

    // The previous owner is closed, so the claim is free again.
    registry.bind_nickname("kim", 2).unwrap();
    live.authenticate("kim").unwrap();
    assert_eq!(registry.find_by_nickname("kim").unwrap().id(), 2);
}

#[tokio::test]
async fn nickname_requires_authenticated_owner() {
    let registry = SessionRegistry::new();
    let (session, _reader) = duplex_session(3);
    session.begin_login_wait();
    registry.add(session);

    // Bound but never authenticated: the index entry must not resolve.
    registry.bind_nickname("ghost", 3).unwrap();
    assert!(registry.find_by_nickname("ghost").is_none());
}

#[tokio::test]
async fn for_each_tolerates_reentrant_removal() {
    let registry = SessionRegistry::new();
    let mut readers = Vec::new();
    for id in 0..3 {
        let (session, reader) = duplex_session(id);
        registry.add(session);
        readers.push(reader);
    }

    // The callback reenters the registry; the snapshot keeps the traversal
    // intact and nothing deadlocks.
    let mut visited = 0;
    registry.for_each(|session| {
        registry.remove(session.id());
        visited += 1;
    });

    assert_eq!(visited, 3);
    assert_eq!(registry.count(), 0);
}
