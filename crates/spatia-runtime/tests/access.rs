mod common;

use std::sync::Arc;

use spatia_core::access::AccessLevel;
use spatia_core::anchor::{Payload, WalkerStatus};
use spatia_core::id::RefId;
use spatia_core::value::Value;
use spatia_memory::{MemoryStore, RootRegistry};
use spatia_runtime::{AbilityTable, ContextRequest, EdgeFilter, EdgeSpec, TypeTag};

use common::open;

struct World {
    store: Arc<MemoryStore>,
    alice: RefId,
    bob: RefId,
    vault: RefId,
    room: RefId,
}

/// Alice owns root → vault → room; everything defaults to NO_ACCESS.
fn world() -> World {
    let store = Arc::new(MemoryStore::new());
    let registry = RootRegistry::new(store.clone());
    let alice = registry.register("alice").unwrap();
    let bob = registry.register("bob").unwrap();

    let mut ctx = open(store.clone(), ContextRequest::for_principal("alice"));
    let vault = ctx.spawn_node(Payload::new("Vault")).unwrap();
    let room = ctx.spawn_node(Payload::new("Room")).unwrap();
    ctx.connect(alice, vault, EdgeSpec::new("Owns")).unwrap().unwrap();
    ctx.connect(vault, room, EdgeSpec::new("Door")).unwrap().unwrap();
    ctx.close().unwrap();

    World {
        store,
        alice,
        bob,
        vault,
        room,
    }
}

#[test]
fn test_no_access_node_shows_no_edges() {
    let w = world();
    let mut ctx = open(
        w.store.clone(),
        ContextRequest::for_principal("bob").at(w.vault.to_string()),
    );
    assert_eq!(ctx.principal(), w.bob);
    assert_eq!(ctx.access_level(&w.vault).unwrap(), AccessLevel::NoAccess);
    assert!(ctx.edges(w.vault, &EdgeFilter::any()).unwrap().is_empty());

    let mut table = AbilityTable::new();
    table.on_entry(TypeTag::Any, |step| {
        step.visit_edges(&EdgeFilter::any())?;
        Ok(())
    });
    let outcome = ctx.run_walker(Payload::new("Snoop"), &table).unwrap();
    assert_eq!(outcome.status, WalkerStatus::Complete);
    assert_eq!(outcome.visited, vec![w.vault]);

    // The edges are still there for their owner.
    let mut owner = open(w.store.clone(), ContextRequest::for_principal("alice"));
    assert_eq!(owner.edges(w.vault, &EdgeFilter::any()).unwrap().len(), 2);
    assert_eq!(w.alice, owner.root_id());
}

#[test]
fn test_visibility_needs_origin_edge_and_endpoint() {
    let w = world();

    let door = {
        let mut alice = open(w.store.clone(), ContextRequest::for_principal("alice"));
        assert!(alice.grant(w.vault, w.bob, AccessLevel::Read).unwrap());
        let door = alice.edges(w.vault, &EdgeFilter::outgoing()).unwrap()[0];
        alice.close().unwrap();
        door
    };

    let mut bob = open(w.store.clone(), ContextRequest::for_principal("bob"));
    assert!(bob.edges(w.vault, &EdgeFilter::outgoing()).unwrap().is_empty());
    bob.abort();

    {
        let mut alice = open(w.store.clone(), ContextRequest::for_principal("alice"));
        alice.grant(door, w.bob, AccessLevel::Read).unwrap();
        alice.close().unwrap();
    }
    let mut bob = open(w.store.clone(), ContextRequest::for_principal("bob"));
    assert!(bob.edges(w.vault, &EdgeFilter::outgoing()).unwrap().is_empty());
    bob.abort();

    {
        let mut alice = open(w.store.clone(), ContextRequest::for_principal("alice"));
        alice.set_default_access(w.room, AccessLevel::Read).unwrap();
        alice.close().unwrap();
    }
    let mut bob = open(w.store.clone(), ContextRequest::for_principal("bob"));
    assert_eq!(bob.edges(w.vault, &EdgeFilter::outgoing()).unwrap(), vec![door]);
    assert_eq!(bob.neighbors(w.vault, &EdgeFilter::outgoing()).unwrap(), vec![w.room]);
}

#[test]
fn test_denied_mutations_are_reported() {
    let w = world();
    let mut bob = open(w.store.clone(), ContextRequest::for_principal("bob"));
    let mine = bob.spawn_node(Payload::new("Shed")).unwrap();

    assert_eq!(bob.connect(w.vault, mine, EdgeSpec::default()).unwrap(), None);
    assert!(!bob.grant(w.vault, w.bob, AccessLevel::Admin).unwrap());
    assert!(!bob.set_field(&w.room, "owner", "bob").unwrap());
    assert!(!bob.destroy(w.room).unwrap());
    assert_eq!(bob.disconnect(w.vault, w.room).unwrap(), 0);

    // Connecting out of a node bob owns needs nothing from the target.
    assert!(bob.connect(mine, w.vault, EdgeSpec::default()).unwrap().is_some());

    assert_eq!(bob.status(), 200);
    let denied: Vec<&Value> = bob
        .reports()
        .iter()
        .filter(|r| matches!(r, Value::Record(rec) if rec.type_name == "AccessDenied"))
        .collect();
    assert_eq!(denied.len(), 5);
}

#[test]
fn test_write_grant_enables_mutation() {
    let w = world();
    {
        let mut alice = open(w.store.clone(), ContextRequest::for_principal("alice"));
        alice.grant(w.room, w.bob, AccessLevel::Write).unwrap();
        alice.close().unwrap();
    }

    let mut bob = open(w.store.clone(), ContextRequest::for_principal("bob"));
    assert_eq!(bob.access_level(&w.room).unwrap(), AccessLevel::Write);
    assert!(bob.set_field(&w.room, "painted", true).unwrap());
    assert!(!bob.set_default_access(w.room, AccessLevel::Read).unwrap());
    bob.close().unwrap();

    let mut alice = open(w.store.clone(), ContextRequest::for_principal("alice"));
    let room = alice.payload(&w.room).unwrap().unwrap();
    assert_eq!(room.get("painted"), Some(&serde_json::Value::Bool(true)));

    assert!(alice.revoke(w.room, w.bob).unwrap());
    assert!(!alice.revoke(w.room, w.bob).unwrap());
}
