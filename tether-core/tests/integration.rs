//! Integration Tests for Tether Core
//!
//! These tests drive the public API the way an application would, combining
//! the runtime with bridges, deep observation, memoized functions, ordered
//! async actions and grouped collections.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::oneshot;

use tether_core::action::{open_steps, task, when, ActionAsync};
use tether_core::bridge::{PromiseBridge, PromiseStatus};
use tether_core::collection::GroupedObservableMap;
use tether_core::memoize::ComputedFn;
use tether_core::observe::{deep_observe, Node};
use tether_core::reactive::{ChangeKind, Effect, ObservableVec, Runtime, Signal};
use tether_core::Error;

/// A bridge is observed going from pending to fulfilled, exactly once each.
#[tokio::test]
async fn promise_status_sequence_is_observed() {
    let (tx, rx) = oneshot::channel::<u32>();
    let bridge = Arc::new(PromiseBridge::<u32, String>::new(async move {
        rx.await.map_err(|_| "dropped".to_string())
    }));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let (b, s) = (bridge.clone(), seen.clone());
    let effect = Effect::new(move || s.lock().push((b.status(), b.value())));

    tx.send(42).unwrap();
    assert_eq!(bridge.settled().await, Ok(42));
    tokio::task::yield_now().await;

    assert_eq!(
        *seen.lock(),
        vec![
            (PromiseStatus::Pending, None),
            (PromiseStatus::Fulfilled, Some(42)),
        ]
    );
    effect.dispose();
}

/// A new bridge seeded from a fulfilled one shows the old value while pending.
#[tokio::test]
async fn seeded_bridge_keeps_previous_value_while_pending() {
    let first = PromiseBridge::<&'static str, String>::new(async { Ok("v1") });
    first.settled().await.unwrap();

    let (tx, rx) = oneshot::channel();
    let second = PromiseBridge::with_seed(
        async move { rx.await.map_err(|_| "dropped".to_string()) },
        &first,
    );
    assert_eq!(second.status(), PromiseStatus::Pending);
    assert_eq!(second.value(), Some("v1"));

    tx.send("v2").unwrap();
    assert_eq!(second.settled().await, Ok("v2"));
    assert_eq!(second.value(), Some("v2"));
}

/// A rejected bridge exposes its reason and no value.
#[tokio::test]
async fn rejected_bridge_exposes_reason() {
    let bridge = PromiseBridge::<u32, String>::from_resolver(|resolver| {
        resolver.reject("boom".to_string());
    });

    assert_eq!(bridge.settled().await, Err("boom".to_string()));
    assert_eq!(bridge.status(), PromiseStatus::Rejected);
    assert_eq!(bridge.reason().as_deref(), Some("boom"));
    assert_eq!(bridge.value(), None);
}

/// Splicing an observed array re-indexes the paths of trailing elements.
#[test]
fn deep_observer_reindexes_paths_after_splice() {
    let root = Node::from_json(json!({
        "todos": [{ "title": "a" }, { "title": "b" }, { "title": "c" }]
    }));
    let log = Arc::new(Mutex::new(Vec::new()));
    let l = log.clone();
    let observer = deep_observe(&root, move |change, path, _root| {
        l.lock().push((change.kind(), path.to_string()));
    })
    .unwrap();

    let Node::Object(top) = &root else { panic!("root is an object") };
    let Some(Node::Array(todos)) = top.get("todos") else { panic!("todos is an array") };
    let last = todos.get(2).unwrap();

    todos.splice(0, 1, Vec::new());
    assert_eq!(observer.path_of(&last).as_deref(), Some("todos/1"));

    let Node::Object(last_todo) = &last else { panic!("todo is an object") };
    last_todo.set("title", json!("C").into());

    assert_eq!(
        *log.lock(),
        vec![
            (ChangeKind::Splice, "todos".to_string()),
            (ChangeKind::Update, "todos/1".to_string()),
        ]
    );
    assert_eq!(
        root.to_json(),
        json!({ "todos": [{ "title": "b" }, { "title": "C" }] })
    );
}

/// Observing a tree that holds one container twice fails and names both paths.
#[test]
fn deep_observer_rejects_aliased_containers() {
    let shared = Node::from_json(json!({ "v": 1 }));
    let root = Node::from_json(json!({ "left": {}, "right": {} }));
    let Node::Object(top) = &root else { panic!("root is an object") };
    let Some(Node::Object(left)) = top.get("left") else { panic!("left is an object") };
    let Some(Node::Object(right)) = top.get("right") else { panic!("right is an object") };
    left.set("x", shared.clone());
    right.set("y", shared);

    match deep_observe(&root, |_, _, _| {}) {
        Err(Error::TreeAliasing { attempted, existing }) => {
            assert_eq!(attempted, "right/y");
            assert_eq!(existing, "left/x");
        }
        other => panic!("expected an aliasing error, got {other:?}"),
    }
}

/// Inside one reactive context, equal arguments share a single computation.
#[test]
fn memoized_function_shares_derivation_within_a_reaction() {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let double = ComputedFn::new("double", move |(n,): &(i64,)| {
        c.fetch_add(1, Ordering::SeqCst);
        n * 2
    });

    let results = Arc::new(Mutex::new(Vec::new()));
    let (d, r) = (double.clone(), results.clone());
    let effect = Effect::new(move || {
        let first = d.call((21,)).unwrap();
        let second = d.call((21,)).unwrap();
        r.lock().push(first + second);
    });

    assert_eq!(*results.lock(), vec![84]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(double.len(), 1);

    effect.dispose();
    assert!(double.is_empty());
}

/// Once its observer goes away an entry is evicted and recomputed on demand.
#[test]
fn memoized_function_evicts_and_recomputes() {
    let base = Signal::new(10);
    let calls = Arc::new(AtomicUsize::new(0));
    let (b, c) = (base.clone(), calls.clone());
    let offset = ComputedFn::new("offset", move |(n,): &(i64,)| {
        c.fetch_add(1, Ordering::SeqCst);
        b.get() + n
    });

    let f = offset.clone();
    let first = Effect::new(move || {
        f.call((1,)).unwrap();
    });
    base.set(20);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    first.dispose();
    assert!(offset.is_empty());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let (f, s) = (offset.clone(), seen.clone());
    let second = Effect::new(move || s.lock().push(f.call((1,)).unwrap()));
    assert_eq!(*seen.lock(), vec![21]);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    second.dispose();
}

/// Every item sits in exactly one bucket, whatever order keys change in.
#[test]
fn group_map_keeps_each_item_in_one_bucket() {
    let items: Vec<Arc<Signal<&'static str>>> = ["todo", "done", "todo", "doing"]
        .into_iter()
        .map(|state| Arc::new(Signal::new(state)))
        .collect();
    let base = ObservableVec::new(items.clone());
    let groups = GroupedObservableMap::new(&base, |item: &Arc<Signal<&'static str>>| item.get());

    let total = |groups: &GroupedObservableMap<&'static str, Arc<Signal<&'static str>>>| {
        groups
            .entries()
            .iter()
            .map(|(_, bucket)| bucket.len())
            .sum::<usize>()
    };
    assert_eq!(total(&groups), 4);

    Runtime::transaction(|| {
        items[0].set("done");
        items[3].set("done");
    });
    assert_eq!(groups.get(&"done").map(|bucket| bucket.len()), Some(3));
    assert!(!groups.contains_key(&"doing"));
    assert_eq!(total(&groups), 4);

    base.splice(1, 2, Vec::new());
    assert_eq!(total(&groups), 2);
    assert_eq!(groups.item_count(), 2);

    items[0].set("todo");
    let mut keys = groups.keys();
    keys.sort_unstable();
    assert_eq!(keys, vec!["done", "todo"]);
    assert!(matches!(groups.clear(), Err(Error::ReadOnly(_))));
}

/// Continuations of ordered actions resume in the order their tasks started.
#[tokio::test]
async fn ordered_actions_resume_in_issuance_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let total = Signal::new(0);
    let (l, t) = (log.clone(), total.clone());
    let add = ActionAsync::new("add", move |(label, rx): (&'static str, oneshot::Receiver<i32>)| {
        let (log, total) = (l.clone(), t.clone());
        async move {
            let amount = task(async move { rx.await.map_err(|_| Error::disposed(label)) }).await?;
            total.update(|sum| sum + amount);
            log.lock().push(label);
            Ok::<_, Error>(())
        }
    });

    let (tx_a, rx_a) = oneshot::channel();
    let (tx_b, rx_b) = oneshot::channel();
    let a = tokio::spawn(add.call(("a", rx_a)));
    tokio::task::yield_now().await;
    let b = tokio::spawn(add.call(("b", rx_b)));
    tokio::task::yield_now().await;

    tx_b.send(2).unwrap();
    tokio::task::yield_now().await;
    tx_a.send(1).unwrap();

    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();
    assert_eq!(*log.lock(), vec!["a", "b"]);
    assert_eq!(total.get_untracked(), 3);
    assert_eq!(open_steps(), 0);
}

/// An action can await another action's run through `task`.
#[tokio::test]
async fn action_awaits_nested_action() {
    let total = Signal::new(0);
    let t = total.clone();
    let add = ActionAsync::new("add", move |amount: i32| {
        let total = t.clone();
        async move {
            let amount = task(async move { Ok::<_, Error>(amount) }).await?;
            total.update(|sum| sum + amount);
            Ok::<_, Error>(total.get_untracked())
        }
    });
    let add_twice = ActionAsync::new("add_twice", move |amount: i32| {
        let add = add.clone();
        async move {
            task(add.call(amount)).await?;
            task(add.call(amount)).await
        }
    });

    let result = tokio::time::timeout(std::time::Duration::from_secs(2), add_twice.call(4))
        .await
        .expect("nested actions finish");
    assert_eq!(result, Ok(8));
    assert_eq!(total.get_untracked(), 8);
    assert_eq!(open_steps(), 0);
}

/// A pending bridge can gate an async action through `when`.
#[tokio::test]
async fn when_waits_for_bridge_to_settle() {
    let (tx, rx) = oneshot::channel::<u32>();
    let bridge = Arc::new(PromiseBridge::<u32, String>::new(async move {
        rx.await.map_err(|_| "dropped".to_string())
    }));

    let b = bridge.clone();
    let waiter = tokio::spawn(async move { when(move || b.status() != PromiseStatus::Pending).await });
    tokio::task::yield_now().await;
    assert!(!waiter.is_finished());

    tx.send(5).unwrap();
    waiter.await.unwrap().unwrap();
    assert_eq!(bridge.value(), Some(5));
}
