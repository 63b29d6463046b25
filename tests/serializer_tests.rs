use std::sync::{Arc, Mutex};
use std::time::Duration;

use courtsign::worker::UserSerializer;

#[tokio::test]
async fn test_admission_order_is_execution_order() {
    let serializer = UserSerializer::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    let turns: Vec<_> = (0..4).map(|_| serializer.admit("alice")).collect();
    assert_eq!(serializer.pending("alice"), 4);

    // Spawn in reverse so scheduling order disagrees with admission order.
    let mut handles = Vec::new();
    for (i, turn) in turns.into_iter().enumerate().rev() {
        let log = log.clone();
        handles.push(tokio::spawn(async move {
            let _guard = turn.ready().await;
            log.lock().unwrap().push(format!("start {}", i));
            tokio::time::sleep(Duration::from_millis(5)).await;
            log.lock().unwrap().push(format!("end {}", i));
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let expected: Vec<String> = (0..4)
        .flat_map(|i| [format!("start {}", i), format!("end {}", i)])
        .collect();
    assert_eq!(*log.lock().unwrap(), expected);
}

#[tokio::test]
async fn test_other_keys_are_not_blocked() {
    let serializer = UserSerializer::new();
    let _alice = serializer.admit("alice").ready().await;

    let bob = tokio::time::timeout(Duration::from_millis(100), serializer.admit("bob").ready())
        .await;
    assert!(bob.is_ok(), "bob should not wait for alice");

    let alice_again =
        tokio::time::timeout(Duration::from_millis(50), serializer.admit("alice").ready()).await;
    assert!(alice_again.is_err(), "second alice task must wait");
}

#[tokio::test]
async fn test_entries_are_dropped_when_idle() {
    let serializer = UserSerializer::new();

    let first = serializer.admit("alice");
    let second = serializer.admit("alice");
    assert_eq!(serializer.active_keys(), 1);
    assert_eq!(serializer.pending("alice"), 2);

    drop(first.ready().await);
    assert_eq!(serializer.pending("alice"), 1);
    drop(second.ready().await);

    assert_eq!(serializer.active_keys(), 0);
    assert_eq!(serializer.pending("alice"), 0);
}

#[tokio::test]
async fn test_panicking_task_releases_the_key() {
    let serializer = UserSerializer::new();

    let failing = {
        let serializer = serializer.clone();
        tokio::spawn(async move {
            serializer
                .run_exclusive("alice", async { panic!("render crashed") })
                .await
        })
    };
    assert!(failing.await.unwrap_err().is_panic());

    let value = tokio::time::timeout(
        Duration::from_millis(100),
        serializer.run_exclusive("alice", async { 7 }),
    )
    .await
    .expect("key should be free after a panic");
    assert_eq!(value, 7);
    assert_eq!(serializer.active_keys(), 0);
}

#[tokio::test]
async fn test_cancelled_waiter_keeps_the_line() {
    let serializer = UserSerializer::new();
    let running = serializer.admit("alice").ready().await;

    let waiting = serializer.admit("alice");
    let cancelled = tokio::spawn(async move {
        let _guard = waiting.ready().await;
    });
    let last = serializer.admit("alice");

    cancelled.abort();
    let _ = cancelled.await;

    let mut last_ready = Box::pin(last.ready());
    assert!(
        tokio::time::timeout(Duration::from_millis(50), &mut last_ready)
            .await
            .is_err(),
        "a cancelled waiter must not let later tasks overtake the running one"
    );

    drop(running);
    tokio::time::timeout(Duration::from_millis(100), last_ready)
        .await
        .expect("line should advance once the running task finishes");
}
