//! Integration tests for the pump loop driven from a dedicated owner thread.
//!
//! The owner thread here is spawned and found through the registry, the
//! way an application would wire it up.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::time::timeout;

use affinity_dispatch::{CancelToken, DispatchConfig, DispatchError, Dispatcher, DispatcherRegistry};

const TIMEOUT: Duration = Duration::from_secs(5);

fn fast_registry() -> Arc<DispatcherRegistry> {
    Arc::new(DispatcherRegistry::with_config(DispatchConfig {
        wait_timeout_ms: 10,
        ..DispatchConfig::default()
    }))
}

/// Spawn an owner thread that pumps its registry dispatcher until `token` fires.
fn spawn_owner(
    registry: &Arc<DispatcherRegistry>,
    token: &CancelToken,
) -> (Arc<Dispatcher>, JoinHandle<Result<(), DispatchError>>) {
    let registry_for_owner = registry.clone();
    let token = token.clone();
    let handle = thread::Builder::new()
        .name("owner".into())
        .spawn(move || registry_for_owner.current().run(token))
        .unwrap();
    let dispatcher = registry.dispatcher_for_thread(handle.thread());
    (dispatcher, handle)
}

#[test]
fn work_runs_on_the_owner_thread() {
    let registry = fast_registry();
    let token = CancelToken::new();
    let (dispatcher, owner) = spawn_owner(&registry, &token);

    let name = dispatcher
        .invoke_async(|| thread::current().name().map(str::to_owned))
        .wait();
    assert_eq!(name, Ok(Some("owner".to_string())));
    assert!(!dispatcher.check_access());

    token.cancel();
    owner.join().unwrap().unwrap();
    assert!(!dispatcher.is_running());
}

#[test]
fn per_producer_order_is_preserved() {
    let registry = fast_registry();
    let token = CancelToken::new();
    let (dispatcher, owner) = spawn_owner(&registry, &token);
    let log = Arc::new(Mutex::new(Vec::new()));

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let d = dispatcher.clone();
            let log = log.clone();
            thread::spawn(move || {
                let futures: Vec<_> = (0..25)
                    .map(|i| {
                        let log = log.clone();
                        d.invoke_async(move || log.lock().unwrap().push((p, i)))
                    })
                    .collect();
                for f in futures {
                    f.wait().unwrap();
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }

    token.cancel();
    owner.join().unwrap().unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 100);
    for p in 0..4 {
        let seen: Vec<_> = log.iter().filter(|(q, _)| *q == p).map(|(_, i)| *i).collect();
        assert_eq!(seen, (0..25).collect::<Vec<_>>(), "producer {p} out of order");
    }
    assert_eq!(dispatcher.metrics().items_executed, 100);
}

#[test]
fn pump_survives_failures_and_keeps_serving() {
    let registry = fast_registry();
    let token = CancelToken::new();
    let (dispatcher, owner) = spawn_owner(&registry, &token);

    let failed = dispatcher.invoke_async(|| -> u8 { panic!("bad item") });
    assert!(matches!(failed.wait(), Err(DispatchError::ItemFailure(_))));

    let ok = dispatcher.invoke_async(|| 1 + 1);
    assert_eq!(ok.wait(), Ok(2));
    assert!(dispatcher.is_running());

    token.cancel();
    owner.join().unwrap().unwrap();
}

#[test]
fn dispose_returns_once_cancelled_run_exits() {
    let registry = fast_registry();
    let token = CancelToken::new();
    let (dispatcher, owner) = spawn_owner(&registry, &token);

    // Make sure the run is live before cancelling.
    dispatcher.invoke_async(|| ()).wait().unwrap();
    token.cancel();
    dispatcher.dispose();

    assert!(!dispatcher.is_running());
    assert!(dispatcher.is_disposed());
    owner.join().unwrap().unwrap();
}

#[tokio::test]
async fn futures_can_be_awaited_from_async_code() {
    let registry = fast_registry();
    let token = CancelToken::new();
    let (dispatcher, owner) = spawn_owner(&registry, &token);

    let value = timeout(TIMEOUT, dispatcher.invoke_async(|| "from owner"))
        .await
        .expect("owner should settle within timeout");
    assert_eq!(value, Ok("from owner"));

    let failure = timeout(TIMEOUT, dispatcher.invoke_fallible(|| Err::<(), _>("nope")))
        .await
        .expect("owner should settle within timeout");
    assert_eq!(failure, Err(DispatchError::ItemFailure("nope".into())));

    token.cancel();
    tokio::task::spawn_blocking(move || owner.join().unwrap())
        .await
        .unwrap()
        .unwrap();
}
