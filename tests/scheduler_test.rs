mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use twin_gateway::{Gateway, GatewayConfig, GatewayError, GatewayResult, Value, ValueType};

#[tokio::test]
async fn test_concurrent_increments_are_serializable() -> GatewayResult<()> {
    let gateway = Arc::new(Gateway::new(GatewayConfig::default())?);

    let mut callers = Vec::new();
    for _ in 0..8 {
        let gateway = gateway.clone();
        callers.push(tokio::spawn(async move {
            let mut promises = Vec::new();
            for _ in 0..25 {
                promises.push(gateway.submit(|twin, _| async move {
                    let counter = twin.get_or_create_resource(
                        "counter",
                        "c1",
                        "state",
                        "count",
                        ValueType::Integer,
                    )?;
                    let current = counter
                        .get_value(twin_gateway::ConsistencyLevel::Weak)
                        .await?
                        .value()
                        .and_then(Value::as_integer)
                        .unwrap_or(0);
                    // yield mid-command; nothing else may run on the twin meanwhile
                    tokio::task::yield_now().await;
                    counter.set_value(current + 1, None).await?;
                    Ok(())
                }));
            }
            for promise in promises {
                promise?.await?;
            }
            Ok::<_, GatewayError>(())
        }));
    }
    for caller in callers {
        caller.await.unwrap()?;
    }

    let total = gateway
        .submit(|twin, _| async move {
            let counter = twin
                .get_resource("c1", "state", "count")?
                .ok_or_else(|| GatewayError::ResourceNotFound("c1/state/count".into()))?;
            Ok(counter.value().await?.into_value())
        })?
        .await?;
    assert_eq!(total, Some(Value::Integer(200)));
    gateway.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_commands_run_in_submission_order() -> GatewayResult<()> {
    let gateway = Gateway::new(GatewayConfig::default())?;
    let order = Arc::new(Mutex::new(Vec::new()));

    let promises = (0..50)
        .map(|i| {
            let order = order.clone();
            gateway.submit(move |_, _| async move {
                order.lock().unwrap().push(i);
                Ok(i)
            })
        })
        .collect::<GatewayResult<Vec<_>>>()?;
    for promise in promises {
        promise.await?;
    }

    assert_eq!(*order.lock().unwrap(), (0..50).collect::<Vec<_>>());
    gateway.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_full_queue_rejects_immediately() -> GatewayResult<()> {
    let config = GatewayConfig {
        queue_capacity: 2,
        ..GatewayConfig::default()
    };
    let gateway = Gateway::new(config)?;
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();

    let blocker = gateway.submit(move |_, _| async move {
        let _ = started_tx.send(());
        let _ = release_rx.await;
        Ok(())
    })?;
    started_rx.await.unwrap();

    let queued_a = gateway.submit(|_, _| async { Ok(1) })?;
    let queued_b = gateway.submit(|_, _| async { Ok(2) })?;
    let rejected = gateway.submit(|_, _| async { Ok(3) });
    assert!(matches!(
        rejected,
        Err(GatewayError::QueueSaturation { capacity: 2 })
    ));

    release_tx.send(()).unwrap();
    blocker.await?;
    assert_eq!(queued_a.await?, 1);
    assert_eq!(queued_b.await?, 2);
    assert_eq!(gateway.metrics().rejected, 1);
    gateway.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_submit_after_shutdown_fails_fast() -> GatewayResult<()> {
    let gateway = Gateway::new(GatewayConfig::default())?;
    gateway.shutdown().await;

    let attempt = tokio::time::timeout(Duration::from_secs(1), async {
        gateway.submit(|_, _| async { Ok(()) })
    })
    .await
    .expect("submit must not hang");
    assert!(matches!(attempt, Err(GatewayError::ShutDown)));
    assert!(matches!(
        gateway.schedule(Duration::from_millis(1), |_, _| async { Ok(()) }),
        Err(GatewayError::ShutDown)
    ));
    Ok(())
}

#[tokio::test]
async fn test_shutdown_interrupts_running_and_cancels_queued() -> GatewayResult<()> {
    let config = GatewayConfig {
        join_timeout: Duration::from_millis(500),
        shutdown_grace: Duration::from_millis(100),
        ..GatewayConfig::default()
    };
    let gateway = Gateway::new(config)?;
    let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();

    let running = gateway.submit(move |_, _| async move {
        let _ = started_tx.send(());
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    })?;
    started_rx.await.unwrap();
    let queued = gateway.submit(|_, _| async { Ok(()) })?;

    gateway.shutdown().await;
    assert!(matches!(running.await, Err(GatewayError::ShutDown)));
    assert!(matches!(queued.await, Err(GatewayError::ShutDown)));
    Ok(())
}

#[tokio::test]
async fn test_worker_survives_failures_and_panics() -> GatewayResult<()> {
    let gateway = Gateway::new(GatewayConfig::default())?;

    let failed = gateway
        .submit(|_, _| async { Err::<(), _>(GatewayError::command("bad input")) })?
        .await;
    assert!(matches!(failed, Err(GatewayError::CommandFailed(m)) if m == "bad input"));

    let panicked = gateway
        .submit(|_, _| async {
            if true {
                panic!("device exploded");
            }
            Ok(())
        })?
        .await;
    assert!(matches!(panicked, Err(GatewayError::CommandPanicked(m)) if m.contains("exploded")));

    assert_eq!(gateway.submit(|_, _| async { Ok("alive") })?.await?, "alive");
    gateway.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_command_timeout_frees_worker() -> GatewayResult<()> {
    let config = GatewayConfig {
        command_timeout: Duration::from_millis(50),
        ..GatewayConfig::default()
    };
    let gateway = Gateway::new(config)?;

    let slow = gateway
        .submit(|_, _| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })?
        .await;
    assert!(matches!(slow, Err(GatewayError::CommandTimeout { .. })));
    assert_eq!(gateway.submit(|_, _| async { Ok(5) })?.await?, 5);
    gateway.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_continuations_run_in_completion_order() -> GatewayResult<()> {
    let gateway = Gateway::new(GatewayConfig::default())?;
    let seen = Arc::new(Mutex::new(Vec::new()));

    let chained = (0..20)
        .map(|i| {
            let seen = seen.clone();
            gateway
                .submit(move |_, _| async move { Ok(i) })
                .map(|promise| {
                    promise.then(move |result| {
                        seen.lock().unwrap().push(result?);
                        Ok(())
                    })
                })
        })
        .collect::<GatewayResult<Vec<_>>>()?;
    for promise in chained {
        promise.await?;
    }

    assert_eq!(*seen.lock().unwrap(), (0..20).collect::<Vec<_>>());
    gateway.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_scheduled_command_runs_after_delay() -> GatewayResult<()> {
    let gateway = Gateway::new(GatewayConfig::default())?;
    let started = std::time::Instant::now();
    let value = gateway
        .schedule(Duration::from_millis(50), |_, _| async { Ok("later") })?
        .await?;
    assert_eq!(value, "later");
    assert!(started.elapsed() >= Duration::from_millis(50));

    let pending = gateway.schedule(Duration::from_secs(60), |_, _| async { Ok(()) })?;
    gateway.shutdown().await;
    assert!(matches!(pending.await, Err(GatewayError::ShutDown)));
    Ok(())
}
