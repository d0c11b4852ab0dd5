mod common;

use std::collections::BTreeMap;
use std::time::Duration;

use common::{drain, manual_gateway, topics};
use pretty_assertions::assert_eq;
use twin_gateway::event::{
    LifecycleNotification, LifecycleStatus, Notification, NotificationAccumulator, TopicFilter,
};
use twin_gateway::whiteboard::action_fn;
use twin_gateway::{
    Clock, GatewayError, GatewayResult, ResourceKind, Value, ValueType,
};

#[tokio::test]
async fn test_committed_command_publishes_in_order() -> GatewayResult<()> {
    let (gateway, _clock) = manual_gateway()?;
    let mut rx = gateway.subscribe(TopicFilter::all());

    gateway
        .submit(|twin, _| async move {
            let temperature = twin.get_or_create_resource(
                "sensors",
                "s1",
                "env",
                "temperature",
                ValueType::Float,
            )?;
            temperature.set_value(21.5, None).await?;
            Ok(())
        })?
        .await?;

    assert_eq!(
        topics(&drain(&mut rx)),
        vec![
            "LIFECYCLE/sensors/s1",
            "LIFECYCLE/sensors/s1/env",
            "LIFECYCLE/sensors/s1/env/temperature",
            "DATA/sensors/s1/env/temperature",
        ]
    );
    gateway.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_failed_command_publishes_nothing() -> GatewayResult<()> {
    let (gateway, _clock) = manual_gateway()?;
    let mut rx = gateway.subscribe(TopicFilter::all());

    let result = gateway
        .submit(|twin, _| async move {
            let resource = twin.get_or_create_resource(
                "sensors",
                "s1",
                "env",
                "humidity",
                ValueType::Integer,
            )?;
            resource.set_value(40, None).await?;
            Err::<(), _>(GatewayError::command("validation failed after mutation"))
        })?
        .await;
    assert!(result.is_err());
    assert!(drain(&mut rx).is_empty());

    // the mutation itself is not rolled back, only its notifications
    let exists = gateway
        .submit(|twin, _| async move { Ok(twin.get_resource("s1", "env", "humidity")?.is_some()) })?
        .await?;
    assert!(exists);
    gateway.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_publish_order_follows_command_order() -> GatewayResult<()> {
    let (gateway, _clock) = manual_gateway()?;
    let mut rx = gateway.subscribe_pattern("DATA/*")?;

    let promises = (0..5)
        .map(|i| {
            gateway.submit(move |twin, _| async move {
                let resource = twin.get_or_create_resource(
                    "lamps",
                    &format!("lamp-{}", i),
                    "state",
                    "on",
                    ValueType::Boolean,
                )?;
                resource.set_value(true, None).await?;
                Ok(())
            })
        })
        .collect::<GatewayResult<Vec<_>>>()?;
    for promise in promises {
        promise.await?;
    }

    let providers: Vec<String> = drain(&mut rx)
        .iter()
        .map(|n| n.provider().to_string())
        .collect();
    assert_eq!(
        providers,
        (0..5).map(|i| format!("lamp-{}", i)).collect::<Vec<_>>()
    );
    gateway.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_delete_provider_emits_lifecycle_event() -> GatewayResult<()> {
    let (gateway, _clock) = manual_gateway()?;
    gateway
        .submit(|twin, _| async move {
            twin.get_or_create_resource("lamps", "l1", "state", "on", ValueType::Boolean)?;
            Ok(())
        })?
        .await?;

    let mut rx = gateway.subscribe_pattern("LIFECYCLE/*")?;
    gateway
        .submit(|twin, _| async move { twin.delete_provider("l1") })?
        .await?;

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    match &events[0] {
        Notification::Lifecycle(event) => {
            assert_eq!(event.status, LifecycleStatus::ProviderDeleted);
            assert_eq!(event.provider, "l1");
        }
        other => panic!("unexpected notification {:?}", other),
    }

    let missing = gateway
        .submit(|twin, _| async move { twin.delete_provider("l1") })?
        .await;
    assert!(matches!(missing, Err(GatewayError::ProviderNotFound(_))));
    gateway.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_metadata_and_action_notifications() -> GatewayResult<()> {
    let (gateway, _clock) = manual_gateway()?;
    gateway.register_action(
        "lamps",
        "state",
        "toggle",
        action_fn(|request| async move {
            let level = request.arguments.get("level").cloned().unwrap_or(Value::Null);
            Ok(level)
        }),
    );
    gateway
        .submit(|twin, models| async move {
            models
                .resource_builder("lamps", "state", "toggle")?
                .kind(ResourceKind::Action)
                .argument("level", ValueType::Integer)
                .build()?;
            twin.get_or_create_resource("lamps", "l1", "state", "toggle", ValueType::Any)?;
            twin.get_or_create_resource("lamps", "l1", "state", "on", ValueType::Boolean)?;
            Ok(())
        })?
        .await?;

    let mut rx = gateway.subscribe(TopicFilter::parse("METADATA/*")?);
    let mut actions = gateway.subscribe_pattern("ACTION/lamps/*")?;
    let result = gateway
        .submit(|twin, _| async move {
            let on = twin
                .get_resource("l1", "state", "on")?
                .ok_or_else(|| GatewayError::ResourceNotFound("on".into()))?;
            on.set_metadata_value("unit", "bool", None)?;

            let toggle = twin
                .get_resource("l1", "state", "toggle")?
                .ok_or_else(|| GatewayError::ResourceNotFound("toggle".into()))?;
            assert!(matches!(
                toggle.value().await,
                Err(GatewayError::ActionResource(_))
            ));
            let mut arguments = BTreeMap::new();
            arguments.insert("level".to_string(), Value::Integer(3));
            toggle.act(arguments).await
        })?
        .await?;
    assert_eq!(result, Value::Integer(3));

    assert_eq!(topics(&drain(&mut rx)), vec!["METADATA/lamps/l1/state/on"]);
    assert_eq!(topics(&drain(&mut actions)), vec!["ACTION/lamps/l1/state/toggle"]);
    gateway.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_action_and_metadata_errors() -> GatewayResult<()> {
    let (gateway, _clock) = manual_gateway()?;
    let mut rx = gateway.subscribe(TopicFilter::all());
    gateway
        .submit(|twin, models| async move {
            models
                .resource_builder("lamps", "state", "reset")?
                .kind(ResourceKind::Action)
                .build()?;
            let reset =
                twin.get_or_create_resource("lamps", "l1", "state", "reset", ValueType::Any)?;
            let on = twin.get_or_create_resource("lamps", "l1", "state", "on", ValueType::Boolean)?;

            assert!(matches!(
                reset.set_value(true, None).await,
                Err(GatewayError::ActionResource(_))
            ));
            assert!(matches!(
                reset.act(BTreeMap::new()).await,
                Err(GatewayError::NoHandler { kind: "action", .. })
            ));
            assert!(matches!(
                on.act(BTreeMap::new()).await,
                Err(GatewayError::NotAnAction(_))
            ));
            assert!(matches!(
                on.get_metadata_value("unit"),
                Err(GatewayError::MetadataNotFound { .. })
            ));
            Ok(())
        })?
        .await?;

    let published = drain(&mut rx);
    assert!(published
        .iter()
        .all(|n| matches!(n, Notification::Lifecycle(_))));
    gateway.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_declared_arguments_are_checked() -> GatewayResult<()> {
    let (gateway, _clock) = manual_gateway()?;
    gateway.register_action(
        "lamps",
        "state",
        "dim",
        action_fn(|request| async move {
            Ok(request.arguments.get("level").cloned().unwrap_or(Value::Null))
        }),
    );

    let (declared, dimmed, rejected) = gateway
        .submit(|twin, models| async move {
            models
                .resource_builder("lamps", "state", "dim")?
                .kind(ResourceKind::Action)
                .argument("level", ValueType::Float)
                .build()?;
            let dim = twin.get_or_create_resource("lamps", "l1", "state", "dim", ValueType::Any)?;

            let mut arguments = BTreeMap::new();
            arguments.insert("level".to_string(), Value::Integer(2));
            let dimmed = dim.act(arguments).await?;

            let mut arguments = BTreeMap::new();
            arguments.insert("level".to_string(), Value::from("not-a-level"));
            let rejected = dim.act(arguments).await;
            Ok((dim.arguments()?, dimmed, rejected))
        })?
        .await?;

    assert_eq!(declared, vec![("level".to_string(), ValueType::Float)]);
    assert_eq!(dimmed, Value::Float(2.0));
    assert!(matches!(
        rejected,
        Err(GatewayError::TypeMismatch {
            expected: ValueType::Float,
            got: ValueType::String,
            ..
        })
    ));
    gateway.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_notifier_outside_commands_publishes_immediately() -> GatewayResult<()> {
    let (gateway, clock) = manual_gateway()?;
    let mut rx = gateway.subscribe(TopicFilter::all());

    gateway.notifier().record_lifecycle(LifecycleNotification {
        status: LifecycleStatus::ProviderCreated,
        model: "external".into(),
        provider: "e1".into(),
        service: None,
        resource: None,
        timestamp: clock.now(),
    })?;
    let seen = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("immediate notification")?;
    assert_eq!(seen.topic(), "LIFECYCLE/external/e1");
    gateway.shutdown().await;
    Ok(())
}
