mod common;

use std::sync::{Arc, Mutex};

use common::manual_gateway;
use twin_gateway::twin::SnapshotFilter;
use twin_gateway::{ConsistencyLevel, GatewayError, GatewayResult, TwinHandle, ValueType};

#[tokio::test]
async fn test_escaped_handles_fail_with_invalid_scope() -> GatewayResult<()> {
    let (gateway, _clock) = manual_gateway()?;

    let (twin, models, resource) = gateway
        .submit(|twin, models| async move {
            let resource = twin.get_or_create_resource(
                "sensors",
                "s1",
                "env",
                "temperature",
                ValueType::Float,
            )?;
            assert!(twin.is_valid());
            Ok((twin, models, resource))
        })?
        .await?;

    assert!(!twin.is_valid());
    assert!(matches!(
        twin.get_provider("s1"),
        Err(GatewayError::InvalidScope(_))
    ));
    assert!(matches!(
        twin.delete_provider("s1"),
        Err(GatewayError::InvalidScope(_))
    ));
    assert!(matches!(models.models(), Err(GatewayError::InvalidScope(_))));
    assert!(matches!(resource.name(), Err(GatewayError::InvalidScope(_))));
    assert!(matches!(
        resource.get_value(ConsistencyLevel::Weak).await,
        Err(GatewayError::InvalidScope(_))
    ));
    assert!(matches!(
        resource.set_value(1.0, None).await,
        Err(GatewayError::InvalidScope(_))
    ));

    // the twin itself is untouched by the rejected calls
    let still_there = gateway
        .submit(|twin, _| async move { Ok(twin.get_provider("s1")?.is_some()) })?
        .await?;
    assert!(still_there);
    gateway.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_handle_smuggled_out_of_failed_command() -> GatewayResult<()> {
    let (gateway, _clock) = manual_gateway()?;
    let smuggled: Arc<Mutex<Option<TwinHandle>>> = Arc::new(Mutex::new(None));

    let slot = smuggled.clone();
    let result = gateway
        .submit(move |twin, _| async move {
            *slot.lock().unwrap() = Some(twin);
            Err::<(), _>(GatewayError::command("abort"))
        })?
        .await;
    assert!(result.is_err());

    let twin = smuggled.lock().unwrap().take().unwrap();
    assert!(matches!(
        twin.create_provider("m", "p"),
        Err(GatewayError::InvalidScope(_))
    ));
    gateway.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_each_command_gets_a_fresh_scope() -> GatewayResult<()> {
    let (gateway, _clock) = manual_gateway()?;
    gateway
        .submit(|twin, _| async move {
            twin.create_provider("lamps", "l1")?;
            Ok(())
        })?
        .await?;

    let providers = gateway
        .submit(|twin, _| async move {
            let names = twin
                .providers()?
                .iter()
                .map(|p| p.name().map(str::to_string))
                .collect::<GatewayResult<Vec<_>>>()?;
            Ok(names)
        })?
        .await?;
    assert_eq!(providers, vec!["l1".to_string()]);

    let duplicate = gateway
        .submit(|twin, _| async move { twin.create_provider("lamps", "l1") })?
        .await;
    assert!(matches!(duplicate, Err(GatewayError::ProviderAlreadyExists(_))));

    let mismatch = gateway
        .submit(|twin, _| async move {
            twin.get_or_create_resource("sensors", "l1", "env", "t", ValueType::Float)
        })?
        .await;
    assert!(matches!(mismatch, Err(GatewayError::ModelMismatch { .. })));
    gateway.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_rejected_coordinates_leave_no_schema() -> GatewayResult<()> {
    let (gateway, _clock) = manual_gateway()?;
    gateway
        .submit(|twin, _| async move {
            twin.create_provider("lamps", "l1")?;
            Ok(())
        })?
        .await?;

    let mismatch = gateway
        .submit(|twin, _| async move {
            twin.get_or_create_resource("sensors", "l1", "env", "t", ValueType::Float)
        })?
        .await;
    assert!(matches!(mismatch, Err(GatewayError::ModelMismatch { .. })));

    let (schema, created) = gateway
        .submit(|twin, models| async move {
            let schema = models.get_model("sensors")?;
            let resource =
                twin.get_or_create_resource("sensors", "s9", "env", "t", ValueType::String)?;
            Ok((schema, resource.value_type()?))
        })?
        .await?;
    assert!(schema.is_none());
    assert_eq!(created, ValueType::String);
    gateway.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_models_in_use_cannot_be_deleted() -> GatewayResult<()> {
    let (gateway, _clock) = manual_gateway()?;
    let (lamps, sensors) = gateway
        .submit(|twin, _| async move {
            twin.create_provider("lamps", "l1")?;
            twin.create_provider("lamps", "l2")?;
            twin.create_provider("sensors", "s1")?;
            let names = |model: &str| {
                twin.providers_for_model(model)?
                    .iter()
                    .map(|p| p.name().map(str::to_string))
                    .collect::<GatewayResult<Vec<_>>>()
            };
            Ok((names("lamps")?, names("sensors")?))
        })?
        .await?;
    assert_eq!(lamps, vec!["l1".to_string(), "l2".to_string()]);
    assert_eq!(sensors, vec!["s1".to_string()]);

    let refused = gateway
        .submit(|_, models| async move { models.delete_model("lamps") })?
        .await;
    assert!(matches!(refused, Err(GatewayError::CommandFailed(_))));

    let deleted = gateway
        .submit(|twin, models| async move {
            twin.delete_provider("s1")?;
            assert!(twin.providers_for_model("sensors")?.is_empty());
            models.create_model("sensors")?;
            models.delete_model("sensors")
        })?
        .await?;
    assert!(deleted);
    gateway.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_snapshots_are_owned_and_filterable() -> GatewayResult<()> {
    let (gateway, _clock) = manual_gateway()?;
    let snapshots = gateway
        .submit(|twin, _| async move {
            for (provider, resource) in [("s1", "temperature"), ("s1", "humidity"), ("s2", "temperature")] {
                twin.get_or_create_resource("sensors", provider, "env", resource, ValueType::Float)?
                    .set_value(20.0, None)
                    .await?;
            }
            twin.filtered_snapshot(&SnapshotFilter::new().resource(|r| r.name == "humidity"))
        })?
        .await?;

    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].name, "s1");
    assert!(snapshots[0].resource("env", "humidity").is_some());
    assert!(snapshots[0].resource("env", "temperature").is_none());
    gateway.shutdown().await;
    Ok(())
}
