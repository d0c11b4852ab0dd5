#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use twin_gateway::event::{EventReceiver, Notification};
use twin_gateway::{Gateway, GatewayConfig, GatewayResult, ManualClock};

#[ctor::ctor]
fn init_tests() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub fn manual_gateway() -> GatewayResult<(Gateway, ManualClock)> {
    manual_gateway_with(GatewayConfig::default())
}

pub fn manual_gateway_with(config: GatewayConfig) -> GatewayResult<(Gateway, ManualClock)> {
    let clock = ManualClock::new(t0());
    let gateway = Gateway::with_clock(config, Arc::new(clock.clone()))?;
    Ok((gateway, clock))
}

/// Counts calls made to a handler.
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Collects whatever is already on the bus. A command's batch is published
/// before its promise resolves, so awaiting the promise first is enough.
pub fn drain(rx: &mut EventReceiver) -> Vec<Notification> {
    std::iter::from_fn(|| rx.try_recv()).collect()
}

pub fn topics(notifications: &[Notification]) -> Vec<String> {
    notifications.iter().map(|n| n.topic()).collect()
}
