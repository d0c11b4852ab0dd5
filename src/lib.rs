//! Single-writer digital twin core for an IoT gateway.
//!
//! Providers, services and resources live in an in-memory twin that only
//! commands may touch. Commands run one at a time on a dedicated worker;
//! their notifications reach subscribers atomically, after the command
//! commits.

pub mod cache;
pub mod clock;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod gateway;
pub mod logging;
pub mod metrics;
pub mod model;
mod scope;
pub mod twin;
pub mod value;
pub mod whiteboard;

// Re-exports
pub use cache::ReadPlan;
pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{Command, Promise};
pub use config::{CacheConfig, GatewayConfig, LogFormat, LoggingConfig, WhiteboardConfig};
pub use error::{GatewayError, GatewayResult};
pub use gateway::{DataUpdate, Gateway};
pub use metrics::MetricsSnapshot;
pub use model::{ConsistencyLevel, ModelHandle, ResourceKind};
pub use twin::{ProviderHandle, ResourceHandle, ServiceHandle, TwinHandle};
pub use value::{TimedValue, Value, ValueType};

#[cfg(test)]
#[ctor::ctor]
fn init_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
