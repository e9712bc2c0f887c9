/// Settings loading: defaults, optional file, environment.
pub mod config;
/// Shared connection lifecycle: connect, reconnect, disconnect.
pub mod connection;
/// Consumer scopes with total teardown.
pub mod consumer;
/// Fan-out of inbound messages to registered handlers.
pub mod dispatch;
/// Flexible logging (formatting, filters, sinks).
pub mod logging;
/// In-process Pub/Sub: Broker, Subscription, InboundMessage.
pub mod pubsub;
/// Request coordinator: state machine, timers, retries.
pub mod request;
/// Normalization of heterogeneous response envelopes.
pub mod response;
/// Topic subscription bookkeeping.
pub mod subscription;
/// Topic validation and wildcard filters.
pub mod topic;
/// Transport boundary: in-memory and MQTT.
pub mod transport;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Settings and their conversions.
pub use config::{MqttSettings, Settings};
/// Connection manager and lifecycle events.
pub use connection::{ConnectionConfig, ConnectionEvent, ConnectionManager, ConnectionState};
/// Consumer scope.
pub use consumer::ConsumerScope;
/// Handler registry.
pub use dispatch::{DispatchReport, HandlerRegistry};
/// Logging entry point.
pub use logging::{init_logging, LoggingConfig, LoggingHandle};
/// Pub/Sub API.
pub use pubsub::{Broker, InboundMessage, Subscription};
/// Request coordination.
pub use request::{
    CancelableTimer, CoordinatorConfig, Initiation, Outcomes, RequestCoordinator, RequestOutcome,
    RequestState, RetryPolicy,
};
/// Response normalization.
pub use response::{normalize, parse_payload, NormalizedResponse};
/// Subscription tracker.
pub use subscription::SubscriptionTracker;
/// Topic helpers.
pub use topic::{validate_topic, TopicFilter};
/// Errors.
pub use topicwire_error::{StackError, StatusCode, WireResult};
/// Transports.
pub use transport::{MemoryTransport, Transport, TransportEvent};
#[cfg(feature = "mqtt")]
pub use transport::MqttTransport;
