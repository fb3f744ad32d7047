/// Loading settings from defaults, files and `SOUNDBUS_*` environment variables.
pub mod config;
/// Application-level errors and re-exports of the bus error crate.
pub mod error;
/// Logging setup on top of `tracing` (filters, formats, sinks).
pub mod logging;
/// The deferred, reentrancy-safe publish/subscribe bus.
pub mod pubsub;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Settings.
pub use config::{BusSettings, Settings};
/// Errors.
pub use error::{BusError, ConfigError, ErrorExt, LogLevel, LoggingError, StatusCode};
/// Logging.
pub use logging::{init_logging, LogFormat, LoggingConfig, LoggingHandle};
/// Pub/Sub API.
pub use pubsub::{
    callback, keep_existing, merge_into_existing, predicate, Bus, BusStats, Callback,
    CallbackHold, ChannelName, Compactor, DeferredTrigger, Message, Predicate, ReadyQueue,
    SubscribeOptions, SubscriberId, SubscriptionGuard, SubscriptionHandle, Survivor,
    TokioLocalTrigger, TriggerKind, Wake, WeakBus, WeakCallback,
};
