//! Metrics and observability infrastructure for flurry.
//!
//! - `events`: internal event types and the `InternalEvent` trait
//! - `server`: Prometheus HTTP server and initialization

pub mod events;
pub mod server;

pub use server::init;

/// Emit an internal event as a Prometheus metric.
///
/// ```ignore
/// use flurry::metrics::events::RowsLoaded;
///
/// emit!(RowsLoaded { table: "users", rows: 42 });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}
