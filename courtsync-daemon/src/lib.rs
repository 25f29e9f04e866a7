//! Long-running sync runtime: scheduler, reachability probe, realtime
//! listener and the Unix-socket control server.

mod error;
pub mod lock;
pub mod paths;
pub mod protocol;
pub mod reachability;
pub mod realtime;
mod runtime;
pub mod scheduler;

pub use error::DaemonError;
pub use lock::EngineLock;
pub use protocol::{
    request_queue, request_set_enabled, request_status, request_stop, request_sync, send_request,
    DaemonRequest, DaemonResponse,
};
pub use reachability::{probe_once, ReachabilityProbe};
pub use realtime::TableChange;
pub use runtime::{build_orchestrator, init_tracing, run, run_with, start_blocking};
pub use scheduler::{CycleSummary, Scheduler, SchedulerHandle, SchedulerOptions, Trigger};
