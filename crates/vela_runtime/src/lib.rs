//! Runtime core for Vela (Layer 3).
//!
//! Ties the lower layers together into an explicitly owned [`Runtime`]:
//!
//! - [`scheduler`] - tracked tasks on a tokio multi-thread pool, cooperative
//!   cancellation, the synchronous bridge
//! - [`task`] - task ids, states and handles
//! - [`context`] - per-invocation bindings and service access
//! - [`handlers`] - named feature-set handlers, invoked directly or from bus
//!   events
//! - [`runtime`] - construction, the blocking event loop and the shutdown
//!   protocol
//! - [`config`] - tuning knobs, from code, JSON or `VELA_*` variables
//! - [`ffi`] - the C-callable embedding boundary
//!
//! # Example
//!
//! ```no_run
//! use vela_runtime::{Runtime, RuntimeConfig};
//!
//! let runtime = Runtime::new(RuntimeConfig::default())?;
//! runtime.handlers().register("greet", |ctx| async move {
//!     let name = ctx.input()["name"].as_str().unwrap_or("world").to_string();
//!     Ok(serde_json::json!({ "greeting": format!("hello, {name}") }))
//! })?;
//! let reply = runtime.invoke_handler("greet", serde_json::json!({"name": "vela"}))?;
//! assert_eq!(reply["greeting"], "hello, vela");
//! runtime.request_shutdown();
//! runtime.run_event_loop_blocking()?;
//! # Ok::<(), vela_runtime::RuntimeError>(())
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod ffi;
pub mod handlers;
pub mod runtime;
pub mod scheduler;
mod signals;
pub mod task;

pub use config::RuntimeConfig;
pub use context::ExecutionContext;
pub use error::RuntimeError;
pub use handlers::{HandlerFuture, HandlerRegistry};
pub use runtime::{
    HandlersModule, RUNTIME_STARTED, Runtime, RuntimeBuilder, ShutdownReason, ShutdownReport,
};
pub use scheduler::{CancelReport, Scheduler, current_task, current_token};
pub use task::{TaskHandle, TaskId, TaskState};
