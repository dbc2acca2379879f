//! Event bus for the Vela runtime (Layer 1).
//!
//! Every stimulus the runtime reacts to, whether a file change, a socket
//! connection, an emitted domain event or a repository update, becomes an
//! [`Event`] published on the [`EventBus`]. Subscriptions pair an
//! [`EventPattern`] with an [`EventHandler`]; each matching subscription is
//! scheduled as an independent task through a [`Spawner`].
//!
//! - [`event`] - the immutable event record and repository change fields
//! - [`pattern`] - exact, prefix and structural subscription patterns
//! - [`handler`] - the handler trait and closure adapter
//! - [`bus`] - publish/subscribe and failure isolation
//! - [`repository`] - reactive collections with per-item fan-out
//! - [`spawn`] - the scheduling seam implemented by the runtime
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use vela_events::{Event, EventBus, EventPattern, TokioSpawner, handler_fn};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let bus = EventBus::new(Arc::new(TokioSpawner::current()));
//! bus.subscribe(
//!     EventPattern::exact("file.created"),
//!     handler_fn("log-created", |event| async move {
//!         println!("created: {}", event.payload()["path"]);
//!         Ok(())
//!     }),
//! );
//! bus.publish(Event::new("file.created", serde_json::json!({"path": "/tmp/a.txt"})));
//! # }
//! ```

pub mod bus;
pub mod error;
pub mod event;
pub mod handler;
pub mod pattern;
pub mod repository;
pub mod spawn;

pub use bus::{Delivery, EventBus, SubscriptionId, HANDLER_FAILED};
pub use error::{EventError, HandlerError};
pub use event::{ChangeType, Event, RepositoryChange};
pub use handler::{EventHandler, FnHandler, handler_fn};
pub use pattern::EventPattern;
pub use repository::{REPOSITORY_CHANGED, Repositories, Repository};
pub use spawn::{SpawnError, Spawner, TokioSpawner};
