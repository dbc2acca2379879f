//! API trait for capability registration.
//!
//! APIs are build-time registries that modules use to expose capabilities
//! to other modules: the service registry, the event bus, the plugin host and
//! the handler registry are all installed this way.
//!
//! # API vs Global Resource
//!
//! | Aspect | API | Global resource |
//! |--------|-----|-----------------|
//! | **Purpose** | Shared capability | Read-only configuration |
//! | **Mutability** | Interior (locks) | None |
//! | **Access method** | `server.api::<A>()` | `server.get_global::<R>()` |
//!
//! # Handle Pattern
//!
//! Registries that must outlive the build phase (they are used by running
//! tasks) are cheap `Clone` handles around an `Arc`. A module clones the handle
//! out of the server and moves it into whatever needs it:
//!
//! ```ignore
//! #[derive(Clone)]
//! pub struct MyRegistry {
//!     inner: Arc<RwLock<HashMap<String, Value>>>,
//! }
//!
//! impl API for MyRegistry {}
//!
//! fn ready(&self, server: &mut Server) -> Result<(), ServerError> {
//!     let registry = server.require_api::<MyRegistry>()?.clone();
//!     // move `registry` into a task
//!     Ok(())
//! }
//! ```

/// Marker trait for capability APIs.
///
/// Simply implement this marker trait for your type:
///
/// ```
/// use vela_system::api::API;
///
/// pub struct MyAPI;
///
/// impl API for MyAPI {}
/// ```
pub trait API: Send + Sync + 'static {}
