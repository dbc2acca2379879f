//! An event-driven runtime core for a declarative, feature-set language.
//!

pub use vela_internal::*;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use vela_internal::prelude::*;
}
