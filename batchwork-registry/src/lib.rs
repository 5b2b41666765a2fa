//! Job registry for batchwork
//!
//! Holds the job definitions known to one process. The registry is an owned
//! value built at startup and handed to the launcher and operator; nothing
//! here is global.

pub mod registry;

// Re-export main types and traits
pub use registry::{JobRegistry, MapJobRegistry};

pub mod prelude {
    pub use crate::{JobRegistry, MapJobRegistry};
    pub use batchwork_core::{BatchError, Job};
}
