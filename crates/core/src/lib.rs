//! Shared foundation for the CourseFlow notification platform — domain
//! types, error taxonomy, configuration, telemetry sink, and template
//! rendering.

pub mod config;
pub mod error;
pub mod event_bus;
pub mod templates;
pub mod types;

pub use error::{FlowError, FlowResult};
