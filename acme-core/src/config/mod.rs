//! Configuration loading and validation.

mod loader;
mod types;

pub use loader::load;
pub use types::{AcmeConfig, ServerMode, ValidatorKind};
