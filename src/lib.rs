//! Introspection of the Selva hierarchy in a halted process or a core dump.
//!
//! The [`printers`] render hierarchy nodes and `SVector`s read through a
//! [`target::Target`], which combines a [`memory::Memory`] backend with type
//! layouts and symbols.

pub mod commands;
pub mod config;
pub mod error;
pub mod logger;
pub mod memory;
pub mod printers;
mod prelude;
pub mod symbols;
pub mod target;

pub use error::{InspectError, InspectResult};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
