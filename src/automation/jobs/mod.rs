//! Built-in job handlers.

pub mod command;

pub use command::{CommandHandler, EXECUTION_ID_ENV};
