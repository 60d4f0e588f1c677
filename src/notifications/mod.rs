//! Operator alerts raised by the automation engine

mod models;
mod service;

pub use models::{AlertPriority, AlertType, SystemAlert};
pub use service::{AlertDispatcher, LoggingNotifier, Notifier};
