pub mod client;
pub mod parser;
pub mod record_url;
pub mod trigger;

pub use client::{FieldWrite, FormClient, FormError, HttpFormClient};
pub use trigger::{InstrumentStatus, Trigger, TriggerError};
