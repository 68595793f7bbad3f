pub mod attachments;
pub mod classify;
pub mod messages;
pub mod request;
pub mod service;
pub mod types;


pub use service::{ChatOrchestrator, ExchangeOutcome, ExchangePhase, Notice};
