//! Client for assistant servers that expose the thread/run HTTP API.

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod message;

pub use client::{ClientConfig, PollOutcome, PollPolicy, RunClient, RunState};
pub use error::{Error, Result, Step};
pub use message::{Assistant, Message, ReplyMessage};
