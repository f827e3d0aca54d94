//! # chatroom-core
//!
//! Shared types for the topic router: [`Topic`], [`Verdict`], [`Outbox`], [`TextMessage`],
//! the error taxonomy, env-backed [`RouterConfig`] and tracing initialization.

pub mod config;
pub mod error;
pub mod logger;
pub mod types;

pub use config::RouterConfig;
pub use error::{Result, RouterError, TopicError};
pub use logger::init_tracing;
pub use types::{Outbox, TextMessage, Topic, Verdict};
