#![allow(clippy::doc_markdown)] // Allow technical terms like ServiceBus, PeekLock in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # PubSub Resilience
//!
//! Resilient publish/subscribe engine for topic brokers with peek-lock
//! delivery and optional sessions.
//!
//! ## Overview
//!
//! The broker SDK is abstracted behind [`messaging::BrokerClient`]. On top of it
//! this crate keeps publishers and subscribers working through transient
//! failures:
//!
//! - **Publish retry**: classified errors (network, retriable protocol,
//!   permanent) with exponential backoff; network failures invalidate the
//!   cached sender
//! - **Bulk publish**: one size-bounded batch per request, all-or-nothing
//! - **Supervised subscriptions**: reconnect with backoff, sequential handler
//!   dispatch with complete/abandon settlement
//! - **Session pool**: bounded concurrent sessions, each slot with its own
//!   reconnect backoff
//! - **Lock renewal**: background renewal of message or session locks
//!
//! ## Module Organization
//!
//! - [`pubsub`] - [`TopicPubSub`] façade
//! - [`subscription`] - supervisor, session pool, receive and renewal loops
//! - [`resilience`] - backoff policy and classified retry
//! - [`messaging`] - broker traits, envelopes, sender cache, in-memory broker
//! - [`config`] - layered configuration loading
//! - [`logging`] - structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pubsub_resilience::messaging::{InMemoryBroker, PublishRequest};
//! use pubsub_resilience::{PubSubConfig, TopicPubSub};
//!
//! # async fn example() -> pubsub_resilience::Result<()> {
//! let broker = InMemoryBroker::new();
//! let pubsub = TopicPubSub::new(PubSubConfig::new("billing"), Arc::new(broker))?;
//!
//! pubsub
//!     .publish(&PublishRequest::new("orders", b"{\"id\":1}".to_vec()))
//!     .await?;
//!
//! pubsub.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod pubsub;
pub mod resilience;
pub mod subscription;

pub use config::{ConfigLoader, ConfigurationError, PubSubConfig};
pub use constants::Feature;
pub use error::{PubSubError, Result};
pub use messaging::{
    BrokerClient, BulkPublishEntry, BulkPublishRequest, BulkPublishResponse, ErrorClass,
    ErrorClassifier, InMemoryBroker, MessagingError, PublishRequest,
};
pub use pubsub::TopicPubSub;
pub use resilience::{BackoffConfig, ExponentialBackoff};
pub use subscription::{
    BulkMessageHandler, HandlerError, MessageHandler, SubscribeRequest, SubscriptionHandle,
    SubscriptionObserver,
};
