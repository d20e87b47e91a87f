//! # Messaging Module
//!
//! Broker-facing layer: collaborator traits, envelopes, error taxonomy and
//! classification, the sender cache, and an in-memory broker for tests.

pub mod broker;
pub mod classifier;
pub mod errors;
pub mod in_memory;
pub mod message;
pub mod sender_registry;

pub use broker::{BrokerClient, Receiver, Sender, SubscriptionEntityOptions};
pub use classifier::{ErrorClass, ErrorClassifier, StandardErrorClassifier};
pub use errors::{MessagingError, MessagingResult};
pub use in_memory::{BrokerStats, InMemoryBroker};
pub use message::*;
pub use sender_registry::SenderRegistry;
