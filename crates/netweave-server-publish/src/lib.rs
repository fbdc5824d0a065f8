// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Outbound messages to host agents.
//!
//! Payloads are JSON, sealed per recipient host with the server's static
//! X25519 key, deduplicated against the last payload on the same topic,
//! and delivered through a [`Broker`] by a single background worker.
//! [`Fanout`] recomputes peer updates after a change and hands them over.

pub mod broker;
pub mod dedup;
pub mod error;
pub mod fanout;
pub mod keys;
pub mod mqtt;
pub mod publisher;
pub mod seal;
pub mod topic;

pub use broker::{Broker, Delivered, DiscardBroker, MemoryBroker};
pub use fanout::{Fanout, FanoutReport};
pub use error::{BrokerError, PublishError, Result};
pub use keys::{decode_public_key, ServerKeys, SERVER_KEY_ID};
pub use mqtt::MqttBroker;
pub use publisher::{PublishStats, Publisher, PublisherOptions, MAX_ATTEMPTS};
pub use seal::{open, seal};
pub use topic::{Recipient, Topic};
