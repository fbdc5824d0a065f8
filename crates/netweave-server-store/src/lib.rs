// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Entity store for the netweave control plane.
//!
//! [`EntityStore`] owns the typed caches over the KV collaborator. Every
//! mutation validates the network invariants against a view with the
//! pending write applied, writes through with a version check, then
//! queues an event. Deletes clean up every reference to the removed
//! entity so nothing dangles.
//!
//! Cross-node edges (relay, auto-relay, failover, internet gateway) are
//! written with [`EntityStore::save_nodes`] while the caller holds
//! [`EntityStore::lock_nodes`] for every node in the batch.

pub mod acls;
pub mod addresses;
mod cache;
pub mod context;
mod entity;
pub mod error;
pub mod ext_clients;
pub mod jit;
pub mod locks;
pub mod networks;
pub mod nodes;
pub mod normalize;
pub mod posture;
pub mod store;
pub mod testing;
pub mod users;
pub mod validate;

pub use context::Ctx;
pub use error::{Invariant, StoreError, StoreResult};
pub use locks::{EntityLocks, LockSet};
pub use nodes::NodeDeletion;
pub use normalize::normalize_node;
pub use store::{EntityStore, ReloadStats};
pub use users::UserDeletion;
pub use validate::{validate_acl, validate_ext_client, validate_grant, validate_node};
