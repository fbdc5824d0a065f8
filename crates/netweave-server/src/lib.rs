// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The netweave control-plane server: wires the entity store, policy and
//! peer computation, publishing, gateways, JIT and background jobs into one
//! [`Core`].

pub mod error;
pub mod jobs;
pub mod license;
pub mod server;
pub mod version;

pub use server::{Core, CoreBuilder};
pub use error::{CoreError, Result};
pub use license::{LicenseError, LicenseMonitor, LicenseStatus, LicenseValidator, OfflineValidator, Usage};
