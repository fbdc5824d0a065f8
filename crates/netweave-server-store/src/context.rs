// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use netweave_common_core::Origin;

/// Who is mutating, and through which surface. Stamped onto every event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ctx {
	pub actor: String,
	pub origin: Origin,
}

impl Ctx {
	pub fn api(actor: impl Into<String>) -> Self {
		Self {
			actor: actor.into(),
			origin: Origin::Api,
		}
	}

	pub fn mqtt(actor: impl Into<String>) -> Self {
		Self {
			actor: actor.into(),
			origin: Origin::Mqtt,
		}
	}

	pub fn scheduler() -> Self {
		Self {
			actor: "system".to_string(),
			origin: Origin::Scheduler,
		}
	}

	pub fn startup() -> Self {
		Self {
			actor: "system".to_string(),
			origin: Origin::Startup,
		}
	}
}
