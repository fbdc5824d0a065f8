// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use netweave_common_core::{DeviceInfo, ExtClient, NetworkId, Node, PostureCheck, PostureState, UserGroupId};
use netweave_server_jobs::{Job, JobContext, JobError, JobOutput};
use netweave_server_policy::posture;
use netweave_server_store::{EntityStore, StoreResult};
use tracing::{info, instrument, warn};

#[derive(Debug, Default)]
struct Tally {
	evaluated: usize,
	violating: usize,
	changed: usize,
}

impl Tally {
	fn add(&mut self, state: &PostureState, changed: bool) {
		self.evaluated += 1;
		if !state.is_compliant() {
			self.violating += 1;
		}
		if changed {
			self.changed += 1;
		}
	}
}

/// Judges every node and remote-access client against its network's
/// posture checks and records the outcome on the device.
pub struct PostureCheckJob {
	store: Arc<EntityStore>,
}

impl PostureCheckJob {
	pub fn new(store: Arc<EntityStore>) -> Self {
		Self { store }
	}

	async fn node_device(&self, node: &Node) -> StoreResult<DeviceInfo> {
		let host = self.store.get_host(&node.host_id).await?;
		Ok(DeviceInfo {
			client_location: host.country_code,
			client_version: host.version,
			os: host.os.as_str().to_string(),
			os_version: host.os_version,
			os_family: host.os_family,
			kernel_version: host.kernel_version,
			auto_update: host.auto_update,
			tags: node.tags.clone(),
			is_user: false,
			user_groups: Default::default(),
		})
	}

	async fn client_device(&self, client: &ExtClient) -> DeviceInfo {
		let mut user_groups = std::collections::BTreeSet::new();
		if let Some(owner) = &client.owner {
			if let Ok(Some(user)) = self.store.find_user(owner).await {
				user_groups.extend(user.groups.iter().cloned());
				if user.platform_role.is_admin() {
					user_groups.insert(UserGroupId::network_admin(&client.network));
				}
			}
		}
		DeviceInfo {
			client_location: client.facts.country.clone(),
			client_version: client.facts.client_version.clone(),
			os: client.facts.os.clone(),
			os_version: client.facts.os_version.clone(),
			os_family: client.facts.os_family.clone(),
			kernel_version: client.facts.kernel_version.clone(),
			auto_update: false,
			tags: client.tags.clone(),
			is_user: true,
			user_groups,
		}
	}

	async fn evaluate_network(&self, network: &NetworkId, checks: &[PostureCheck], tally: &mut Tally) {
		let now = Utc::now();
		let judge = |device: &DeviceInfo| {
			let (violations, severity) = posture::evaluate(checks, device);
			PostureState {
				violations,
				severity,
				evaluated_at: Some(now),
			}
		};

		for node in self.store.list_nodes(network).await {
			let state = match self.node_device(&node).await {
				Ok(device) => judge(&device),
				Err(e) => {
					warn!(node_id = %node.id, error = %e, "no host facts for posture evaluation");
					continue;
				}
			};
			if checks.is_empty() && node.posture.is_compliant() {
				continue;
			}
			match self.store.record_node_posture(&node.id, state.clone()).await {
				Ok(changed) => tally.add(&state, changed),
				Err(e) => warn!(node_id = %node.id, error = %e, "could not record posture"),
			}
		}

		// Admin-provisioned clients carry no device facts to judge.
		for client in self.store.list_ext_clients(network).await {
			if client.is_static() {
				continue;
			}
			if checks.is_empty() && client.posture.is_compliant() {
				continue;
			}
			let state = judge(&self.client_device(&client).await);
			match self.store.record_ext_client_posture(&client.client_id, state.clone()).await {
				Ok(changed) => tally.add(&state, changed),
				Err(e) => warn!(client_id = %client.client_id, error = %e, "could not record posture"),
			}
		}
	}
}

#[async_trait]
impl Job for PostureCheckJob {
	fn id(&self) -> &str {
		"posture-check"
	}

	fn name(&self) -> &str {
		"Posture Check"
	}

	fn description(&self) -> &str {
		"Evaluate device compliance against each network's posture checks"
	}

	#[instrument(skip(self, ctx), fields(job_id = "posture-check"))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		let mut tally = Tally::default();
		for network in self.store.list_networks().await {
			ctx.check_cancelled()?;
			// With no checks left, stale violations are cleared.
			let checks = self.store.list_posture_checks(&network.id).await;
			self.evaluate_network(&network.id, &checks, &mut tally).await;
		}

		info!(
			evaluated = tally.evaluated,
			violating = tally.violating,
			changed = tally.changed,
			"Posture check completed"
		);

		Ok(JobOutput {
			message: format!(
				"Evaluated {} devices, {} out of compliance",
				tally.evaluated, tally.violating
			),
			metadata: Some(serde_json::json!({
				"evaluated": tally.evaluated,
				"violating": tally.violating,
				"changed": tally.changed,
			})),
		})
	}
}
