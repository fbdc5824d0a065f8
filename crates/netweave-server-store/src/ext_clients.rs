// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::Utc;
use netweave_common_core::{EventAction, ExtClient, NetworkId, NodeId, User};
use tracing::{info, instrument};

use crate::addresses::{self, Fill};
use crate::context::Ctx;
use crate::error::{StoreError, StoreResult};
use crate::store::EntityStore;
use crate::validate::validate_ext_client;

impl EntityStore {
	pub async fn get_ext_client(&self, client_id: &str) -> StoreResult<ExtClient> {
		self.require::<ExtClient>(client_id).await
	}

	pub async fn list_ext_clients(&self, network: &NetworkId) -> Vec<ExtClient> {
		self.all_in::<ExtClient>(network).await
	}

	pub async fn ext_clients_on(&self, ingress: &NodeId) -> Vec<ExtClient> {
		self.caches
			.ext_clients
			.filter(|c| c.ingress_id == *ingress)
			.await
	}

	#[instrument(skip(self, ctx, client), fields(client_id = %client.client_id, ingress = %client.ingress_id))]
	pub async fn create_ext_client(&self, ctx: &Ctx, mut client: ExtClient) -> StoreResult<ExtClient> {
		let _held = self
			.locks()
			.lock_all([
				addresses::lock_key(client.network.as_str()),
				format!("node/{}", client.ingress_id),
			])
			.await;
		if let Some(owner) = &client.owner {
			self.require::<User>(owner).await?;
		}
		let mut view = self.view(&client.network).await?;
		if view.ext_clients.contains_key(&client.client_id) {
			return Err(StoreError::AlreadyExists(format!("ext-client {}", client.client_id)));
		}
		addresses::assign(&view, &mut client.address, &mut client.address6, Fill::Down)?;
		view.ext_clients.insert(client.client_id.clone(), client.clone());
		validate_ext_client(&client, &view)?;

		client.last_modified = Utc::now();
		self.create(&client).await?;
		self.emit(ctx, EventAction::Create, None, Some(&client)).await;
		info!("ext-client created");
		Ok(client)
	}

	#[instrument(skip(self, ctx, client), fields(client_id = %client.client_id))]
	pub async fn update_ext_client(&self, ctx: &Ctx, mut client: ExtClient) -> StoreResult<ExtClient> {
		let _held = self.lock_nodes([client.ingress_id]).await;
		let old = self.get_ext_client(&client.client_id).await?;
		if old.network != client.network {
			return Err(StoreError::Conflict(format!(
				"ext-client {} cannot move networks",
				client.client_id
			)));
		}
		let mut view = self.view(&client.network).await?;
		view.ext_clients.insert(client.client_id.clone(), client.clone());
		validate_ext_client(&client, &view)?;

		client.last_modified = Utc::now();
		self.write(&client).await?;
		self.emit(ctx, EventAction::Update, Some(&old), Some(&client)).await;
		Ok(client)
	}

	#[instrument(skip(self, ctx))]
	pub async fn delete_ext_client(&self, ctx: &Ctx, client_id: &str) -> StoreResult<ExtClient> {
		let client = self.remove::<ExtClient>(client_id).await?;
		self.emit(ctx, EventAction::Delete, Some(&client), None).await;
		Ok(client)
	}

	/// Delete every client matching `pred`. Returns the removed clients.
	pub async fn delete_ext_clients_where<F>(&self, ctx: &Ctx, pred: F) -> StoreResult<Vec<ExtClient>>
	where
		F: Fn(&ExtClient) -> bool + Send + Sync,
	{
		let doomed = self.caches.ext_clients.filter(|c| pred(c)).await;
		let mut removed = Vec::with_capacity(doomed.len());
		for client in doomed {
			match self.delete_ext_client(ctx, &client.client_id).await {
				Ok(c) => removed.push(c),
				Err(StoreError::NotFound(_)) => {}
				Err(e) => return Err(e),
			}
		}
		Ok(removed)
	}
}
