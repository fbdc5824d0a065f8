// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bounded, cancellable calls against the store.
//!
//! Every store call runs under a deadline. Transient failures are retried
//! with exponential backoff plus jitter; everything else surfaces at once.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{DbError, Result};

const BASE_BACKOFF_MS: u64 = 50;
const MAX_BACKOFF_MS: u64 = 2_000;

#[derive(Debug, Clone)]
pub struct CallPolicy {
	pub timeout: Duration,
	pub max_attempts: u32,
	pub cancel: CancellationToken,
}

impl CallPolicy {
	pub fn new(timeout: Duration) -> Self {
		Self {
			timeout,
			max_attempts: 3,
			cancel: CancellationToken::new(),
		}
	}

	pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
		self.cancel = cancel;
		self
	}

	pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
		self.max_attempts = max_attempts.max(1);
		self
	}

	/// Run `op` once under the deadline and the cancellation token.
	pub async fn call<T, F, Fut>(&self, op: F) -> Result<T>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		tokio::select! {
			_ = self.cancel.cancelled() => Err(DbError::Cancelled),
			res = tokio::time::timeout(self.timeout, op()) => match res {
				Ok(inner) => inner,
				Err(_) => Err(DbError::Timeout(self.timeout.as_millis() as u64)),
			},
		}
	}

	/// Like [`CallPolicy::call`] but retries transient failures.
	pub async fn with_retry<T, F, Fut>(&self, mut op: F) -> Result<T>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		let mut attempt = 0;
		loop {
			attempt += 1;
			match self.call(&mut op).await {
				Ok(v) => return Ok(v),
				Err(e) if e.is_transient() && attempt < self.max_attempts => {
					let delay = backoff(attempt);
					tracing::warn!(
						attempt,
						max_attempts = self.max_attempts,
						delay_ms = delay.as_millis() as u64,
						error = %e,
						"transient store failure, retrying"
					);
					tokio::select! {
						_ = self.cancel.cancelled() => return Err(DbError::Cancelled),
						_ = tokio::time::sleep(delay) => {}
					}
				}
				Err(e) => return Err(e),
			}
		}
	}
}

fn backoff(attempt: u32) -> Duration {
	let exp = BASE_BACKOFF_MS.saturating_mul(1u64 << (attempt - 1).min(16));
	let capped = exp.min(MAX_BACKOFF_MS);
	let jitter = fastrand::u64(0..=capped / 2);
	Duration::from_millis(capped + jitter)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::kv::{KvStore, Table};
	use crate::memory::MemoryKvStore;
	use std::sync::atomic::{AtomicU32, Ordering};

	#[tokio::test]
	async fn retries_transient_then_succeeds() {
		let kv = MemoryKvStore::new();
		kv.fail_next(2);
		let policy = CallPolicy::new(Duration::from_secs(1));
		let v = policy
			.with_retry(|| kv.put(Table::Nodes, "n", "{}"))
			.await
			.unwrap();
		assert_eq!(v, 1);
	}

	#[tokio::test]
	async fn gives_up_after_max_attempts() {
		let kv = MemoryKvStore::new();
		kv.fail_next(5);
		let policy = CallPolicy::new(Duration::from_secs(1));
		let err = policy
			.with_retry(|| kv.get(Table::Nodes, "n"))
			.await
			.unwrap_err();
		assert!(matches!(err, DbError::Unavailable(_)));
	}

	#[tokio::test]
	async fn non_transient_is_not_retried() {
		let calls = AtomicU32::new(0);
		let policy = CallPolicy::new(Duration::from_secs(1));
		let err = policy
			.with_retry(|| {
				calls.fetch_add(1, Ordering::SeqCst);
				async { Err::<(), _>(DbError::NotFound("x".into())) }
			})
			.await
			.unwrap_err();
		assert!(matches!(err, DbError::NotFound(_)));
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn slow_call_times_out() {
		let policy = CallPolicy::new(Duration::from_millis(10)).with_max_attempts(1);
		let err = policy
			.call(|| async {
				tokio::time::sleep(Duration::from_secs(5)).await;
				Ok::<_, DbError>(())
			})
			.await
			.unwrap_err();
		assert!(matches!(err, DbError::Timeout(10)));
	}

	#[tokio::test]
	async fn cancelled_token_short_circuits() {
		let cancel = CancellationToken::new();
		cancel.cancel();
		let policy = CallPolicy::new(Duration::from_secs(1)).with_cancel(cancel);
		let err = policy
			.call(std::future::pending::<Result<()>>)
			.await
			.unwrap_err();
		assert!(matches!(err, DbError::Cancelled));
	}

	#[test]
	fn backoff_is_capped() {
		for attempt in 1..20 {
			assert!(backoff(attempt) <= Duration::from_millis(MAX_BACKOFF_MS * 3 / 2));
		}
	}
}
