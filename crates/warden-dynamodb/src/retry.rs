// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::error::{DbError, Result};
use std::future::Future;
use tracing::debug;

/// Attempt budget for optimistic-concurrency transactions. The loop never
/// sleeps; a retry re-reads current state and tries once more.
pub const TRANSACTION_ATTEMPTS: usize = 3;

/// Outcome of one optimistic transaction attempt.
#[derive(Debug)]
pub enum TransactionAttempt<T> {
	Success(T),
	/// The transaction lost a race; carries the error to surface if the
	/// attempt budget runs out.
	Failure(DbError),
}

/// Runs `attempt` up to [`TRANSACTION_ATTEMPTS`] times. `Success`
/// short-circuits, `Failure` retries, any other error propagates
/// immediately. After exhaustion the last failure's error is surfaced.
pub async fn with_transaction_retries<T, F, Fut>(mut attempt: F) -> Result<T>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<TransactionAttempt<T>>>,
{
	let mut last_failure = None;
	for round in 1..=TRANSACTION_ATTEMPTS {
		match attempt().await? {
			TransactionAttempt::Success(value) => return Ok(value),
			TransactionAttempt::Failure(err) => {
				debug!(round, error = %err, "optimistic transaction attempt failed");
				last_failure = Some(err);
			}
		}
	}
	Err(last_failure
		.unwrap_or_else(|| DbError::Conflict("transaction attempts exhausted".to_string())))
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};

	#[tokio::test]
	async fn success_short_circuits() {
		let calls = AtomicUsize::new(0);
		let result = with_transaction_retries(|| {
			calls.fetch_add(1, Ordering::SeqCst);
			async { Ok(TransactionAttempt::Success(7)) }
		})
		.await
		.unwrap();
		assert_eq!(result, 7);
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn failure_retries_then_surfaces_last_error() {
		let calls = AtomicUsize::new(0);
		let result: Result<()> = with_transaction_retries(|| {
			let round = calls.fetch_add(1, Ordering::SeqCst);
			async move {
				Ok(TransactionAttempt::Failure(DbError::Conflict(format!(
					"round {}",
					round
				))))
			}
		})
		.await;
		assert_eq!(calls.load(Ordering::SeqCst), TRANSACTION_ATTEMPTS);
		match result {
			Err(DbError::Conflict(message)) => assert_eq!(message, "round 2"),
			other => panic!("unexpected result: {:?}", other),
		}
	}

	#[tokio::test]
	async fn recovers_when_a_retry_wins() {
		let calls = AtomicUsize::new(0);
		let result = with_transaction_retries(|| {
			let round = calls.fetch_add(1, Ordering::SeqCst);
			async move {
				if round < 2 {
					Ok(TransactionAttempt::Failure(DbError::ConditionFailed))
				} else {
					Ok(TransactionAttempt::Success("won"))
				}
			}
		})
		.await
		.unwrap();
		assert_eq!(result, "won");
		assert_eq!(calls.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn other_errors_propagate_immediately() {
		let calls = AtomicUsize::new(0);
		let result: Result<()> = with_transaction_retries(|| {
			calls.fetch_add(1, Ordering::SeqCst);
			async { Err(DbError::Store("connection reset".to_string())) }
		})
		.await;
		assert_eq!(calls.load(Ordering::SeqCst), 1);
		assert!(matches!(result, Err(DbError::Store(_))));
	}
}
