//! Deadline-carrying request context threaded through every blocking operation.

// self
use crate::_prelude::*;

/// Per-request context carrying an optional absolute deadline.
///
/// Cache lookups and collaborator calls require a deadline; [`RequestContext::background`]
/// exists for callers that deliberately run unbounded work (startup seeding, sweeps).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RequestContext {
	deadline: Option<OffsetDateTime>,
}
impl RequestContext {
	/// Context without a deadline.
	pub fn background() -> Self {
		Self { deadline: None }
	}

	/// Context whose deadline is `timeout` from now.
	pub fn with_timeout(timeout: Duration) -> Self {
		Self { deadline: Some(OffsetDateTime::now_utc() + timeout) }
	}

	/// Context expiring at `deadline`.
	pub fn with_deadline(deadline: OffsetDateTime) -> Self {
		Self { deadline: Some(deadline) }
	}

	/// Derives a context bounded by both this deadline and `timeout` from now.
	pub fn child(&self, timeout: Duration) -> Self {
		let candidate = OffsetDateTime::now_utc() + timeout;
		let deadline = match self.deadline {
			Some(parent) if parent < candidate => parent,
			_ => candidate,
		};

		Self { deadline: Some(deadline) }
	}

	/// Returns the deadline, if any.
	pub fn deadline(&self) -> Option<OffsetDateTime> {
		self.deadline
	}

	/// Returns the deadline or [`Error::DeadlineRequired`].
	pub fn require_deadline(&self) -> Result<OffsetDateTime> {
		self.deadline.ok_or(Error::DeadlineRequired)
	}

	/// Time left until the deadline; `None` for background contexts.
	pub fn remaining(&self) -> Option<Duration> {
		self.deadline.map(|deadline| (deadline - OffsetDateTime::now_utc()).max(Duration::ZERO))
	}

	/// Returns true once the deadline has passed.
	pub fn is_expired(&self) -> bool {
		self.deadline.is_some_and(|deadline| deadline <= OffsetDateTime::now_utc())
	}

	/// Drives `fut` to completion or fails with [`Error::DeadlineExceeded`].
	pub async fn run<F, T>(&self, operation: &'static str, fut: F) -> Result<T>
	where
		F: Future<Output = Result<T>>,
	{
		let Some(remaining) = self.remaining() else {
			return fut.await;
		};

		match tokio::time::timeout(remaining.unsigned_abs(), fut).await {
			Ok(result) => result,
			Err(_) => Err(Error::DeadlineExceeded { operation }),
		}
	}
}
