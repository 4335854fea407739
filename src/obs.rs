//! Observability helpers for provisioning steps and caches.
//!
//! - Every step handler runs inside a span named `device_provisioning.step` carrying the `step`
//!   and `stage` fields.
//! - Enable `metrics` to increment `device_provisioning_step_total` (labels `step`, `outcome`)
//!   and `device_provisioning_cache_total` (labels `cache`, `outcome`).

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Provisioning steps observed by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StepKind {
	/// Device time synchronization.
	PlgdTime,
	/// Ownership transfer.
	Ownership,
	/// Credential issuance.
	Credentials,
	/// Access control list installation.
	Acls,
	/// Cloud configuration hand-off.
	CloudConfiguration,
	/// Unknown path fallback.
	Default,
}
impl StepKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			StepKind::PlgdTime => "plgd_time",
			StepKind::Ownership => "ownership",
			StepKind::Credentials => "credentials",
			StepKind::Acls => "acls",
			StepKind::CloudConfiguration => "cloud_configuration",
			StepKind::Default => "default",
		}
	}
}
impl Display for StepKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StepOutcome {
	/// Entry to a step handler.
	Attempt,
	/// Step answered with a success code.
	Success,
	/// Step answered with an error code.
	Failure,
}
impl StepOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			StepOutcome::Attempt => "attempt",
			StepOutcome::Success => "success",
			StepOutcome::Failure => "failure",
		}
	}
}
impl Display for StepOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Caches reporting hit/miss events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheKind {
	/// Linked hub cache.
	LinkedHub,
	/// Access token cache.
	Token,
	/// Enrollment group cache.
	EnrollmentGroup,
	/// Verified chains cache.
	Chains,
}
impl CacheKind {
	/// Returns a stable label suitable for metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			CacheKind::LinkedHub => "linked_hub",
			CacheKind::Token => "token",
			CacheKind::EnrollmentGroup => "enrollment_group",
			CacheKind::Chains => "chains",
		}
	}
}

/// Cache lookup outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheOutcome {
	/// Served from a resolved entry.
	Hit,
	/// Entry had to be computed.
	Miss,
	/// Entry was dropped by a sweep, watch, or staleness check.
	Evicted,
}
impl CacheOutcome {
	/// Returns a stable label suitable for metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			CacheOutcome::Hit => "hit",
			CacheOutcome::Miss => "miss",
			CacheOutcome::Evicted => "evicted",
		}
	}
}
