//! Caching primitives shared by the provisioning engine.
//!
//! - [`SingleFlightCache`] coalesces concurrent misses for one key into a single computation.
//! - [`ExpiringMap`] keeps entries alive while they are read and drops them after a TTL.
//! - [`TokenCache`] layers client-credentials tokens and required-claim checks on top of the
//!   single-flight cache.

pub mod expiring;
pub mod singleflight;
pub mod token;

pub use expiring::*;
pub use singleflight::*;
pub use token::*;

// self
use crate::_prelude::*;

/// Smallest period accepted by background sweep loops.
pub(crate) const MIN_SWEEP_PERIOD: Duration = Duration::milliseconds(10);

/// Builds a ticker whose first tick fires one `period` from now.
pub(crate) fn sweep_interval(period: Duration) -> tokio::time::Interval {
	let period = period.max(MIN_SWEEP_PERIOD).unsigned_abs();

	tokio::time::interval_at(tokio::time::Instant::now() + period, period)
}
