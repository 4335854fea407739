//! TTL map whose entries stay alive while they are read.

// self
use crate::_prelude::*;

struct Entry<V> {
	value: V,
	expires_at: OffsetDateTime,
}

/// Mutex-guarded map with a sliding per-entry expiry.
pub struct ExpiringMap<K, V> {
	ttl: Duration,
	entries: Mutex<HashMap<K, Entry<V>>>,
}
impl<K, V> ExpiringMap<K, V>
where
	K: Eq + Hash,
	V: Clone,
{
	/// Creates an empty map with the given time-to-live.
	pub fn new(ttl: Duration) -> Self {
		Self { ttl, entries: Mutex::new(HashMap::new()) }
	}

	/// Time-to-live applied on insert and on every read.
	pub fn ttl(&self) -> Duration {
		self.ttl
	}

	/// Inserts or replaces `key`.
	pub fn insert(&self, key: K, value: V) {
		let expires_at = OffsetDateTime::now_utc() + self.ttl;

		self.entries.lock().insert(key, Entry { value, expires_at });
	}

	/// Returns a live value and extends its expiry; expired entries are dropped.
	pub fn get(&self, key: &K) -> Option<V> {
		let now = OffsetDateTime::now_utc();
		let mut entries = self.entries.lock();
		let entry = entries.get_mut(key)?;

		if entry.expires_at <= now {
			entries.remove(key);

			return None;
		}

		entry.expires_at = now + self.ttl;

		Some(entry.value.clone())
	}

	/// Removes `key`, returning its value.
	pub fn remove(&self, key: &K) -> Option<V> {
		self.entries.lock().remove(key).map(|entry| entry.value)
	}

	/// Drops entries that expired at or before `now`.
	pub fn check_expirations(&self, now: OffsetDateTime) -> usize {
		let mut entries = self.entries.lock();
		let before = entries.len();

		entries.retain(|_, entry| entry.expires_at > now);

		before - entries.len()
	}

	/// Number of stored entries, expired or not.
	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	/// Returns true when the map holds nothing.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
impl<K, V> Debug for ExpiringMap<K, V> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ExpiringMap")
			.field("ttl", &self.ttl)
			.field("entries", &self.entries.lock().len())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn reads_extend_expiry() {
		let map = ExpiringMap::new(Duration::seconds(10));

		map.insert("leaf", 1);

		let later = OffsetDateTime::now_utc() + Duration::seconds(5);

		assert_eq!(map.get(&"leaf"), Some(1));
		assert_eq!(map.check_expirations(later), 0);
		assert_eq!(map.check_expirations(later + Duration::seconds(10)), 1);
		assert!(map.is_empty());
	}

	#[test]
	fn expired_entries_are_not_served() {
		let map = ExpiringMap::new(Duration::ZERO);

		map.insert("leaf", 1);

		assert_eq!(map.get(&"leaf"), None);
		assert!(map.is_empty());
	}
}
