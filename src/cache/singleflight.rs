//! Keyed single-flight cache.
//!
//! Each key maps to a [`Flight`]: a cell that is pending until its leader stores the outcome
//! exactly once, after which any number of readers clone the resolved value. Callers decide
//! freshness; a stale or failed flight is replaced by a new one and the caller that replaced it
//! becomes the new leader.

// crates.io
use async_lock::OnceCell;
// self
use crate::{
	_prelude::*,
	context::RequestContext,
	obs::{self, CacheKind, CacheOutcome},
};

type ReleaseHook<V> = Arc<dyn Fn(V) + Send + Sync>;

/// One pending or resolved computation.
struct Flight<V> {
	cell: OnceCell<Result<V>>,
}
impl<V> Flight<V> {
	fn pending() -> Arc<Self> {
		Arc::new(Self { cell: OnceCell::new() })
	}

	fn resolved(&self) -> Option<&Result<V>> {
		self.cell.get()
	}
}

struct State<K, V> {
	flights: HashMap<K, Arc<Flight<V>>>,
	closed: bool,
}

enum Role<V> {
	Leader(Arc<Flight<V>>),
	Follower(Arc<Flight<V>>),
}

/// Single-flight cache keyed by `K`.
pub struct SingleFlightCache<K, V> {
	kind: CacheKind,
	state: Mutex<State<K, V>>,
	release: Option<ReleaseHook<V>>,
}
impl<K, V> SingleFlightCache<K, V>
where
	K: Clone + Eq + Hash,
	V: Clone,
{
	/// Creates an empty cache reporting metrics as `kind`.
	pub fn new(kind: CacheKind) -> Self {
		let state = Mutex::new(State { flights: HashMap::new(), closed: false });

		Self { kind, state, release: None }
	}

	/// Registers a hook that receives every resolved value dropped from the cache.
	pub fn with_release(mut self, release: impl Fn(V) + Send + Sync + 'static) -> Self {
		self.release = Some(Arc::new(release));

		self
	}

	/// Returns a fresh cached value or runs `compute` exactly once for all concurrent callers.
	///
	/// `is_fresh` receives the cached value and the caller's deadline. The context must carry a
	/// deadline; waiting on another caller's computation is bounded by it.
	pub async fn get_or_compute<Fresh, F, Fut>(
		&self,
		ctx: &RequestContext,
		key: &K,
		is_fresh: Fresh,
		compute: F,
	) -> Result<V>
	where
		Fresh: Fn(&V, OffsetDateTime) -> bool,
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<V>>,
	{
		let deadline = ctx.require_deadline()?;
		let (role, evicted) = {
			let mut state = self.state.lock();

			if state.closed {
				return Err(Error::Closed { component: "single-flight cache" });
			}

			let existing = state.flights.get(key).cloned();

			match existing.as_ref().map(|flight| (flight, flight.resolved())) {
				Some((_, Some(Ok(value)))) if is_fresh(value, deadline) => {
					obs::record_cache_event(self.kind, CacheOutcome::Hit);

					return Ok(value.clone());
				},
				Some((flight, None)) => (Role::Follower(flight.clone()), None),
				_ => {
					let flight = Flight::pending();
					let evicted = state
						.flights
						.insert(key.clone(), flight.clone())
						.and_then(|previous| {
							previous.resolved().and_then(|result| result.clone().ok())
						});

					(Role::Leader(flight), evicted)
				},
			}
		};

		if let Some(value) = evicted {
			obs::record_cache_event(self.kind, CacheOutcome::Evicted);
			self.release_value(value);
		}

		match role {
			Role::Follower(flight) => {
				obs::record_cache_event(self.kind, CacheOutcome::Hit);

				ctx.run("single-flight result", async { Ok(flight.cell.wait().await.clone()) })
					.await?
			},
			Role::Leader(flight) => {
				obs::record_cache_event(self.kind, CacheOutcome::Miss);

				let guard = LeaderGuard { cache: self, key, flight, armed: true };
				let result = ctx.run("single-flight computation", compute()).await;

				guard.resolve(result)
			},
		}
	}

	/// Drops resolved entries rejected by `keep` and every failed entry; pending ones stay.
	pub fn sweep(&self, mut keep: impl FnMut(&V) -> bool) -> usize {
		let mut released = Vec::new();
		let removed = {
			let mut state = self.state.lock();
			let before = state.flights.len();

			state.flights.retain(|_, flight| match flight.resolved() {
				None => true,
				Some(Ok(value)) if keep(value) => true,
				Some(Ok(value)) => {
					released.push(value.clone());

					false
				},
				Some(Err(_)) => false,
			});

			before - state.flights.len()
		};

		for value in released {
			obs::record_cache_event(self.kind, CacheOutcome::Evicted);
			self.release_value(value);
		}

		removed
	}

	/// Visits every successfully resolved entry.
	pub fn for_each_resolved(&self, mut visit: impl FnMut(&K, &V)) {
		let state = self.state.lock();

		for (key, flight) in &state.flights {
			if let Some(Ok(value)) = flight.resolved() {
				visit(key, value);
			}
		}
	}

	/// Removes one entry, releasing its value when resolved.
	pub fn remove(&self, key: &K) -> bool {
		let removed = self.state.lock().flights.remove(key);

		match removed {
			Some(flight) => {
				if let Some(Ok(value)) = flight.resolved() {
					self.release_value(value.clone());
				}

				true
			},
			None => false,
		}
	}

	/// Number of pending and resolved entries.
	pub fn len(&self) -> usize {
		self.state.lock().flights.len()
	}

	/// Returns true when no entry is cached.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Refuses new lookups and releases every resolved value.
	///
	/// Pending computations keep running; their results are released as soon as they resolve.
	pub fn close(&self) -> usize {
		let flights = {
			let mut state = self.state.lock();

			state.closed = true;

			state.flights.drain().map(|(_, flight)| flight).collect::<Vec<_>>()
		};
		let count = flights.len();

		for flight in flights {
			if let Some(Ok(value)) = flight.resolved() {
				self.release_value(value.clone());
			}
		}

		count
	}

	fn release_value(&self, value: V) {
		if let Some(release) = &self.release {
			release(value);
		}
	}
}
impl<K, V> Debug for SingleFlightCache<K, V> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let state = self.state.lock();

		f.debug_struct("SingleFlightCache")
			.field("kind", &self.kind)
			.field("entries", &state.flights.len())
			.field("closed", &state.closed)
			.finish()
	}
}

/// Resolves an abandoned flight so followers never wait forever.
struct LeaderGuard<'a, K, V>
where
	K: Clone + Eq + Hash,
	V: Clone,
{
	cache: &'a SingleFlightCache<K, V>,
	key: &'a K,
	flight: Arc<Flight<V>>,
	armed: bool,
}
impl<K, V> LeaderGuard<'_, K, V>
where
	K: Clone + Eq + Hash,
	V: Clone,
{
	/// Publishes the outcome.
	///
	/// An entry dropped while pending is cached again when its key is still free; if a newer
	/// flight took the key, the value goes to this caller only. After [`SingleFlightCache::close`]
	/// the value is released and the caller gets [`Error::Closed`].
	fn resolve(mut self, result: Result<V>) -> Result<V> {
		self.armed = false;

		let closed = {
			let mut state = self.cache.state.lock();
			let _ = self.flight.cell.set_blocking(result.clone());

			if !state.closed && result.is_ok() && !state.flights.contains_key(self.key) {
				state.flights.insert(self.key.clone(), self.flight.clone());
			}

			state.closed
		};

		match result {
			Ok(value) if closed => {
				self.cache.release_value(value);

				Err(Error::Closed { component: "single-flight cache" })
			},
			result => result,
		}
	}
}
impl<K, V> Drop for LeaderGuard<'_, K, V>
where
	K: Clone + Eq + Hash,
	V: Clone,
{
	fn drop(&mut self) {
		if !self.armed {
			return;
		}

		let _ = self.flight.cell.set_blocking(Err(Error::Abandoned));
		let mut state = self.cache.state.lock();

		if state.flights.get(self.key).is_some_and(|current| Arc::ptr_eq(current, &self.flight)) {
			state.flights.remove(self.key);
		}
	}
}
