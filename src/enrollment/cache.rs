//! Enrollment group cache indexed by lead certificate name.

// crates.io
use tokio_stream::StreamExt;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
// self
use crate::{
	_prelude::*,
	auth::EnrollmentGroupId,
	cache::sweep_interval,
	context::RequestContext,
	enrollment::EnrollmentGroup,
	obs::{self, CacheKind, CacheOutcome},
	store::{EnrollmentGroupsQuery, Store},
	x509::Certificate,
};

struct Entry {
	group: Arc<EnrollmentGroup>,
	expires_at: OffsetDateTime,
}

#[derive(Default)]
struct Index {
	by_issuer: HashMap<String, BTreeMap<EnrollmentGroupId, Entry>>,
	by_id: HashMap<EnrollmentGroupId, String>,
}
impl Index {
	/// Returns false when the group is already indexed.
	fn insert(&mut self, group: Arc<EnrollmentGroup>, expires_at: OffsetDateTime) -> bool {
		if self.by_id.contains_key(group.id()) {
			return false;
		}

		let issuer = group.lead_certificate_name().to_owned();

		self.by_id.insert(group.id().clone(), issuer.clone());
		self.by_issuer
			.entry(issuer)
			.or_default()
			.insert(group.id().clone(), Entry { group, expires_at });

		true
	}

	fn remove(&mut self, id: &EnrollmentGroupId) -> bool {
		let Some(issuer) = self.by_id.remove(id) else {
			return false;
		};

		if let Some(groups) = self.by_issuer.get_mut(&issuer) {
			groups.remove(id);

			if groups.is_empty() {
				self.by_issuer.remove(&issuer);
			}
		}

		true
	}

	fn touch(&mut self, issuer: &str, expires_at: OffsetDateTime) -> Vec<Arc<EnrollmentGroup>> {
		let Some(groups) = self.by_issuer.get_mut(issuer) else {
			return Vec::new();
		};

		groups
			.values_mut()
			.map(|entry| {
				entry.expires_at = expires_at;

				entry.group.clone()
			})
			.collect()
	}

	fn check_expirations(&mut self, now: OffsetDateTime) -> usize {
		let expired = self
			.by_issuer
			.values()
			.flat_map(|groups| groups.iter())
			.filter(|(_, entry)| entry.expires_at <= now)
			.map(|(id, _)| id.clone())
			.collect::<Vec<_>>();

		for id in &expired {
			self.remove(id);
		}

		expired.len()
	}
}

struct Shared {
	store: Arc<dyn Store>,
	ttl: Duration,
	index: Mutex<Index>,
}
impl Shared {
	fn remove_by_id(&self, id: &EnrollmentGroupId) -> bool {
		let removed = self.index.lock().remove(id);

		if removed {
			obs::record_cache_event(CacheKind::EnrollmentGroup, CacheOutcome::Evicted);
			tracing::debug!(enrollment_group = %id, "Evicted enrollment group.");
		}

		removed
	}

	fn check_expirations(&self, now: OffsetDateTime) -> usize {
		let removed = self.index.lock().check_expirations(now);

		for _ in 0..removed {
			obs::record_cache_event(CacheKind::EnrollmentGroup, CacheOutcome::Evicted);
		}

		removed
	}
}

/// Enrollment groups by issuer common name, loaded from the store on demand.
///
/// Entries expire when they are not read for one TTL; a background sweep runs every half TTL.
/// A store watch evicts changed groups immediately.
pub struct EnrollmentGroupsCache {
	shared: Arc<Shared>,
	cancel: CancellationToken,
	tasks: TaskTracker,
}
impl EnrollmentGroupsCache {
	/// Creates the cache and spawns its watch and sweep tasks on the current Tokio runtime.
	pub fn new(store: Arc<dyn Store>, ttl: Duration) -> Self {
		let shared = Arc::new(Shared { store, ttl, index: Mutex::new(Index::default()) });
		let cancel = CancellationToken::new();
		let tasks = TaskTracker::new();

		tasks.spawn(watch(shared.clone(), cancel.clone()));
		tasks.spawn({
			let shared = shared.clone();
			let cancel = cancel.clone();

			async move {
				let mut ticker = sweep_interval(shared.ttl / 2);

				loop {
					tokio::select! {
						_ = cancel.cancelled() => break,
						_ = ticker.tick() => {
							shared.check_expirations(OffsetDateTime::now_utc());
						},
					}
				}
			}
		});
		tasks.close();

		Self { shared, cancel, tasks }
	}

	/// Feeds every group indexed under one of `issuer_names` to `on_group` until it returns false.
	///
	/// Cached groups are offered first and have their expiry refreshed. When none of them
	/// satisfied the callback, groups not yet cached are loaded from the store and offered too;
	/// groups whose attestation chain does not parse are skipped.
	pub async fn get_enrollment_groups_by_issuer_names(
		&self,
		ctx: &RequestContext,
		issuer_names: &[String],
		mut on_group: impl FnMut(&Arc<EnrollmentGroup>) -> bool,
	) -> Result<()> {
		let cached = {
			let expires_at = OffsetDateTime::now_utc() + self.shared.ttl;
			let mut index = self.shared.index.lock();

			issuer_names.iter().flat_map(|name| index.touch(name, expires_at)).collect::<Vec<_>>()
		};

		if !cached.is_empty() {
			obs::record_cache_event(CacheKind::EnrollmentGroup, CacheOutcome::Hit);
		}
		for group in &cached {
			if !on_group(group) {
				return Ok(());
			}
		}

		obs::record_cache_event(CacheKind::EnrollmentGroup, CacheOutcome::Miss);

		let query = EnrollmentGroupsQuery {
			attestation_certificate_names: issuer_names.to_vec(),
			..Default::default()
		};
		let documents = ctx
			.run("enrollment group load", async {
				self.shared.store.load_enrollment_groups(&query).await.map_err(Error::from)
			})
			.await?;

		for document in documents {
			let id = document.id.clone();
			let group = match EnrollmentGroup::new(document) {
				Ok(group) => Arc::new(group),
				Err(err) => {
					tracing::error!(
						enrollment_group = %id,
						error = %err,
						"Cannot parse the attestation certificate chain of the enrollment group."
					);

					continue;
				},
			};
			let inserted = self
				.shared
				.index
				.lock()
				.insert(group.clone(), OffsetDateTime::now_utc() + self.shared.ttl);

			if inserted && !on_group(&group) {
				break;
			}
		}

		Ok(())
	}

	/// Finds the group whose lead attestation certificate issued a certificate of `chains`.
	///
	/// Chains are walked in order and, within a chain, from the leaf up.
	pub async fn get_enrollment_group(
		&self,
		ctx: &RequestContext,
		chains: &[Vec<Certificate>],
	) -> Result<Option<Arc<EnrollmentGroup>>> {
		for cert in chains.iter().flatten() {
			let mut found = None;

			self.get_enrollment_groups_by_issuer_names(
				ctx,
				&[cert.issuer_common_name().to_owned()],
				|group| {
					if group.issued(cert) {
						found = Some(group.clone());

						return false;
					}

					true
				},
			)
			.await?;

			if found.is_some() {
				return Ok(found);
			}
		}

		Ok(None)
	}

	/// Evicts one group; returns true when it was cached.
	pub fn remove_by_id(&self, id: &EnrollmentGroupId) -> bool {
		self.shared.remove_by_id(id)
	}

	/// Evicts groups not read since `now - ttl`; returns how many were removed.
	pub fn check_expirations(&self, now: OffsetDateTime) -> usize {
		self.shared.check_expirations(now)
	}

	/// Returns true when the group is cached.
	pub fn contains(&self, id: &EnrollmentGroupId) -> bool {
		self.shared.index.lock().by_id.contains_key(id)
	}

	/// Number of cached groups.
	pub fn len(&self) -> usize {
		self.shared.index.lock().by_id.len()
	}

	/// Returns true when nothing is cached.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Stops the background tasks and waits for them to exit.
	pub async fn close(&self) {
		self.cancel.cancel();
		self.tasks.wait().await;
	}
}
impl Debug for EnrollmentGroupsCache {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("EnrollmentGroupsCache")
			.field("ttl", &self.shared.ttl)
			.field("groups", &self.len())
			.finish_non_exhaustive()
	}
}
impl Drop for EnrollmentGroupsCache {
	fn drop(&mut self) {
		self.cancel.cancel();
	}
}

async fn watch(shared: Arc<Shared>, cancel: CancellationToken) {
	let mut events = match shared.store.watch_enrollment_groups().await {
		Ok(events) => events,
		Err(err) => {
			tracing::warn!(error = %err, "Cannot watch enrollment group changes.");

			return;
		},
	};

	loop {
		tokio::select! {
			_ = cancel.cancelled() => return,
			event = events.next() => match event {
				Some(Ok(id)) => {
					shared.remove_by_id(&id);
				},
				Some(Err(err)) => {
					tracing::warn!(error = %err, "Enrollment group watch ended with an error.");

					return;
				},
				None => return,
			},
		}
	}
}
