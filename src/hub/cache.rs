//! Linked hubs per enrollment group, resolved once and shared by concurrent requests.

// crates.io
use tokio_stream::StreamExt;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
// self
use crate::{
	_prelude::*,
	auth::{EnrollmentGroupId, HubId},
	ca::SignerConnector,
	cache::{SingleFlightCache, sweep_interval},
	context::RequestContext,
	enrollment::EnrollmentGroup,
	http::ReqwestHttpClient,
	hub::LinkedHub,
	obs::CacheKind,
	store::{HubsQuery, Store},
};

/// Hubs linked to one enrollment group, in the group's hub order.
pub type LinkedHubs = Arc<[Arc<LinkedHub>]>;

/// Settings shared by every linked hub the cache builds.
#[derive(Clone, Debug)]
pub struct LinkedHubSettings {
	/// Transport used for OpenID discovery and token exchanges.
	pub http: ReqwestHttpClient,
	/// Token cache sweep period.
	pub token_cleanup_interval: Duration,
	/// Time a hub stays cached without being read.
	pub expiration: Duration,
}

struct Shared {
	store: Arc<dyn Store>,
	connector: Arc<dyn SignerConnector>,
	settings: LinkedHubSettings,
	hubs: SingleFlightCache<EnrollmentGroupId, LinkedHubs>,
}
impl Shared {
	async fn load(&self, ctx: &RequestContext, group: &EnrollmentGroup) -> Result<LinkedHubs> {
		let query =
			HubsQuery { owner: Some(group.owner().to_owned()), hub_ids: group.hub_ids().to_vec() };
		let documents = ctx
			.run("hub load", async { self.store.load_hubs(&query).await.map_err(Error::from) })
			.await?;
		let mut hubs = Vec::with_capacity(group.hub_ids().len());
		let mut errors = Vec::new();

		for id in group.hub_ids() {
			let Some(mut document) = documents.iter().find(|hub| hub.hub_id() == id).cloned() else {
				errors.push(format!("cannot create linked hub(hubId: {id}): not found"));

				continue;
			};

			if let Err(err) = document.validate(Some(group.owner())) {
				errors.push(format!("cannot create linked hub(hubId: {id}): {err}"));

				continue;
			}

			match LinkedHub::connect(
				ctx,
				document,
				self.connector.as_ref(),
				self.settings.http.clone(),
				self.settings.token_cleanup_interval,
				self.settings.expiration,
			)
			.await
			{
				Ok(hub) => hubs.push(Arc::new(hub)),
				Err(err) => errors.push(format!("cannot create linked hub(hubId: {id}): {err}")),
			}
		}

		if hubs.is_empty() {
			let ids = group.hub_ids().iter().map(ToString::to_string).collect::<Vec<_>>();

			return Err(Error::LinkedHub {
				message: format!("cannot find any hub with ids {ids:?}: {}", errors.join("; ")),
			});
		}
		if !errors.is_empty() {
			tracing::debug!(
				enrollment_group = %group.id(),
				errors = %errors.join("; "),
				"Some linked hubs were skipped."
			);
		}

		Ok(hubs.into())
	}

	fn invalidate(&self, id: &HubId) -> usize {
		let mut invalidated = 0;

		self.hubs.for_each_resolved(|_, hubs| {
			for hub in hubs.iter().filter(|hub| hub.id() == id) {
				hub.invalidate();

				invalidated += 1;
			}
		});

		invalidated
	}

	fn sweep(&self, now: OffsetDateTime) -> usize {
		self.hubs.sweep(|hubs| hubs.iter().all(|hub| hub.is_usable(now)))
	}
}

/// Single-flight cache of [`LinkedHubs`] keyed by enrollment group ID.
///
/// Entries refresh on every read. A store watch marks changed hubs invalid; invalid or expired
/// entries are rebuilt on the next read and closed by the sweep that runs every expiration.
pub struct LinkedHubCache {
	shared: Arc<Shared>,
	cancel: CancellationToken,
	tasks: TaskTracker,
}
impl LinkedHubCache {
	/// Creates the cache and spawns its watch and sweep tasks on the current Tokio runtime.
	pub fn new(
		store: Arc<dyn Store>,
		connector: Arc<dyn SignerConnector>,
		settings: LinkedHubSettings,
	) -> Self {
		let hubs = SingleFlightCache::new(CacheKind::LinkedHub).with_release(|hubs: LinkedHubs| {
			for hub in hubs.iter() {
				hub.shutdown();
			}
		});
		let shared = Arc::new(Shared { store, connector, settings, hubs });
		let cancel = CancellationToken::new();
		let tasks = TaskTracker::new();

		tasks.spawn(watch(shared.clone(), cancel.clone()));
		tasks.spawn({
			let shared = shared.clone();
			let cancel = cancel.clone();

			async move {
				let mut ticker = sweep_interval(shared.settings.expiration);

				loop {
					tokio::select! {
						_ = cancel.cancelled() => break,
						_ = ticker.tick() => {
							shared.sweep(OffsetDateTime::now_utc());
						},
					}
				}
			}
		});
		tasks.close();

		Self { shared, cancel, tasks }
	}

	/// Returns the usable hubs linked to `group`, building them on a miss.
	///
	/// Hubs that cannot be built are skipped; at least one must succeed.
	pub async fn get_hubs(
		&self,
		ctx: &RequestContext,
		group: &EnrollmentGroup,
	) -> Result<LinkedHubs> {
		let hubs = self
			.shared
			.hubs
			.get_or_compute(
				ctx,
				group.id(),
				|hubs, _| {
					let now = OffsetDateTime::now_utc();

					hubs.iter().all(|hub| hub.is_usable(now))
				},
				|| self.shared.load(ctx, group),
			)
			.await?;
		let now = OffsetDateTime::now_utc();

		for hub in hubs.iter() {
			hub.refresh(now);
		}

		Ok(hubs)
	}

	/// Marks every cached hub with document ID `id` invalid; returns how many were marked.
	pub fn invalidate(&self, id: &HubId) -> usize {
		self.shared.invalidate(id)
	}

	/// Closes and drops entries holding an invalid or expired hub; returns how many were removed.
	pub fn sweep(&self, now: OffsetDateTime) -> usize {
		self.shared.sweep(now)
	}

	/// Number of cached enrollment groups.
	pub fn len(&self) -> usize {
		self.shared.hubs.len()
	}

	/// Returns true when nothing is cached.
	pub fn is_empty(&self) -> bool {
		self.shared.hubs.is_empty()
	}

	/// Stops the background tasks, then closes every cached hub.
	pub async fn close(&self) {
		self.cancel.cancel();
		self.tasks.wait().await;
		self.shared.hubs.close();
	}
}
impl Debug for LinkedHubCache {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("LinkedHubCache")
			.field("settings", &self.shared.settings)
			.field("hubs", &self.shared.hubs)
			.finish_non_exhaustive()
	}
}
impl Drop for LinkedHubCache {
	fn drop(&mut self) {
		self.cancel.cancel();
	}
}

async fn watch(shared: Arc<Shared>, cancel: CancellationToken) {
	let mut events = match shared.store.watch_hubs().await {
		Ok(events) => events,
		Err(err) => {
			tracing::warn!(error = %err, "Cannot watch hub changes.");

			return;
		},
	};

	loop {
		tokio::select! {
			_ = cancel.cancelled() => return,
			event = events.next() => match event {
				Some(Ok(id)) => {
					let invalidated = shared.invalidate(&id);

					if invalidated > 0 {
						tracing::debug!(hub = %id, invalidated, "Invalidated linked hub.");
					}
				},
				Some(Err(err)) => {
					tracing::warn!(error = %err, "Hub watch ended with an error.");

					return;
				},
				None => return,
			},
		}
	}
}
