//! Thread-safe in-memory [`Store`] implementation for local development and tests.

// std
use std::sync::atomic::{AtomicBool, Ordering};
// crates.io
use tokio::sync::broadcast;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};
// self
use crate::{
	_prelude::*,
	auth::{EnrollmentGroupId, HubId, RecordId},
	model::{EnrollmentGroup, Hub, ProvisioningRecord},
	store::{
		EnrollmentGroupsQuery, HubsQuery, ProvisioningRecordsQuery, Store, StoreError, StoreFuture,
		WatchStream,
	},
};

const WATCH_CAPACITY: usize = 256;

#[derive(Default)]
struct Documents {
	hubs: BTreeMap<HubId, Hub>,
	groups: BTreeMap<EnrollmentGroupId, EnrollmentGroup>,
	records: BTreeMap<RecordId, ProvisioningRecord>,
}

struct Inner {
	documents: RwLock<Documents>,
	hub_events: broadcast::Sender<HubId>,
	group_events: broadcast::Sender<EnrollmentGroupId>,
	fail_record_writes: AtomicBool,
}

/// Storage backend that keeps documents in-process and broadcasts changes to watchers.
#[derive(Clone)]
pub struct MemoryStore(Arc<Inner>);
impl MemoryStore {
	/// Creates an empty store.
	pub fn new() -> Self {
		let (hub_events, _) = broadcast::channel(WATCH_CAPACITY);
		let (group_events, _) = broadcast::channel(WATCH_CAPACITY);

		Self(Arc::new(Inner {
			documents: RwLock::new(Documents::default()),
			hub_events,
			group_events,
			fail_record_writes: AtomicBool::new(false),
		}))
	}

	/// Deletes a hub; returns true when it existed.
	pub fn delete_hub(&self, id: &HubId) -> bool {
		let removed = self.0.documents.write().hubs.remove(id).is_some();

		if removed {
			let _ = self.0.hub_events.send(id.clone());
		}

		removed
	}

	/// Deletes an enrollment group; returns true when it existed.
	pub fn delete_enrollment_group(&self, id: &EnrollmentGroupId) -> bool {
		let removed = self.0.documents.write().groups.remove(id).is_some();

		if removed {
			let _ = self.0.group_events.send(id.clone());
		}

		removed
	}

	/// Makes every provisioning record write fail until reset.
	pub fn set_fail_record_writes(&self, fail: bool) {
		self.0.fail_record_writes.store(fail, Ordering::SeqCst);
	}

	/// Number of live hub watchers.
	pub fn hub_watchers(&self) -> usize {
		self.0.hub_events.receiver_count()
	}

	/// Number of live enrollment group watchers.
	pub fn enrollment_group_watchers(&self) -> usize {
		self.0.group_events.receiver_count()
	}

	/// Snapshot of one provisioning record.
	pub fn provisioning_record(&self, id: &RecordId) -> Option<ProvisioningRecord> {
		self.0.documents.read().records.get(id).cloned()
	}

	fn upsert_hub_now(&self, mut hub: Hub) -> Result<(), StoreError> {
		hub.validate(None).map_err(|err| StoreError::Invalid { message: err.to_string() })?;

		let id = hub.id.clone();

		self.0.documents.write().hubs.insert(id.clone(), hub);

		let _ = self.0.hub_events.send(id);

		Ok(())
	}

	fn upsert_group_now(&self, mut group: EnrollmentGroup) -> Result<(), StoreError> {
		group.validate().map_err(|err| StoreError::Invalid { message: err.to_string() })?;

		let id = group.id.clone();

		self.0.documents.write().groups.insert(id.clone(), group);

		let _ = self.0.group_events.send(id);

		Ok(())
	}

	fn update_record_now(&self, record: ProvisioningRecord) -> Result<(), StoreError> {
		if self.0.fail_record_writes.load(Ordering::SeqCst) {
			return Err(StoreError::Backend { message: "record writes are disabled".into() });
		}

		let mut documents = self.0.documents.write();

		documents
			.records
			.entry(record.id.clone())
			.or_insert_with(|| ProvisioningRecord::new(record.id.clone()))
			.merge_latest(record);

		Ok(())
	}
}
impl Default for MemoryStore {
	fn default() -> Self {
		Self::new()
	}
}
impl Debug for MemoryStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let documents = self.0.documents.read();

		f.debug_struct("MemoryStore")
			.field("hubs", &documents.hubs.len())
			.field("groups", &documents.groups.len())
			.field("records", &documents.records.len())
			.finish()
	}
}
impl Store for MemoryStore {
	fn load_hubs<'a>(&'a self, query: &'a HubsQuery) -> StoreFuture<'a, Vec<Hub>> {
		let hubs = self
			.0
			.documents
			.read()
			.hubs
			.values()
			.filter(|hub| query.matches(hub))
			.cloned()
			.collect::<Vec<_>>();

		Box::pin(async move { Ok(hubs) })
	}

	fn load_enrollment_groups<'a>(
		&'a self,
		query: &'a EnrollmentGroupsQuery,
	) -> StoreFuture<'a, Vec<EnrollmentGroup>> {
		let groups: Vec<EnrollmentGroup> = self
			.0
			.documents
			.read()
			.groups
			.values()
			.filter(|group| query.matches(group))
			.cloned()
			.collect();

		Box::pin(async move { Ok(groups) })
	}

	fn load_provisioning_records<'a>(
		&'a self,
		query: &'a ProvisioningRecordsQuery,
	) -> StoreFuture<'a, Vec<ProvisioningRecord>> {
		let records: Vec<ProvisioningRecord> = self
			.0
			.documents
			.read()
			.records
			.values()
			.filter(|record| query.matches(record))
			.cloned()
			.collect();

		Box::pin(async move { Ok(records) })
	}

	fn watch_hubs(&self) -> StoreFuture<'_, WatchStream<HubId>> {
		let stream = watch(self.0.hub_events.subscribe());

		Box::pin(async move { Ok(stream) })
	}

	fn watch_enrollment_groups(&self) -> StoreFuture<'_, WatchStream<EnrollmentGroupId>> {
		let stream = watch(self.0.group_events.subscribe());

		Box::pin(async move { Ok(stream) })
	}

	fn update_provisioning_record(&self, record: ProvisioningRecord) -> StoreFuture<'_, ()> {
		Box::pin(async move { self.update_record_now(record) })
	}

	fn upsert_enrollment_group(&self, group: EnrollmentGroup) -> StoreFuture<'_, ()> {
		Box::pin(async move { self.upsert_group_now(group) })
	}

	fn upsert_hub(&self, hub: Hub) -> StoreFuture<'_, ()> {
		Box::pin(async move { self.upsert_hub_now(hub) })
	}
}

fn watch<T>(receiver: broadcast::Receiver<T>) -> WatchStream<T>
where
	T: 'static + Clone + Send,
{
	Box::pin(BroadcastStream::new(receiver).map(|event| {
		event.map_err(|err| StoreError::Backend { message: format!("watch stream {err}") })
	}))
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::model::{
		AuthorizationConfig, AuthorizationProviderConfig, CertificateAuthorityConfig,
		ProvisionStatus, PlgdTimeStatus,
	};

	fn hub(id: &str, owner: &str) -> Hub {
		Hub {
			id: HubId::new(id).expect("Hub fixture ID should be valid."),
			hub_id: None,
			owner: owner.into(),
			gateways: vec!["hub.example:5684".into()],
			certificate_authority: CertificateAuthorityConfig { address: "ca.example:443".into() },
			authorization: AuthorizationConfig {
				owner_claim: "sub".into(),
				device_id_claim: String::new(),
				provider: AuthorizationProviderConfig {
					name: "plgd".into(),
					authority: Url::parse("https://auth.example").expect("Authority should parse."),
					client_id: "client".into(),
					client_secret: None,
					scopes: Default::default(),
					audience: None,
					client_auth_method: Default::default(),
				},
			},
			name: String::new(),
		}
	}

	#[tokio::test]
	async fn upserted_hubs_are_normalized_filtered_and_watched() {
		let store = MemoryStore::new();
		let mut events = store.watch_hubs().await.expect("Watch should start.");

		store.upsert_hub(hub("hub-1", "owner-1")).await.expect("First hub should be stored.");
		store.upsert_hub(hub("hub-2", "owner-2")).await.expect("Second hub should be stored.");

		let query = HubsQuery { owner: Some("owner-1".into()), hub_ids: Vec::new() };
		let hubs = store.load_hubs(&query).await.expect("Hubs should load.");

		assert_eq!(hubs.len(), 1);
		assert_eq!(hubs[0].gateways, vec!["coaps+tcp://hub.example:5684".to_owned()]);

		let first = events.next().await.expect("Watch should yield an event.");

		assert_eq!(first.expect("Event should be delivered.").as_ref(), "hub-1");
		assert!(store.delete_hub(&HubId::new("hub-2").expect("Hub ID should be valid.")));
	}

	#[tokio::test]
	async fn hub_queries_filter_on_the_external_id() {
		let store = MemoryStore::new();
		let mut external = hub("doc-1", "owner-1");

		external.hub_id = Some(HubId::new("ext-1").expect("Hub ID should be valid."));
		store.upsert_hub(external).await.expect("Hub should be stored.");

		let by_external = HubsQuery {
			owner: None,
			hub_ids: vec![HubId::new("ext-1").expect("Hub ID should be valid.")],
		};
		let by_document = HubsQuery {
			owner: None,
			hub_ids: vec![HubId::new("doc-1").expect("Hub ID should be valid.")],
		};
		let hubs = store.load_hubs(&by_external).await.expect("Hubs should load.");

		assert_eq!(hubs.len(), 1);
		assert_eq!(hubs[0].id.as_ref(), "doc-1");
		assert!(store.load_hubs(&by_document).await.expect("Hubs should load.").is_empty());
	}

	#[tokio::test]
	async fn invalid_hubs_are_rejected() {
		let store = MemoryStore::new();
		let mut invalid = hub("hub-1", "owner-1");

		invalid.gateways.clear();

		let err = store.upsert_hub(invalid).await.expect_err("Hub without gateways should fail.");

		assert!(matches!(err, StoreError::Invalid { .. }));
	}

	#[tokio::test]
	async fn record_writes_merge_and_can_fail() {
		let store = MemoryStore::new();
		let id = RecordId::new("record-1").expect("Record ID should be valid.");
		let mut record = ProvisioningRecord::new(id.clone());

		record.plgd_time = Some(PlgdTimeStatus {
			status: ProvisionStatus {
				date: OffsetDateTime::now_utc(),
				coap_code: 69,
				error_message: String::new(),
			},
		});

		store.update_provisioning_record(record.clone()).await.expect("Record should be stored.");

		let stored = store.provisioning_record(&id).expect("Record should exist.");

		assert!(stored.plgd_time.is_some());
		assert!(stored.creation_date.is_some());

		store.set_fail_record_writes(true);

		assert!(store.update_provisioning_record(record).await.is_err());
	}
}
