//! Storage contracts for enrollment groups, hubs, and provisioning records.

pub mod memory;

pub use memory::MemoryStore;

// crates.io
use tokio_stream::Stream;
// self
use crate::{
	_prelude::*,
	auth::{EnrollmentGroupId, HubId, RecordId},
	model::{EnrollmentGroup, Hub, ProvisioningRecord},
};

/// Boxed future returned by [`Store`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Stream of changed document IDs; it ends when the store stops watching.
pub type WatchStream<T> = Pin<Box<dyn Stream<Item = Result<T, StoreError>> + Send>>;

/// Persistence collaborator shared by the caches and the step handlers.
pub trait Store
where
	Self: Send + Sync,
{
	/// Loads hubs matching `query`.
	fn load_hubs<'a>(&'a self, query: &'a HubsQuery) -> StoreFuture<'a, Vec<Hub>>;

	/// Loads enrollment groups matching `query`.
	fn load_enrollment_groups<'a>(
		&'a self,
		query: &'a EnrollmentGroupsQuery,
	) -> StoreFuture<'a, Vec<EnrollmentGroup>>;

	/// Loads provisioning records matching `query`.
	fn load_provisioning_records<'a>(
		&'a self,
		query: &'a ProvisioningRecordsQuery,
	) -> StoreFuture<'a, Vec<ProvisioningRecord>>;

	/// Streams the IDs of hubs created, updated, or deleted from now on.
	fn watch_hubs(&self) -> StoreFuture<'_, WatchStream<HubId>>;

	/// Streams the IDs of enrollment groups created, updated, or deleted from now on.
	fn watch_enrollment_groups(&self) -> StoreFuture<'_, WatchStream<EnrollmentGroupId>>;

	/// Merges a partial record into the stored one, creating it when missing.
	fn update_provisioning_record(&self, record: ProvisioningRecord) -> StoreFuture<'_, ()>;

	/// Creates or replaces an enrollment group.
	fn upsert_enrollment_group(&self, group: EnrollmentGroup) -> StoreFuture<'_, ()>;

	/// Creates or replaces a hub.
	fn upsert_hub(&self, hub: Hub) -> StoreFuture<'_, ()>;
}

/// Hub filter; empty fields match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HubsQuery {
	/// Required owner.
	pub owner: Option<String>,
	/// Accepted external hub IDs, compared with [`Hub::hub_id`].
	pub hub_ids: Vec<HubId>,
}
impl HubsQuery {
	/// Matches `hub` against the filter.
	pub fn matches(&self, hub: &Hub) -> bool {
		self.owner.as_ref().is_none_or(|owner| *owner == hub.owner)
			&& (self.hub_ids.is_empty() || self.hub_ids.contains(hub.hub_id()))
	}
}

/// Enrollment group filter; empty fields match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnrollmentGroupsQuery {
	/// Required owner.
	pub owner: Option<String>,
	/// Accepted IDs.
	pub ids: Vec<EnrollmentGroupId>,
	/// Accepted lead certificate names.
	pub attestation_certificate_names: Vec<String>,
}
impl EnrollmentGroupsQuery {
	/// Matches `group` against the filter.
	pub fn matches(&self, group: &EnrollmentGroup) -> bool {
		self.owner.as_ref().is_none_or(|owner| *owner == group.owner)
			&& (self.ids.is_empty() || self.ids.contains(&group.id))
			&& (self.attestation_certificate_names.is_empty()
				|| self
					.attestation_certificate_names
					.contains(&group.attestation.lead_certificate_name))
	}
}

/// Provisioning record filter; empty fields match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProvisioningRecordsQuery {
	/// Required owner.
	pub owner: Option<String>,
	/// Accepted record IDs.
	pub ids: Vec<RecordId>,
}
impl ProvisioningRecordsQuery {
	/// Matches `record` against the filter.
	pub fn matches(&self, record: &ProvisioningRecord) -> bool {
		self.owner.as_ref().is_none_or(|owner| *owner == record.owner)
			&& (self.ids.is_empty() || self.ids.contains(&record.id))
	}
}

/// Error type produced by [`Store`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
	/// Document was rejected by validation.
	#[error("Invalid document: {message}")]
	Invalid {
		/// Validation failure.
		message: String,
	},
}
