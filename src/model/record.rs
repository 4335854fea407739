//! Provisioning records: the per-device audit trail of onboarding steps.

// self
use crate::{
	_prelude::*,
	auth::RecordId,
	schema::{AccessControl, Bytes, CloudEndpoint, Credential},
};

/// Outcome of one provisioning step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionStatus {
	/// When the step finished.
	#[serde(with = "time::serde::rfc3339")]
	pub date: OffsetDateTime,
	/// CoAP response code sent to the device; `0` when no response was produced.
	pub coap_code: u8,
	/// Failure text; empty on success.
	#[serde(default)]
	pub error_message: String,
}

/// Manufacturer certificate observed when the device connected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationStatus {
	/// When the device connected.
	#[serde(with = "time::serde::rfc3339")]
	pub date: OffsetDateTime,
	/// PEM of the presented chain.
	pub certificate_pem: String,
	/// Leaf common name.
	pub common_name: String,
}

/// Result of the time step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlgdTimeStatus {
	/// Step status.
	pub status: ProvisionStatus,
}

/// Result of the ownership step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipStatus {
	/// Step status.
	pub status: ProvisionStatus,
	/// Owner UUID handed to the device.
	#[serde(default)]
	pub owner: String,
}

/// Symmetric key handed to the device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreSharedKey {
	/// Subject the key is shared with.
	pub subject_id: String,
	/// Key bytes.
	pub key: Bytes,
}

/// Result of the credentials step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialStatus {
	/// Step status.
	pub status: ProvisionStatus,
	/// PEM of the issued identity chain without its root.
	#[serde(default)]
	pub identity_certificate_pem: String,
	/// Issued pre-shared key.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub pre_shared_key: Option<PreSharedKey>,
	/// Issued credentials.
	#[serde(default)]
	pub credentials: Vec<Credential>,
}

/// Result of the ACL step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclStatus {
	/// Step status.
	pub status: ProvisionStatus,
	/// Issued access control entries.
	#[serde(default)]
	pub access_control_list: Vec<AccessControl>,
}

/// Result of the cloud-configuration step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudStatus {
	/// Step status.
	pub status: ProvisionStatus,
	/// Every gateway offered to the device.
	#[serde(default)]
	pub gateways: Vec<CloudEndpoint>,
	/// Authorization provider name.
	#[serde(default)]
	pub provider_name: String,
	/// Index of the selected gateway in `gateways`; `-1` when it is not among them.
	pub selected_gateway: i32,
}

/// Durable, incrementally updated audit trail of one device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningRecord {
	/// Manufacturer certificate ID.
	pub id: RecordId,
	/// Enrollment group that accepted the device.
	#[serde(default)]
	pub enrollment_group_id: String,
	/// Owner of the enrollment group.
	#[serde(default)]
	pub owner: String,
	/// Device ID, known once credentials were issued.
	#[serde(default)]
	pub device_id: String,
	/// Earliest date observed for the record.
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub creation_date: Option<OffsetDateTime>,
	/// Endpoints the device reported on its local network.
	#[serde(default)]
	pub local_endpoints: Vec<String>,
	/// Connection attestation.
	#[serde(default)]
	pub attestation: Option<AttestationStatus>,
	/// Time step.
	#[serde(default)]
	pub plgd_time: Option<PlgdTimeStatus>,
	/// Ownership step.
	#[serde(default)]
	pub ownership: Option<OwnershipStatus>,
	/// Credentials step.
	#[serde(default)]
	pub credential: Option<CredentialStatus>,
	/// ACL step.
	#[serde(default)]
	pub acl: Option<AclStatus>,
	/// Cloud-configuration step.
	#[serde(default)]
	pub cloud: Option<CloudStatus>,
}
impl ProvisioningRecord {
	/// Creates an empty record.
	pub fn new(id: RecordId) -> Self {
		Self {
			id,
			enrollment_group_id: String::new(),
			owner: String::new(),
			device_id: String::new(),
			creation_date: None,
			local_endpoints: Vec::new(),
			attestation: None,
			plgd_time: None,
			ownership: None,
			credential: None,
			acl: None,
			cloud: None,
		}
	}

	/// Earliest date carried by the record or any of its sub-documents.
	pub fn earliest_date(&self) -> Option<OffsetDateTime> {
		[
			self.creation_date,
			self.attestation.as_ref().map(|a| a.date),
			self.plgd_time.as_ref().map(|s| s.status.date),
			self.ownership.as_ref().map(|s| s.status.date),
			self.credential.as_ref().map(|s| s.status.date),
			self.acl.as_ref().map(|s| s.status.date),
			self.cloud.as_ref().map(|s| s.status.date),
		]
		.into_iter()
		.flatten()
		.min()
	}

	/// Folds `latest` into `self`.
	///
	/// Sub-documents are replaced only by strictly newer ones; blank identity fields are filled;
	/// the creation date keeps the earliest value.
	pub fn merge_latest(&mut self, latest: Self) {
		fill_blank(&mut self.owner, latest.owner);
		fill_blank(&mut self.enrollment_group_id, latest.enrollment_group_id);
		fill_blank(&mut self.device_id, latest.device_id);

		if self.local_endpoints.is_empty() {
			self.local_endpoints = latest.local_endpoints;
		}

		replace_if_newer(&mut self.attestation, latest.attestation, |a| a.date);
		replace_if_newer(&mut self.plgd_time, latest.plgd_time, |s| s.status.date);
		replace_if_newer(&mut self.ownership, latest.ownership, |s| s.status.date);
		replace_if_newer(&mut self.credential, latest.credential, |s| s.status.date);
		replace_if_newer(&mut self.acl, latest.acl, |s| s.status.date);
		replace_if_newer(&mut self.cloud, latest.cloud, |s| s.status.date);

		self.creation_date = [self.creation_date, latest.creation_date, self.earliest_date()]
			.into_iter()
			.flatten()
			.min();
	}
}

fn fill_blank(field: &mut String, value: String) {
	if field.is_empty() {
		*field = value;
	}
}

fn replace_if_newer<T>(
	current: &mut Option<T>,
	latest: Option<T>,
	date: impl Fn(&T) -> OffsetDateTime,
) {
	let Some(latest) = latest else { return };

	if current.as_ref().is_none_or(|current| date(&latest) > date(current)) {
		*current = Some(latest);
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn status(date: OffsetDateTime, coap_code: u8) -> ProvisionStatus {
		ProvisionStatus { date, coap_code, error_message: String::new() }
	}

	fn record() -> ProvisioningRecord {
		let id = RecordId::new("record-1").expect("Record fixture ID should be valid.");

		ProvisioningRecord::new(id)
	}

	#[test]
	fn newer_sub_documents_replace_older_ones() {
		let early = OffsetDateTime::UNIX_EPOCH + Duration::hours(1);
		let late = early + Duration::minutes(5);
		let mut stored = record();

		stored.ownership = Some(OwnershipStatus { status: status(late, 69), owner: "new".into() });

		let mut stale = record();

		stale.ownership = Some(OwnershipStatus { status: status(early, 160), owner: "old".into() });
		stale.acl = Some(AclStatus { status: status(early, 69), access_control_list: Vec::new() });
		stored.merge_latest(stale);

		assert_eq!(stored.ownership.as_ref().map(|o| o.owner.as_str()), Some("new"));
		assert!(stored.acl.is_some());
		assert_eq!(stored.creation_date, Some(early));
	}

	#[test]
	fn identity_fields_fill_blanks_only() {
		let mut stored = record();

		stored.owner = "owner-1".into();

		let mut update = record();

		update.owner = "owner-2".into();
		update.device_id = "device-1".into();
		update.local_endpoints = vec!["coap://10.0.0.2:5683".into()];
		stored.merge_latest(update);

		assert_eq!(stored.owner, "owner-1");
		assert_eq!(stored.device_id, "device-1");
		assert_eq!(stored.local_endpoints.len(), 1);
	}
}
