//! Enrollment groups resolved for attestation: the stored document plus its parsed chain.

pub mod cache;

pub use cache::EnrollmentGroupsCache;

// self
use crate::{
	_prelude::*,
	auth::{EnrollmentGroupId, HubId},
	model,
	x509::{Certificate, CertificateError},
};

/// Enrollment group with its attestation chain parsed once.
#[derive(Clone, Debug)]
pub struct EnrollmentGroup {
	document: model::EnrollmentGroup,
	attestation_chain: Arc<[Certificate]>,
}
impl EnrollmentGroup {
	/// Parses the attestation chain of `document`.
	pub fn new(document: model::EnrollmentGroup) -> Result<Self, CertificateError> {
		let attestation_chain = document.attestation.parse_chain()?.into();

		Ok(Self { document, attestation_chain })
	}

	/// Stored document.
	pub fn document(&self) -> &model::EnrollmentGroup {
		&self.document
	}

	/// Group ID.
	pub fn id(&self) -> &EnrollmentGroupId {
		&self.document.id
	}

	/// Group owner.
	pub fn owner(&self) -> &str {
		&self.document.owner
	}

	/// External IDs of the linked hubs.
	pub fn hub_ids(&self) -> &[HubId] {
		&self.document.hub_ids
	}

	/// Issuer common name the group is indexed by.
	pub fn lead_certificate_name(&self) -> &str {
		&self.document.attestation.lead_certificate_name
	}

	/// Returns true when device certificates are verified at the midpoint of their validity.
	pub fn expired_certificate_enabled(&self) -> bool {
		self.document.attestation.expired_certificate_enabled
	}

	/// Parsed attestation chain; the first certificate signs device certificates.
	pub fn attestation_chain(&self) -> &[Certificate] {
		&self.attestation_chain
	}

	/// Returns true when the first attestation certificate issued `cert`.
	pub fn issued(&self, cert: &Certificate) -> bool {
		self.attestation_chain.first().is_some_and(|lead| cert.is_signed_by(lead))
	}

	/// Pre-shared key bytes, when configured.
	pub fn pre_shared_key(&self) -> Option<[u8; 16]> {
		self.document.pre_shared_key_bytes()
	}
}
