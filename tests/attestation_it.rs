mod common;

// std
use std::sync::Arc;
// crates.io
use httpmock::prelude::*;
use time::Duration;
// self
use common::*;
use device_provisioning::{
	attestation::{AttestationError, AuthHandler, DefaultAuthHandler, leaf_hash},
	enrollment::EnrollmentGroupsCache,
	error::Error,
	store::{MemoryStore, Store},
};

async fn handler(expired_certificate_enabled: bool) -> (Arc<Authority>, DefaultAuthHandler) {
	let server = MockServer::start_async().await;
	let manufacturer = Arc::new(Authority::new(MANUFACTURER_CA));
	let mut config = group_config(&manufacturer, vec![hub("hub-1", &server)]);

	config.attestation.expired_certificate_enabled = expired_certificate_enabled;

	let (group, _) = config.to_documents();
	let store = MemoryStore::new();

	store.upsert_enrollment_group(group).await.expect("Group should be stored.");

	let groups = Arc::new(EnrollmentGroupsCache::new(Arc::new(store), Duration::minutes(1)));

	(manufacturer, DefaultAuthHandler::new(groups, Duration::seconds(20)))
}

#[tokio::test]
async fn manufacturer_issued_devices_are_accepted_and_cached() {
	let (manufacturer, handler) = handler(false).await;
	let chain = manufacturer.device_chain("device-1");
	let verified =
		handler.verify_peer_certificate(&chain).await.expect("Device chain should verify.");

	assert_eq!(verified.len(), 1);
	assert_eq!(verified[0].len(), 2);
	assert_eq!(verified[0][0].subject_common_name(), "device-1");
	assert_eq!(verified[0][1], manufacturer.cert);

	let cached = handler
		.verified_chains()
		.get(&leaf_hash(&chain[0]))
		.expect("Accepted chain should be cached by its leaf.");

	assert!(Arc::ptr_eq(&cached, &verified));
}

#[tokio::test]
async fn leaf_only_chains_are_accepted() {
	let (manufacturer, handler) = handler(false).await;
	let leaf = manufacturer.issue("device-1", true, None);

	handler
		.verify_peer_certificate(&[leaf])
		.await
		.expect("Leaf signed by the group CA should verify.");
}

#[tokio::test]
async fn empty_chains_are_rejected() {
	let (_, handler) = handler(false).await;
	let err = handler.verify_peer_certificate(&[]).await.expect_err("Empty chain should fail.");

	assert!(matches!(err, Error::Attestation(AttestationError::EmptyChain)));
}

#[tokio::test]
async fn certificates_without_client_auth_are_rejected() {
	let (manufacturer, handler) = handler(false).await;
	let chain = vec![manufacturer.issue("server-1", false, None), manufacturer.der.clone()];
	let err = handler
		.verify_peer_certificate(&chain)
		.await
		.expect_err("Leaf without client authentication should fail.");

	assert!(matches!(
		err,
		Error::Attestation(AttestationError::MissingClientAuth { ref subject })
			if subject == "server-1"
	));
}

#[tokio::test]
async fn unknown_issuers_match_no_group() {
	let (_, handler) = handler(false).await;
	let other = Authority::new("Other CA");
	let err = handler
		.verify_peer_certificate(&other.device_chain("device-1"))
		.await
		.expect_err("Foreign issuer should fail.");

	assert!(matches!(
		err,
		Error::Attestation(AttestationError::NoMatchingGroup { ref issuers })
			if issuers == &["Other CA".to_owned()]
	));
}

#[tokio::test]
async fn impostor_authorities_with_the_same_name_are_untrusted() {
	let (_, handler) = handler(false).await;
	let impostor = Authority::new(MANUFACTURER_CA);
	let err = handler
		.verify_peer_certificate(&impostor.device_chain("device-1"))
		.await
		.expect_err("Chain from an impostor CA should fail.");

	assert!(matches!(err, Error::Attestation(AttestationError::Untrusted { .. })));
	assert!(handler.verified_chains().is_empty());
}

#[tokio::test]
async fn expired_certificates_need_the_group_opt_in() {
	let validity = Some((Duration::days(-10), Duration::days(-1)));
	let (manufacturer, strict) = handler(false).await;
	let chain = vec![manufacturer.issue("device-1", true, validity), manufacturer.der.clone()];
	let err = strict
		.verify_peer_certificate(&chain)
		.await
		.expect_err("Expired certificate should fail by default.");

	assert!(matches!(err, Error::Attestation(AttestationError::Untrusted { .. })));

	let (manufacturer, lenient) = handler(true).await;
	let chain = vec![manufacturer.issue("device-1", true, validity), manufacturer.der.clone()];

	lenient
		.verify_peer_certificate(&chain)
		.await
		.expect("Expired certificate should verify at its validity midpoint.");
}
