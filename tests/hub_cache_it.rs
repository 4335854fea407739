mod common;

// std
use std::{
	collections::BTreeMap,
	sync::{Arc, atomic::Ordering},
};
// crates.io
use httpmock::prelude::*;
use time::{Duration, OffsetDateTime};
// self
use common::*;
use device_provisioning::{
	auth::{HubId, RequiredClaims},
	context::RequestContext,
	enrollment::EnrollmentGroup,
	error::Error,
	hub::{LinkedHubCache, LinkedHubSettings},
	model::Hub,
	store::{MemoryStore, Store},
};

struct HubFixture {
	server: MockServer,
	store: MemoryStore,
	connector: Arc<FakeConnector>,
	cache: LinkedHubCache,
	manufacturer: Authority,
}
impl HubFixture {
	async fn start(expiration: Duration) -> Self {
		let server = MockServer::start_async().await;

		mock_provider(&server, owner_claims(OWNER)).await;

		let store = MemoryStore::new();

		for id in ["hub-1", "hub-2"] {
			store.upsert_hub(hub(id, &server)).await.expect("Hub should be stored.");
		}

		let connector = Arc::new(FakeConnector::new(Arc::new(Authority::new("Hub CA"))));
		let cache =
			LinkedHubCache::new(Arc::new(store.clone()), connector.clone(), LinkedHubSettings {
				http: test_http_client(),
				token_cleanup_interval: Duration::minutes(1),
				expiration,
			});

		Self { server, store, connector, cache, manufacturer: Authority::new(MANUFACTURER_CA) }
	}

	fn group(&self, hub_ids: &[&str]) -> EnrollmentGroup {
		let hubs = hub_ids.iter().map(|id| hub(id, &self.server)).collect::<Vec<Hub>>();
		let (mut document, _) = group_config(&self.manufacturer, hubs).to_documents();

		document.validate().expect("Group document should validate.");

		EnrollmentGroup::new(document).expect("Group chain should parse.")
	}
}

fn ctx() -> RequestContext {
	RequestContext::with_timeout(Duration::seconds(10))
}

#[tokio::test]
async fn concurrent_lookups_connect_once() {
	let fixture = HubFixture::start(Duration::minutes(10)).await;
	let group = fixture.group(&["hub-1", "hub-2"]);
	let ctx = ctx();
	let (a, b, c) = tokio::join!(
		fixture.cache.get_hubs(&ctx, &group),
		fixture.cache.get_hubs(&ctx, &group),
		fixture.cache.get_hubs(&ctx, &group),
	);
	let a = a.expect("First lookup should succeed.");
	let b = b.expect("Second lookup should succeed.");
	let c = c.expect("Third lookup should succeed.");

	assert_eq!(a.len(), 2);
	assert_eq!(a[0].id().as_ref(), "hub-1");
	assert_eq!(a[1].id().as_ref(), "hub-2");
	assert!(Arc::ptr_eq(&a, &b));
	assert!(Arc::ptr_eq(&a, &c));
	assert_eq!(fixture.connector.connects.load(Ordering::SeqCst), 2);
	assert_eq!(fixture.cache.len(), 1);

	fixture.cache.close().await;

	assert!(fixture.connector.signer.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn missing_hubs_are_skipped_while_one_remains() {
	let fixture = HubFixture::start(Duration::minutes(10)).await;
	let group = fixture.group(&["hub-1", "hub-3"]);
	let hubs = fixture.cache.get_hubs(&ctx(), &group).await.expect("One usable hub is enough.");

	assert_eq!(hubs.len(), 1);
	assert_eq!(hubs[0].hub_id().as_ref(), "hub-1");

	fixture.cache.close().await;
}

#[tokio::test]
async fn groups_without_any_hub_fail() {
	let fixture = HubFixture::start(Duration::minutes(10)).await;

	fixture.store.delete_hub(&HubId::new("hub-2").expect("Hub ID should be valid."));

	let group = fixture.group(&["hub-2"]);
	let err = fixture
		.cache
		.get_hubs(&ctx(), &group)
		.await
		.expect_err("Group without stored hubs should fail.");

	assert!(matches!(
		err,
		Error::LinkedHub { ref message }
			if message.contains("cannot find any hub with ids [\"hub-2\"]")
				&& message.contains("not found")
	));

	fixture.cache.close().await;
}

#[tokio::test]
async fn groups_reference_hubs_by_external_id() {
	let fixture = HubFixture::start(Duration::minutes(10)).await;
	let mut external = hub("doc-1", &fixture.server);

	external.hub_id = Some(HubId::new("ext-1").expect("Hub ID should be valid."));
	fixture.store.upsert_hub(external.clone()).await.expect("Hub should be stored.");

	let (mut document, _) =
		group_config(&fixture.manufacturer, vec![external.clone()]).to_documents();

	assert_eq!(document.hub_ids, vec![HubId::new("ext-1").expect("Hub ID should be valid.")]);

	document.validate().expect("Group document should validate.");

	let group = EnrollmentGroup::new(document).expect("Group chain should parse.");
	let hubs = fixture.cache.get_hubs(&ctx(), &group).await.expect("Lookup should work.");

	assert_eq!(hubs.len(), 1);
	assert_eq!(hubs[0].id().as_ref(), "doc-1");
	assert_eq!(hubs[0].hub_id().as_ref(), "ext-1");

	fixture.store.upsert_hub(external).await.expect("Hub should update.");

	for _ in 0..100 {
		if hubs[0].is_invalid() {
			break;
		}

		tokio::time::sleep(std::time::Duration::from_millis(10)).await;
	}

	assert!(hubs[0].is_invalid());

	fixture.cache.close().await;
}

#[tokio::test]
async fn hub_updates_invalidate_cached_entries() {
	let fixture = HubFixture::start(Duration::minutes(10)).await;
	let group = fixture.group(&["hub-1"]);
	let first = fixture.cache.get_hubs(&ctx(), &group).await.expect("Initial lookup should work.");

	fixture.store.upsert_hub(hub("hub-1", &fixture.server)).await.expect("Hub should update.");

	for _ in 0..100 {
		if first[0].is_invalid() {
			break;
		}

		tokio::time::sleep(std::time::Duration::from_millis(10)).await;
	}

	assert!(first[0].is_invalid());

	let second = fixture.cache.get_hubs(&ctx(), &group).await.expect("Rebuild should work.");

	assert!(!Arc::ptr_eq(&first, &second));
	assert!(second[0].is_usable(OffsetDateTime::now_utc()));
	assert_eq!(fixture.connector.connects.load(Ordering::SeqCst), 2);

	fixture.cache.close().await;
}

#[tokio::test]
async fn sweep_drops_expired_hubs() {
	let fixture = HubFixture::start(Duration::minutes(1)).await;
	let group = fixture.group(&["hub-1"]);
	let hubs = fixture.cache.get_hubs(&ctx(), &group).await.expect("Lookup should work.");

	assert_eq!(fixture.cache.sweep(OffsetDateTime::now_utc()), 0);
	assert_eq!(fixture.cache.sweep(OffsetDateTime::now_utc() + Duration::minutes(2)), 1);
	assert!(fixture.cache.is_empty());
	assert!(hubs[0].is_expired(OffsetDateTime::now_utc() + Duration::minutes(2)));
	assert!(fixture.connector.signer.closed.load(Ordering::SeqCst));

	fixture.cache.close().await;
}

#[tokio::test]
async fn hub_tokens_are_cached_per_owner() {
	let fixture = HubFixture::start(Duration::minutes(10)).await;
	let group = fixture.group(&["hub-1"]);
	let hubs = fixture.cache.get_hubs(&ctx(), &group).await.expect("Lookup should work.");
	let required = RequiredClaims::from([(OWNER_CLAIM.to_owned(), OWNER.to_owned())]);
	let first = hubs[0]
		.get_token(&ctx(), OWNER, &BTreeMap::new(), &required)
		.await
		.expect("Token with the owner claim should be issued.");
	let second = hubs[0]
		.get_token(&ctx(), OWNER, &BTreeMap::new(), &required)
		.await
		.expect("Cached token should be returned.");

	assert_eq!(first.access_token.expose(), second.access_token.expose());
	assert_eq!(hubs[0].tokens().len(), 1);
	assert_eq!(hubs[0].provider_name(), "plgd");

	fixture.cache.close().await;
}
