//! Shared fixtures: an `rcgen` PKI, a mocked OpenID provider, and fake collaborators.

#![allow(dead_code)]

// std
use std::sync::{
	Arc,
	atomic::{AtomicBool, AtomicUsize, Ordering},
};
// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use httpmock::prelude::*;
use rcgen::{
	BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair,
	KeyUsagePurpose,
};
use time::{Duration, OffsetDateTime};
use url::Url;
use uuid::Uuid;
// self
use device_provisioning::{
	auth::{EnrollmentGroupId, HubId, ScopeSet, TokenSecret},
	ca::{
		CertificateSigner, SignCertificateRequest, SignCertificateResponse, SignFuture,
		SignerConnector, signing_error,
	},
	coap::{Code, CoapRequest, CoapResponse, MediaType, Method},
	config::{Config, EnrollmentGroupConfig},
	context::RequestContext,
	error::Error,
	http::ReqwestHttpClient,
	hub::LinkedHub,
	model::{
		AuthorizationConfig, AuthorizationProviderConfig, CertificateAuthorityConfig, Hub,
		X509Attestation,
	},
	provider::ClientAuthMethod,
	schema::{CloudEndpoint, Csr, CredentialsRequest, ENCODING_PEM},
	service::{DefaultRequestHandler, HandlerFuture, RequestHandler, Service, Step, paths},
	session::{DeviceConnection, EndpointsFuture, Session},
	store::MemoryStore,
	x509::Certificate,
};

pub const OWNER: &str = "owner-1";
pub const OWNER_CLAIM: &str = "owner";
pub const DEVICE_ID_CLAIM: &str = "deviceId";
pub const GROUP_ID: &str = "group-1";
pub const MANUFACTURER_CA: &str = "Manufacturer CA";
pub const DEVICE_CSR_PEM: &str =
	"-----BEGIN CERTIFICATE REQUEST-----\nMIIBfake\n-----END CERTIFICATE REQUEST-----\n";

/// Device ID the fake certificate authority writes into identity certificates.
pub fn device_id() -> Uuid {
	Uuid::new_v5(&Uuid::NAMESPACE_URL, b"device-provisioning-test-device")
}

/// Self-signed certificate authority.
pub struct Authority {
	params: CertificateParams,
	key: KeyPair,
	pub der: Vec<u8>,
	pub cert: Certificate,
}
impl Authority {
	pub fn new(cn: &str) -> Self {
		let mut params = CertificateParams::default();

		params.distinguished_name.push(DnType::CommonName, cn);
		params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
		params.key_usages.push(KeyUsagePurpose::KeyCertSign);

		let key = KeyPair::generate().expect("CA key should generate.");
		let der = params.self_signed(&key).expect("CA should self-sign.").der().to_vec();
		let cert = Certificate::from_der(&der).expect("CA certificate should parse.");

		Self { params, key, der, cert }
	}

	pub fn pem(&self) -> String {
		self.cert.to_pem()
	}

	/// Issues a leaf certificate; returns its DER encoding.
	pub fn issue(
		&self,
		cn: &str,
		client_auth: bool,
		validity: Option<(Duration, Duration)>,
	) -> Vec<u8> {
		let mut params = CertificateParams::default();

		params.distinguished_name.push(DnType::CommonName, cn);

		if client_auth {
			params.extended_key_usages.push(ExtendedKeyUsagePurpose::ClientAuth);
		}
		if let Some((not_before, not_after)) = validity {
			let now = OffsetDateTime::now_utc();

			params.not_before = now + not_before;
			params.not_after = now + not_after;
		}

		let key = KeyPair::generate().expect("Leaf key should generate.");
		let issuer = Issuer::from_params(&self.params, &self.key);

		params.signed_by(&key, &issuer).expect("Leaf should be signed.").der().to_vec()
	}

	/// TLS chain of a valid device certificate: leaf, then this authority.
	pub fn device_chain(&self, cn: &str) -> Vec<Vec<u8>> {
		vec![self.issue(cn, true, None), self.der.clone()]
	}
}

/// Unsigned JWT carrying `claims`.
pub fn jwt(claims: &serde_json::Value) -> String {
	let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
	let payload = URL_SAFE_NO_PAD.encode(claims.to_string());

	format!("{header}.{payload}.signature")
}

/// Mocks OpenID discovery plus a token endpoint issuing a token with `claims`.
pub async fn mock_provider(server: &MockServer, claims: serde_json::Value) -> httpmock::Mock<'_> {
	let token_endpoint = server.url("/token");

	server
		.mock_async(|when, then| {
			when.method(GET).path("/.well-known/openid-configuration");
			then.status(200)
				.header("content-type", "application/json")
				.json_body(serde_json::json!({ "token_endpoint": token_endpoint }));
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200).header("content-type", "application/json").json_body(
				serde_json::json!({
					"access_token": jwt(&claims),
					"token_type": "bearer",
					"expires_in": 3600,
				}),
			);
		})
		.await
}

/// Claims of a token issued to the test owner and device.
pub fn owner_claims(owner: &str) -> serde_json::Value {
	serde_json::json!({ OWNER_CLAIM: owner, DEVICE_ID_CLAIM: device_id().to_string() })
}

pub fn hub(id: &str, server: &MockServer) -> Hub {
	Hub {
		id: HubId::new(id).expect("Hub ID should be valid."),
		hub_id: None,
		owner: OWNER.into(),
		gateways: vec![format!("coaps+tcp://{id}.example:5684")],
		certificate_authority: CertificateAuthorityConfig { address: format!("{id}.ca:443") },
		authorization: AuthorizationConfig {
			owner_claim: OWNER_CLAIM.into(),
			device_id_claim: DEVICE_ID_CLAIM.into(),
			provider: AuthorizationProviderConfig {
				name: "plgd".into(),
				authority: Url::parse(&server.base_url()).expect("Mock authority should parse."),
				client_id: "device-provisioning".into(),
				client_secret: Some(TokenSecret::new("secret")),
				scopes: ScopeSet::default(),
				audience: None,
				client_auth_method: ClientAuthMethod::ClientSecretPost,
			},
		},
		name: String::new(),
	}
}

pub fn group_config(manufacturer: &Authority, hubs: Vec<Hub>) -> EnrollmentGroupConfig {
	EnrollmentGroupConfig {
		id: EnrollmentGroupId::new(GROUP_ID).expect("Group ID should be valid."),
		owner: OWNER.into(),
		attestation: X509Attestation {
			certificate_chain: manufacturer.pem(),
			lead_certificate_name: String::new(),
			expired_certificate_enabled: false,
		},
		pre_shared_key: None,
		name: String::new(),
		hubs,
	}
}

pub fn test_http_client() -> ReqwestHttpClient {
	ReqwestHttpClient::new(Duration::seconds(5)).expect("Test HTTP client should build.")
}

/// Certificate authority that issues `uuid:<device id>` identity certificates.
pub struct FakeSigner {
	hub_ca: Arc<Authority>,
	pub signed: AtomicUsize,
	pub closed: AtomicBool,
	pub fail: AtomicBool,
}
impl FakeSigner {
	fn identity_pem(&self) -> String {
		let identity = self.hub_ca.issue(&format!("uuid:{}", device_id()), true, None);

		Certificate::from_der(&identity).expect("Identity certificate should parse.").to_pem()
	}
}
impl CertificateSigner for FakeSigner {
	fn sign<'a>(&'a self, _ctx: &'a RequestContext, csr_pem: &'a [u8]) -> SignFuture<'a, Vec<u8>> {
		Box::pin(async move {
			if !csr_pem.starts_with(b"-----BEGIN CERTIFICATE REQUEST-----") {
				return Err(signing_error("malformed CSR"));
			}

			Ok(self.identity_pem().into_bytes())
		})
	}

	fn sign_identity_certificate<'a>(
		&'a self,
		_ctx: &'a RequestContext,
		request: SignCertificateRequest,
	) -> SignFuture<'a, SignCertificateResponse> {
		Box::pin(async move {
			if self.fail.load(Ordering::SeqCst) {
				return Err(signing_error("authority unavailable"));
			}
			if request.access_token.expose().is_empty() {
				return Err(signing_error("missing access token"));
			}
			if !request.certificate_signing_request.starts_with(b"-----BEGIN CERTIFICATE REQUEST") {
				return Err(signing_error("malformed CSR"));
			}

			self.signed.fetch_add(1, Ordering::SeqCst);

			let certificate = format!("{}{}", self.identity_pem(), self.hub_ca.pem()).into_bytes();

			Ok(SignCertificateResponse { certificate })
		})
	}

	fn close(&self) {
		self.closed.store(true, Ordering::SeqCst);
	}
}

/// Hands every hub the same [`FakeSigner`] and counts connections.
pub struct FakeConnector {
	pub signer: Arc<FakeSigner>,
	pub connects: AtomicUsize,
}
impl FakeConnector {
	pub fn new(hub_ca: Arc<Authority>) -> Self {
		let signer = FakeSigner {
			hub_ca,
			signed: AtomicUsize::new(0),
			closed: AtomicBool::new(false),
			fail: AtomicBool::new(false),
		};

		Self { signer: Arc::new(signer), connects: AtomicUsize::new(0) }
	}
}
impl SignerConnector for FakeConnector {
	fn connect<'a>(
		&'a self,
		_ctx: &'a RequestContext,
		_hub: &'a Hub,
	) -> SignFuture<'a, Arc<dyn CertificateSigner>> {
		Box::pin(async move {
			self.connects.fetch_add(1, Ordering::SeqCst);

			let signer: Arc<dyn CertificateSigner> = self.signer.clone();

			Ok(signer)
		})
	}
}

/// Connection reporting one local endpoint, or failing the query when `fail_endpoints` is set.
#[derive(Default)]
pub struct TestConnection {
	pub endpoint_queries: AtomicUsize,
	pub fail_endpoints: AtomicBool,
}
impl DeviceConnection for TestConnection {
	fn remote_addr(&self) -> String {
		"192.0.2.10:40000".into()
	}

	fn local_endpoints<'a>(&'a self, _ctx: &'a RequestContext) -> EndpointsFuture<'a> {
		Box::pin(async move {
			self.endpoint_queries.fetch_add(1, Ordering::SeqCst);

			if self.fail_endpoints.load(Ordering::SeqCst) {
				return Err(Error::status(Code::ServiceUnavailable, "device did not answer"));
			}

			Ok(vec!["coap://192.168.1.20:5683".to_owned()])
		})
	}
}

/// Delegates to [`DefaultRequestHandler`] and counts step invocations.
#[derive(Default)]
pub struct CountingHandler {
	inner: DefaultRequestHandler,
	pub calls: AtomicUsize,
}
impl CountingHandler {
	fn count<'a>(&'a self, fut: HandlerFuture<'a>) -> HandlerFuture<'a> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		fut
	}
}
impl RequestHandler for CountingHandler {
	fn default_handler<'a>(&'a self, step: Step<'a>) -> HandlerFuture<'a> {
		self.count(self.inner.default_handler(step))
	}

	fn process_plgd_time<'a>(&'a self, step: Step<'a>) -> HandlerFuture<'a> {
		self.count(self.inner.process_plgd_time(step))
	}

	fn process_ownership<'a>(&'a self, step: Step<'a>) -> HandlerFuture<'a> {
		self.count(self.inner.process_ownership(step))
	}

	fn process_credentials<'a>(
		&'a self,
		step: Step<'a>,
		hubs: &'a [Arc<LinkedHub>],
	) -> HandlerFuture<'a> {
		self.count(self.inner.process_credentials(step, hubs))
	}

	fn process_acls<'a>(
		&'a self,
		step: Step<'a>,
		hubs: &'a [Arc<LinkedHub>],
	) -> HandlerFuture<'a> {
		self.count(self.inner.process_acls(step, hubs))
	}

	fn process_cloud_configuration<'a>(
		&'a self,
		step: Step<'a>,
		hubs: &'a [Arc<LinkedHub>],
	) -> HandlerFuture<'a> {
		self.count(self.inner.process_cloud_configuration(step, hubs))
	}
}

/// Running service with one enrollment group linked to `hub-1`.
pub struct Fixture {
	pub server: MockServer,
	pub manufacturer: Arc<Authority>,
	pub hub_ca: Arc<Authority>,
	pub store: MemoryStore,
	pub connector: Arc<FakeConnector>,
	pub service: Service,
}
impl Fixture {
	pub async fn start() -> Self {
		Self::start_with(owner_claims(OWNER), |_| {}).await
	}

	/// Starts with a provider issuing tokens with `claims` and a customized configuration.
	pub async fn start_with(
		claims: serde_json::Value,
		customize: impl FnOnce(&mut Config),
	) -> Self {
		let server = MockServer::start_async().await;

		mock_provider(&server, claims).await;

		let manufacturer = Arc::new(Authority::new(MANUFACTURER_CA));
		let hub_ca = Arc::new(Authority::new("Hub CA"));
		let mut config = Config {
			enrollment_groups: vec![group_config(&manufacturer, vec![hub("hub-1", &server)])],
			..Config::default()
		};

		customize(&mut config);

		let store = MemoryStore::new();
		let connector = Arc::new(FakeConnector::new(hub_ca.clone()));
		let service = Service::builder(config, Arc::new(store.clone()), connector.clone())
			.with_http_client(test_http_client())
			.build()
			.await
			.expect("Service should start.");

		Self { server, manufacturer, hub_ca, store, connector, service }
	}

	/// Verifies and opens a session for a fresh device certificate.
	pub async fn connect_device(&self, cn: &str) -> (Session, Vec<Vec<u8>>) {
		let chain = self.manufacturer.device_chain(cn);

		self.service
			.verify_peer_certificate(&chain)
			.await
			.expect("Manufacturer-issued device certificate should be accepted.");

		let session = self.service.open_session(Arc::new(TestConnection::default()), &chain).await;

		(session, chain)
	}
}

pub fn get(path: &str) -> CoapRequest {
	CoapRequest::new(Method::Get, path).with_token(b"tok".to_vec())
}

pub fn credentials_request(selected_gateway: CloudEndpoint) -> CoapRequest {
	let body = CredentialsRequest {
		csr: Csr { encoding: ENCODING_PEM.into(), data: DEVICE_CSR_PEM.into() },
		selected_gateway,
	};

	CoapRequest::new(Method::Post, paths::CREDENTIALS)
		.with_payload(MediaType::AppOcfCbor, &body)
		.expect("Credentials request should encode.")
}

pub fn payload<T>(response: &CoapResponse) -> T
where
	T: serde::de::DeserializeOwned,
{
	response
		.decode()
		.unwrap_or_else(|err| panic!("Response should decode: {err}; {}", response.text()))
}
