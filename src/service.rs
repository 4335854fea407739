//! Provisioning service facade.
//!
//! The [`Service`] owns the caches, the attestation handler, and the step handlers. Transports
//! call [`Service::verify_peer_certificate`] during the TLS handshake, open one [`Session`] per
//! connection with [`Service::open_session`], and hand every decoded request to
//! [`Service::handle`].

pub mod handler;

pub use handler::*;

// crates.io
use tokio_util::{sync::CancellationToken, task::TaskTracker};
// self
use crate::{
	_prelude::*,
	attestation::{AuthHandler, DefaultAuthHandler, VerifiedChains, leaf_hash},
	ca::SignerConnector,
	cache::sweep_interval,
	coap::{Code, CoapRequest, CoapResponse},
	config::Config,
	context::RequestContext,
	enrollment::EnrollmentGroupsCache,
	http::ReqwestHttpClient,
	hub::{LinkedHubCache, LinkedHubSettings, LinkedHubs},
	obs::{self, StepKind, StepOutcome, StepSpan},
	session::{DeviceConnection, Session},
	store::Store,
};

/// Request paths served by the engine.
pub mod paths {
	/// Device time synchronization.
	pub const PLGD_TIME: &str = "/x.plgd.dev/time";
	/// Ownership transfer.
	pub const OWNERSHIP: &str = "/api/v1/provisioning/ownership";
	/// Credential issuance.
	pub const CREDENTIALS: &str = "/api/v1/provisioning/credentials";
	/// Access control list installation.
	pub const ACLS: &str = "/api/v1/provisioning/acls";
	/// Cloud configuration hand-off.
	pub const CLOUD_CONFIGURATION: &str = "/api/v1/provisioning/cloud-configuration";
}

/// Builds the attestation handler from the group cache and the inactivity timeout.
pub type AuthHandlerFactory =
	Box<dyn FnOnce(Arc<EnrollmentGroupsCache>, Duration) -> Arc<dyn AuthHandler> + Send>;

/// Response to send and whether the transport must close the connection afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dispatch {
	/// Response answering the request.
	pub response: CoapResponse,
	/// Set when the request failed; the device reconnects to retry.
	pub close_connection: bool,
}

/// Configures and starts a [`Service`].
pub struct ServiceBuilder {
	config: Config,
	store: Arc<dyn Store>,
	connector: Arc<dyn SignerConnector>,
	http: Option<ReqwestHttpClient>,
	auth_handler: Option<AuthHandlerFactory>,
	request_handler: Arc<dyn RequestHandler>,
}
impl ServiceBuilder {
	/// Reuses `http` for OpenID discovery and token exchanges.
	pub fn with_http_client(mut self, http: ReqwestHttpClient) -> Self {
		self.http = Some(http);

		self
	}

	/// Replaces the attestation handler.
	pub fn with_auth_handler(
		mut self,
		factory: impl 'static
			+ Send
			+ FnOnce(Arc<EnrollmentGroupsCache>, Duration) -> Arc<dyn AuthHandler>,
	) -> Self {
		self.auth_handler = Some(Box::new(factory));

		self
	}

	/// Replaces the step handlers.
	pub fn with_request_handler(mut self, request_handler: Arc<dyn RequestHandler>) -> Self {
		self.request_handler = request_handler;

		self
	}

	/// Validates the configuration, stores the preconfigured groups, and starts the caches.
	///
	/// Must be called inside a Tokio runtime; the caches spawn their background tasks on it.
	pub async fn build(self) -> Result<Service> {
		let Self { mut config, store, connector, http, auth_handler, request_handler } = self;

		config.validate()?;

		let http = match http {
			Some(http) => http,
			None => ReqwestHttpClient::new(config.inactivity_timeout)?,
		};

		seed(&config, store.as_ref()).await;

		let groups = Arc::new(EnrollmentGroupsCache::new(store.clone(), config.cache_expiration));
		let hubs = LinkedHubCache::new(store.clone(), connector, LinkedHubSettings {
			http,
			token_cleanup_interval: config.token_cleanup_interval,
			expiration: config.cache_expiration,
		});
		let auth_handler = match auth_handler {
			Some(factory) => factory(groups.clone(), config.inactivity_timeout),
			None => Arc::new(DefaultAuthHandler::new(groups.clone(), config.inactivity_timeout)),
		};
		let cancel = CancellationToken::new();
		let tasks = TaskTracker::new();

		tasks.spawn({
			let auth_handler = auth_handler.clone();
			let cancel = cancel.clone();
			let mut ticker = sweep_interval(config.inactivity_timeout / 2);

			async move {
				loop {
					tokio::select! {
						_ = cancel.cancelled() => break,
						_ = ticker.tick() => {
							let now = OffsetDateTime::now_utc();

							auth_handler.verified_chains().check_expirations(now);
						},
					}
				}
			}
		});
		tasks.close();

		tracing::info!(
			enrollment_groups = config.enrollment_groups.len(),
			inactivity_timeout = %config.inactivity_timeout,
			"Started device provisioning service."
		);

		Ok(Service { config, store, groups, hubs, auth_handler, request_handler, cancel, tasks })
	}
}
impl Debug for ServiceBuilder {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ServiceBuilder")
			.field("config", &self.config)
			.field("http", &self.http)
			.field("custom_auth_handler", &self.auth_handler.is_some())
			.finish_non_exhaustive()
	}
}

/// Device provisioning engine.
pub struct Service {
	config: Config,
	store: Arc<dyn Store>,
	groups: Arc<EnrollmentGroupsCache>,
	hubs: LinkedHubCache,
	auth_handler: Arc<dyn AuthHandler>,
	request_handler: Arc<dyn RequestHandler>,
	cancel: CancellationToken,
	tasks: TaskTracker,
}
impl Service {
	/// Starts a builder with the default attestation and step handlers.
	pub fn builder(
		config: Config,
		store: Arc<dyn Store>,
		connector: Arc<dyn SignerConnector>,
	) -> ServiceBuilder {
		ServiceBuilder {
			config,
			store,
			connector,
			http: None,
			auth_handler: None,
			request_handler: Arc::new(DefaultRequestHandler),
		}
	}

	/// Validated configuration.
	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Enrollment group cache.
	pub fn enrollment_groups(&self) -> &Arc<EnrollmentGroupsCache> {
		&self.groups
	}

	/// Linked hub cache.
	pub fn linked_hubs(&self) -> &LinkedHubCache {
		&self.hubs
	}

	/// Verifies a DER chain presented by a device, leaf first.
	pub async fn verify_peer_certificate(&self, raw_certs: &[Vec<u8>]) -> Result<VerifiedChains> {
		self.auth_handler.verify_peer_certificate(raw_certs).await
	}

	/// Chains accepted for the leaf `leaf_der`, if still cached.
	pub fn verified_chains(&self, leaf_der: &[u8]) -> Option<VerifiedChains> {
		self.auth_handler.verified_chains().get(&leaf_hash(leaf_der))
	}

	/// Opens the session of a connection whose handshake presented `peer_certificates`.
	pub async fn open_session(
		&self,
		connection: Arc<dyn DeviceConnection>,
		peer_certificates: &[Vec<u8>],
	) -> Session {
		let ctx = RequestContext::with_timeout(self.config.inactivity_timeout);
		let chains = peer_certificates.first().and_then(|leaf| self.verified_chains(leaf));

		Session::open(
			&ctx,
			connection,
			self.store.clone(),
			&self.groups,
			chains.as_deref().unwrap_or_default(),
		)
		.await
	}

	/// Routes one request to its step handler.
	///
	/// Failed requests are answered with a diagnostic and the connection must be closed.
	pub async fn handle(&self, session: &Session, request: &CoapRequest) -> Dispatch {
		let kind = step_kind(&request.path);

		obs::record_step_outcome(kind, StepOutcome::Attempt);

		let outcome =
			StepSpan::new(kind, "handle").instrument(self.dispatch(kind, session, request)).await;

		match outcome {
			Ok(response) => {
				obs::record_step_outcome(kind, StepOutcome::Success);
				tracing::debug!(
					remote_addr = %session.remote_addr(),
					method = %request.method,
					path = %request.path,
					code = ?response.code,
					"Handled provisioning request."
				);

				Dispatch { response, close_connection: false }
			},
			Err(err) => {
				let code = err.coap_code();

				obs::record_step_outcome(kind, StepOutcome::Failure);
				tracing::debug!(
					remote_addr = %session.remote_addr(),
					method = %request.method,
					path = %request.path,
					code = ?code,
					error = %err,
					"Provisioning request failed."
				);

				Dispatch {
					response: CoapResponse::diagnostic(code, request, &err),
					close_connection: true,
				}
			},
		}
	}

	/// Stops the background tasks and closes both caches.
	pub async fn close(&self) {
		self.cancel.cancel();
		self.tasks.wait().await;
		self.hubs.close().await;
		self.groups.close().await;

		tracing::info!("Closed device provisioning service.");
	}

	async fn dispatch(
		&self,
		kind: StepKind,
		session: &Session,
		request: &CoapRequest,
	) -> Result<CoapResponse> {
		let ctx = RequestContext::with_timeout(self.config.inactivity_timeout);

		session.resolve_local_endpoints(&ctx).await;

		let group = session.enrollment_group().map_err(|err| {
			Error::status(
				Code::Forbidden,
				format!("cannot process {} {}: {err}", request.method, request.path),
			)
		})?;
		let step = Step { ctx: &ctx, request, session, group };
		let handler = self.request_handler.as_ref();

		match kind {
			StepKind::PlgdTime => handler.process_plgd_time(step).await,
			StepKind::Ownership => handler.process_ownership(step).await,
			StepKind::Credentials => {
				let hubs = self.linked_hubs_of(step).await?;

				handler.process_credentials(step, &hubs).await
			},
			StepKind::Acls => {
				let hubs = self.linked_hubs_of(step).await?;

				handler.process_acls(step, &hubs).await
			},
			StepKind::CloudConfiguration => {
				let hubs = self.linked_hubs_of(step).await?;

				handler.process_cloud_configuration(step, &hubs).await
			},
			StepKind::Default => handler.default_handler(step).await,
		}
	}

	async fn linked_hubs_of(&self, step: Step<'_>) -> Result<LinkedHubs> {
		self.hubs.get_hubs(step.ctx, step.group).await.map_err(|err| {
			Error::status(
				err.coap_code(),
				format!("cannot process {} {}: {err}", step.request.method, step.request.path),
			)
		})
	}
}
impl Debug for Service {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Service")
			.field("config", &self.config)
			.field("groups", &self.groups)
			.field("hubs", &self.hubs)
			.finish_non_exhaustive()
	}
}
impl Drop for Service {
	fn drop(&mut self) {
		self.cancel.cancel();
	}
}

fn step_kind(path: &str) -> StepKind {
	match path {
		paths::PLGD_TIME => StepKind::PlgdTime,
		paths::OWNERSHIP => StepKind::Ownership,
		paths::CREDENTIALS => StepKind::Credentials,
		paths::ACLS => StepKind::Acls,
		paths::CLOUD_CONFIGURATION => StepKind::CloudConfiguration,
		_ => StepKind::Default,
	}
}

/// Stores the preconfigured hubs, then their groups; failures are logged and skipped.
async fn seed(config: &Config, store: &dyn Store) {
	for group_config in &config.enrollment_groups {
		let (group, hubs) = group_config.to_documents();

		for hub in hubs {
			let id = hub.id.clone();

			if let Err(err) = store.upsert_hub(hub).await {
				tracing::warn!(hub = %id, error = %err, "Cannot store preconfigured hub.");
			}
		}

		let id = group.id.clone();

		if let Err(err) = store.upsert_enrollment_group(group).await {
			tracing::warn!(
				enrollment_group = %id,
				error = %err,
				"Cannot store preconfigured enrollment group."
			);
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn paths_route_to_their_steps() {
		assert_eq!(step_kind(paths::PLGD_TIME), StepKind::PlgdTime);
		assert_eq!(step_kind(paths::OWNERSHIP), StepKind::Ownership);
		assert_eq!(step_kind(paths::CREDENTIALS), StepKind::Credentials);
		assert_eq!(step_kind(paths::ACLS), StepKind::Acls);
		assert_eq!(step_kind(paths::CLOUD_CONFIGURATION), StepKind::CloudConfiguration);
		assert_eq!(step_kind("/oic/res"), StepKind::Default);
		assert_eq!(step_kind("/api/v1/provisioning/acls/"), StepKind::Default);
	}
}
