//! One hub resolved for provisioning.

// self
use crate::{
	_prelude::*,
	auth::{HubId, RequiredClaims, Token},
	ca::{CertificateSigner, SignerConnector},
	cache::TokenCache,
	context::RequestContext,
	http::ReqwestHttpClient,
	model::Hub,
	provider::OAuthProvider,
};

#[derive(Clone, Copy, Debug)]
struct Liveness {
	valid_until: OffsetDateTime,
	invalidated: bool,
}

/// Hub document together with its certificate authority connection and token cache.
///
/// A linked hub is usable until it expires without being refreshed or a store watch marks it
/// invalid; unusable hubs are evicted and shut down by [`crate::hub::LinkedHubCache`].
pub struct LinkedHub {
	hub: Hub,
	signer: Arc<dyn CertificateSigner>,
	tokens: TokenCache,
	expiration: Duration,
	state: Mutex<Liveness>,
}
impl LinkedHub {
	/// Resolves the hub's authorization provider and dials its certificate authority.
	pub async fn connect(
		ctx: &RequestContext,
		hub: Hub,
		connector: &dyn SignerConnector,
		http: ReqwestHttpClient,
		token_cleanup_interval: Duration,
		expiration: Duration,
	) -> Result<Self> {
		let provider = OAuthProvider::discover(ctx, &hub.authorization.provider, http).await?;
		let signer = connector.connect(ctx, &hub).await?;
		let tokens = TokenCache::new(Arc::new(provider), token_cleanup_interval);

		Ok(Self::new(hub, signer, tokens, expiration))
	}

	/// Assembles a linked hub from already built collaborators.
	pub fn new(
		hub: Hub,
		signer: Arc<dyn CertificateSigner>,
		tokens: TokenCache,
		expiration: Duration,
	) -> Self {
		let state = Mutex::new(Liveness {
			valid_until: OffsetDateTime::now_utc() + expiration,
			invalidated: false,
		});

		Self { hub, signer, tokens, expiration, state }
	}

	/// Hub document.
	pub fn hub(&self) -> &Hub {
		&self.hub
	}

	/// Store document ID.
	pub fn id(&self) -> &HubId {
		&self.hub.id
	}

	/// Identifier handed to devices.
	pub fn hub_id(&self) -> &HubId {
		self.hub.hub_id()
	}

	/// Certificate authority client.
	pub fn signer(&self) -> &dyn CertificateSigner {
		self.signer.as_ref()
	}

	/// Authorization provider name handed to devices.
	pub fn provider_name(&self) -> &str {
		self.tokens.provider().name()
	}

	/// Token cache of the hub's OAuth client.
	pub fn tokens(&self) -> &TokenCache {
		&self.tokens
	}

	/// Returns true when the hub was not refreshed before `now`.
	pub fn is_expired(&self, now: OffsetDateTime) -> bool {
		self.state.lock().valid_until <= now
	}

	/// Returns true once a store change marked the hub invalid.
	pub fn is_invalid(&self) -> bool {
		self.state.lock().invalidated
	}

	/// Returns true while the hub is neither invalid nor expired at `now`.
	pub fn is_usable(&self, now: OffsetDateTime) -> bool {
		let state = *self.state.lock();

		!state.invalidated && state.valid_until > now
	}

	/// Marks the hub invalid; it is evicted on the next access or sweep.
	pub fn invalidate(&self) {
		self.state.lock().invalidated = true;
	}

	/// Extends the expiry by one expiration period from `now`.
	pub fn refresh(&self, now: OffsetDateTime) {
		self.state.lock().valid_until = now + self.expiration;
	}

	/// Cached owner-scoped token, see [`TokenCache::get_token`].
	pub async fn get_token(
		&self,
		ctx: &RequestContext,
		key: &str,
		url_values: &BTreeMap<String, String>,
		required: &RequiredClaims,
	) -> Result<Token> {
		self.tokens.get_token(ctx, key, url_values, required).await
	}

	/// Freshly exchanged token, see [`TokenCache::get_token_from_oauth`].
	pub async fn get_token_from_oauth(
		&self,
		ctx: &RequestContext,
		url_values: &BTreeMap<String, String>,
		required: &RequiredClaims,
	) -> Result<Token> {
		self.tokens.get_token_from_oauth(ctx, url_values, required).await
	}

	/// Closes the certificate authority connection and stops the token cache.
	pub fn shutdown(&self) {
		tracing::debug!(hub = %self.hub.id, "Closing linked hub.");

		self.signer.close();
		self.tokens.shutdown();
	}
}
impl Debug for LinkedHub {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("LinkedHub")
			.field("id", &self.hub.id)
			.field("hub_id", self.hub_id())
			.field("state", &*self.state.lock())
			.finish_non_exhaustive()
	}
}
