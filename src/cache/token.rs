//! Client-credentials token cache.

// crates.io
use tokio_util::{sync::CancellationToken, task::TaskTracker};
// self
use crate::{
	_prelude::*,
	auth::{RequiredClaims, Token},
	cache::{SingleFlightCache, sweep_interval},
	context::RequestContext,
	obs::CacheKind,
	provider::OAuthProvider,
};

/// Tokens of one hub's OAuth client, cached per key (usually the owner).
///
/// A cached token is reused only while it carries every required claim and stays valid past
/// the caller's deadline. A background task drops expired and failed entries every cleanup
/// interval until [`TokenCache::close`].
pub struct TokenCache {
	provider: Arc<OAuthProvider>,
	tokens: Arc<SingleFlightCache<String, Token>>,
	cancel: CancellationToken,
	tasks: TaskTracker,
}
impl TokenCache {
	/// Creates the cache and spawns its sweep task on the current Tokio runtime.
	pub fn new(provider: Arc<OAuthProvider>, cleanup_interval: Duration) -> Self {
		let tokens = Arc::new(SingleFlightCache::new(CacheKind::Token));
		let cancel = CancellationToken::new();
		let tasks = TaskTracker::new();

		tasks.spawn({
			let tokens = tokens.clone();
			let cancel = cancel.clone();

			async move {
				let mut ticker = sweep_interval(cleanup_interval);

				loop {
					tokio::select! {
						_ = cancel.cancelled() => break,
						_ = ticker.tick() => {
							sweep_tokens(&tokens);
						},
					}
				}
			}
		});
		tasks.close();

		Self { provider, tokens, cancel, tasks }
	}

	/// Authorization provider backing this cache.
	pub fn provider(&self) -> &OAuthProvider {
		&self.provider
	}

	/// Returns a cached token for `key` or exchanges a new one.
	///
	/// Fails with [`Error::ClaimNotFound`] when a freshly issued token still misses a required
	/// claim.
	pub async fn get_token(
		&self,
		ctx: &RequestContext,
		key: &str,
		url_values: &BTreeMap<String, String>,
		required: &RequiredClaims,
	) -> Result<Token> {
		let token = self
			.tokens
			.get_or_compute(
				ctx,
				&key.to_owned(),
				|token, deadline| {
					token.is_valid_at(deadline) && token.check_claims(required).is_ok()
				},
				|| self.get_token_from_oauth(ctx, url_values, required),
			)
			.await?;

		token.check_claims(required)?;

		Ok(token)
	}

	/// Exchanges a new token without consulting the cache.
	pub async fn get_token_from_oauth(
		&self,
		ctx: &RequestContext,
		url_values: &BTreeMap<String, String>,
		required: &RequiredClaims,
	) -> Result<Token> {
		let token = self.provider.client_credentials(ctx, url_values).await?;

		token.check_claims(required)?;

		Ok(token)
	}

	/// Drops expired and failed entries; returns how many were removed.
	pub fn sweep(&self) -> usize {
		sweep_tokens(&self.tokens)
	}

	/// Number of cached entries.
	pub fn len(&self) -> usize {
		self.tokens.len()
	}

	/// Returns true when nothing is cached.
	pub fn is_empty(&self) -> bool {
		self.tokens.is_empty()
	}

	/// Stops the sweep task and refuses further lookups without waiting.
	pub fn shutdown(&self) {
		self.cancel.cancel();
		self.tokens.close();
	}

	/// Stops the sweep task and waits for it to exit.
	pub async fn close(&self) {
		self.shutdown();
		self.tasks.wait().await;
	}
}
impl Debug for TokenCache {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenCache")
			.field("provider", &self.provider.name())
			.field("tokens", &self.tokens)
			.finish_non_exhaustive()
	}
}
impl Drop for TokenCache {
	fn drop(&mut self) {
		self.cancel.cancel();
	}
}

fn sweep_tokens(tokens: &SingleFlightCache<String, Token>) -> usize {
	let now = OffsetDateTime::now_utc();

	tokens.sweep(|token| token.is_valid_at(now))
}
