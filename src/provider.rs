//! Hub authorization providers.
//!
//! `discovery` resolves the token endpoint from the provider authority's OpenID configuration.
//! `strategy` defines [`ProviderStrategy`], the hook used to decorate token requests and map
//! OAuth error responses into the engine error taxonomy.

pub mod discovery;
pub mod strategy;

pub use discovery::*;
pub use strategy::*;

// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, Token},
	context::RequestContext,
	http::ReqwestHttpClient,
	model::AuthorizationProviderConfig,
	oauth::ClientCredentialsFacade,
};

/// How the client authenticates against the token endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
	/// HTTP Basic authentication header.
	#[default]
	ClientSecretBasic,
	/// Credentials in the form body.
	ClientSecretPost,
}

/// OAuth client-credentials provider configured for one hub.
pub struct OAuthProvider {
	name: String,
	token_url: Url,
	scopes: ScopeSet,
	audience: Option<String>,
	facade: ClientCredentialsFacade,
	strategy: Arc<dyn ProviderStrategy>,
}
impl OAuthProvider {
	/// Resolves the token endpoint through OpenID discovery and builds the provider.
	pub async fn discover(
		ctx: &RequestContext,
		config: &AuthorizationProviderConfig,
		http: ReqwestHttpClient,
	) -> Result<Self> {
		let document = ctx.run("openid discovery", discover(&http, &config.authority)).await?;

		Self::with_token_url(config, document.token_endpoint, http)
	}

	/// Builds the provider against a known token endpoint.
	pub fn with_token_url(
		config: &AuthorizationProviderConfig,
		token_url: Url,
		http: ReqwestHttpClient,
	) -> Result<Self> {
		let facade = ClientCredentialsFacade::new(
			&token_url,
			&config.client_id,
			config.client_secret.as_ref(),
			config.client_auth_method,
			http,
		)?;

		Ok(Self {
			name: config.name.clone(),
			token_url,
			scopes: config.scopes.clone(),
			audience: config.audience.clone().filter(|audience| !audience.is_empty()),
			facade,
			strategy: Arc::new(DefaultProviderStrategy),
		})
	}

	/// Replaces the error classification strategy.
	pub fn with_strategy(mut self, strategy: Arc<dyn ProviderStrategy>) -> Self {
		self.strategy = strategy;

		self
	}

	/// Provider name handed to devices as the authorization provider.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Resolved token endpoint.
	pub fn token_url(&self) -> &Url {
		&self.token_url
	}

	/// Requests a fresh token, forwarding `url_values` as extra form parameters.
	pub async fn client_credentials(
		&self,
		ctx: &RequestContext,
		url_values: &BTreeMap<String, String>,
	) -> Result<Token> {
		let mut params = url_values.clone();

		if let Some(audience) = &self.audience {
			params.insert("audience".into(), audience.clone());
		}

		let exchange = self.facade.exchange(self.strategy.as_ref(), &self.scopes, &params);

		ctx.run("token exchange", exchange).await
	}
}
impl Debug for OAuthProvider {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("OAuthProvider")
			.field("name", &self.name)
			.field("token_url", &self.token_url.as_str())
			.field("scopes", &self.scopes)
			.finish_non_exhaustive()
	}
}
