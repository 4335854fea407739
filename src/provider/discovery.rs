//! OpenID configuration discovery.

// self
use crate::{_prelude::*, error::ConfigError, http::ReqwestHttpClient};

const WELL_KNOWN_PATH: &str = ".well-known/openid-configuration";

/// Subset of the OpenID provider metadata consumed by the engine.
#[derive(Clone, Debug, Deserialize)]
pub struct OpenIdConfiguration {
	/// Issuer identifier, when published.
	#[serde(default)]
	pub issuer: Option<String>,
	/// OAuth 2.0 token endpoint.
	pub token_endpoint: Url,
}

/// Builds the discovery document URL for `authority`.
pub fn discovery_url(authority: &Url) -> Result<Url, ConfigError> {
	let base = authority.as_str().trim_end_matches('/');

	Url::parse(&format!("{base}/{WELL_KNOWN_PATH}"))
		.map_err(|source| ConfigError::InvalidUrl { field: "authority", source })
}

/// Fetches the OpenID configuration published by `authority`.
pub async fn discover(http: &ReqwestHttpClient, authority: &Url) -> Result<OpenIdConfiguration> {
	let url = discovery_url(authority)?;

	http.fetch_json(url, authority.as_str()).await
}
