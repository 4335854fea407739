//! Provider strategy hooks that customize client-credentials exchanges.

// self
use crate::_prelude::*;

/// Strategy hook that lets providers decorate requests and classify errors.
///
/// Override only what you need; `augment_token_request` defaults to a no-op.
pub trait ProviderStrategy: Send + Sync {
	/// Maps an OAuth error response into the engine taxonomy.
	fn classify_token_error(&self, ctx: &ProviderErrorContext) -> ProviderErrorKind;

	/// Adds provider-specific form parameters before dispatching.
	fn augment_token_request(&self, _form: &mut BTreeMap<String, String>) {}
}

/// Canonical provider error categories used by strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderErrorKind {
	/// Provider rejected the client-credentials grant.
	InvalidGrant,
	/// Client authentication failed.
	InvalidClient,
	/// Requested scopes exceed what the client may obtain.
	InsufficientScope,
	/// Failure is temporary and should be retried.
	Transient,
}

/// Primitive view of a failed token response handed to [`ProviderStrategy`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProviderErrorContext {
	/// HTTP status code returned by the provider, when available.
	pub http_status: Option<u16>,
	/// Provider-supplied OAuth `error` field.
	pub oauth_error: Option<String>,
	/// Provider-supplied OAuth `error_description` field.
	pub error_description: Option<String>,
}
impl ProviderErrorContext {
	/// Adds an HTTP status code.
	pub fn with_http_status(mut self, status: u16) -> Self {
		self.http_status = Some(status);

		self
	}

	/// Adds the OAuth error code string returned by the provider.
	pub fn with_oauth_error(mut self, error: impl Into<String>) -> Self {
		self.oauth_error = Some(error.into());

		self
	}

	/// Adds the OAuth `error_description` field.
	pub fn with_error_description(mut self, description: impl Into<String>) -> Self {
		self.error_description = Some(description.into());

		self
	}
}

/// Default strategy: structured OAuth fields first, then description hints, then HTTP status.
#[derive(Debug, Default)]
pub struct DefaultProviderStrategy;
impl ProviderStrategy for DefaultProviderStrategy {
	fn classify_token_error(&self, ctx: &ProviderErrorContext) -> ProviderErrorKind {
		ctx.oauth_error
			.as_deref()
			.and_then(match_exact_value)
			.or_else(|| ctx.error_description.as_deref().and_then(match_exact_value))
			.or_else(|| ctx.error_description.as_deref().and_then(classify_description))
			.unwrap_or_else(|| classify_status(ctx.http_status))
	}
}

fn match_exact_value(value: &str) -> Option<ProviderErrorKind> {
	let kind = match value.to_ascii_lowercase().as_str() {
		"invalid_grant" | "access_denied" | "unsupported_grant_type" =>
			ProviderErrorKind::InvalidGrant,
		"invalid_client" | "unauthorized_client" => ProviderErrorKind::InvalidClient,
		"invalid_scope" | "insufficient_scope" => ProviderErrorKind::InsufficientScope,
		"temporarily_unavailable" | "server_error" => ProviderErrorKind::Transient,
		_ => return None,
	};

	Some(kind)
}

fn classify_description(description: &str) -> Option<ProviderErrorKind> {
	let lowered = description.to_ascii_lowercase();

	match lowered.as_str() {
		text if text.contains("invalid_grant") => Some(ProviderErrorKind::InvalidGrant),
		text if text.contains("invalid_client") => Some(ProviderErrorKind::InvalidClient),
		text if text.contains("insufficient_scope") || text.contains("invalid_scope") =>
			Some(ProviderErrorKind::InsufficientScope),
		text if text.contains("temporarily_unavailable") || text.contains("retry") =>
			Some(ProviderErrorKind::Transient),
		_ => None,
	}
}

fn classify_status(status: Option<u16>) -> ProviderErrorKind {
	match status {
		Some(400 | 404 | 410) => ProviderErrorKind::InvalidGrant,
		Some(401) => ProviderErrorKind::InvalidClient,
		Some(403) => ProviderErrorKind::InsufficientScope,
		_ => ProviderErrorKind::Transient,
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn oauth_error_field_wins() {
		let ctx = ProviderErrorContext::default()
			.with_http_status(503)
			.with_oauth_error("invalid_client")
			.with_error_description("please retry later");

		assert_eq!(
			DefaultProviderStrategy.classify_token_error(&ctx),
			ProviderErrorKind::InvalidClient
		);
	}

	#[test]
	fn description_hints_precede_status() {
		let ctx = ProviderErrorContext::default()
			.with_http_status(400)
			.with_oauth_error("custom_error")
			.with_error_description("Upstream busy, retry in a moment");

		assert_eq!(
			DefaultProviderStrategy.classify_token_error(&ctx),
			ProviderErrorKind::Transient
		);
	}

	#[test]
	fn status_fallback() {
		let classify = |status| {
			DefaultProviderStrategy
				.classify_token_error(&ProviderErrorContext::default().with_http_status(status))
		};

		assert_eq!(classify(401), ProviderErrorKind::InvalidClient);
		assert_eq!(classify(403), ProviderErrorKind::InsufficientScope);
		assert_eq!(classify(502), ProviderErrorKind::Transient);
		assert_eq!(
			DefaultProviderStrategy.classify_token_error(&ProviderErrorContext::default()),
			ProviderErrorKind::Transient
		);
	}
}
