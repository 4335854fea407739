//! Engine-level error types shared across caches, handlers, and stores.

// self
use crate::{
	_prelude::*, attestation::AttestationError, auth::ClaimNotFoundError, coap::Code,
	store::StoreError,
};

/// Engine-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Shared, cloneable source error.
///
/// Single-flight results are handed to every waiter, so sources are reference counted instead
/// of boxed.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync>;

/// Canonical engine error exposed by public APIs.
#[derive(Clone, Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Store(
		#[from]
		#[source]
		StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Temporary upstream failure; retry with backoff.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Device certificate chain was not accepted.
	#[error(transparent)]
	Attestation(#[from] AttestationError),
	/// A token did not carry a required claim value.
	#[error(transparent)]
	ClaimNotFound(#[from] ClaimNotFoundError),

	/// Requested scopes exceed what was granted.
	#[error("Token lacks the required scopes: {reason}.")]
	InsufficientScope {
		/// Provider-supplied reason string.
		reason: String,
	},
	/// Provider rejected the grant.
	#[error("Provider rejected the grant: {reason}.")]
	InvalidGrant {
		/// Provider-supplied reason string.
		reason: String,
	},
	/// Client authentication failed or credentials are malformed.
	#[error("Client authentication failed: {reason}.")]
	InvalidClient {
		/// Provider-supplied reason string.
		reason: String,
	},
	/// The request context carries no deadline.
	#[error("Deadline is not set in the request context.")]
	DeadlineRequired,
	/// The request context deadline elapsed.
	#[error("Deadline exceeded while waiting for {operation}.")]
	DeadlineExceeded {
		/// Operation that was cut short.
		operation: &'static str,
	},
	/// The computation producing a shared result was dropped before finishing.
	#[error("Shared computation was abandoned before it produced a result.")]
	Abandoned,
	/// The component was already closed.
	#[error("The {component} is closed.")]
	Closed {
		/// Closed component label.
		component: &'static str,
	},
	/// Certificate authority call failed.
	#[error("Certificate authority failed: {message}.")]
	Signing {
		/// Collaborator-supplied message.
		message: String,
	},
	/// No usable linked hub could be built.
	#[error("Cannot resolve linked hubs: {message}.")]
	LinkedHub {
		/// Aggregated failure description.
		message: String,
	},
	/// Failure already classified with a CoAP response code.
	#[error("{message}")]
	Status {
		/// Response code sent to the device.
		code: Code,
		/// Diagnostic text sent to the device.
		message: String,
	},
}
impl Error {
	/// Builds an error that carries an explicit CoAP response code.
	pub fn status(code: Code, message: impl Into<String>) -> Self {
		Self::Status { code, message: message.into() }
	}

	/// Returns true when retrying the same request later may succeed.
	pub fn is_transient(&self) -> bool {
		matches!(
			self,
			Self::Store(_)
				| Self::Transient(_)
				| Self::Transport(_)
				| Self::DeadlineExceeded { .. }
				| Self::Signing { .. }
				| Self::Abandoned
		)
	}

	/// Translates the error into the response code the device retry logic understands.
	pub fn coap_code(&self) -> Code {
		match self {
			Self::Status { code, .. } => *code,
			Self::Attestation(_) => Code::Forbidden,
			Self::LinkedHub { .. } => Code::BadRequest,
			err if err.is_transient() => Code::ServiceUnavailable,
			_ => Code::InternalServerError,
		}
	}
}

/// Configuration and validation failures.
#[derive(Clone, Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: SharedError,
	},
	/// HTTP request construction failed.
	#[error("HTTP request could not be built: {message}.")]
	HttpRequest {
		/// Builder failure message.
		message: String,
	},
	/// A configured URL cannot be parsed.
	#[error("The {field} URL is invalid.")]
	InvalidUrl {
		/// Offending field label.
		field: &'static str,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// A configuration document failed to deserialize.
	#[error("Configuration cannot be parsed at `{path}`: {message}.")]
	Parse {
		/// Dotted path of the offending field.
		path: String,
		/// Deserializer message.
		message: String,
	},
	/// A field holds an unusable value.
	#[error("Invalid `{field}`: {reason}.")]
	InvalidField {
		/// Dotted path of the offending field.
		field: String,
		/// Why the value was rejected.
		reason: String,
	},
	/// Token endpoint returned an excessively large `expires_in`.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Arc::new(src) }
	}

	/// Rejects the value held by `field`.
	pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
		Self::InvalidField { field: field.into(), reason: reason.into() }
	}

	/// Prefixes the offending field path with `parent`.
	pub fn nested(self, parent: impl Display) -> Self {
		match self {
			Self::InvalidField { field, reason } =>
				Self::InvalidField { field: format!("{parent}.{field}"), reason },
			Self::Parse { path, message } =>
				Self::Parse { path: format!("{parent}.{path}"), message },
			other => other,
		}
	}
}
impl From<reqwest::Error> for ConfigError {
	fn from(e: reqwest::Error) -> Self {
		Self::http_client_build(e)
	}
}
impl From<oauth2::http::Error> for ConfigError {
	fn from(e: oauth2::http::Error) -> Self {
		Self::HttpRequest { message: e.to_string() }
	}
}

/// Temporary failure variants (safe to retry).
#[derive(Clone, Debug, ThisError)]
pub enum TransientError {
	/// Provider returned an unexpected but non-fatal response.
	#[error("Token endpoint returned an unexpected response: {message}.")]
	TokenEndpoint {
		/// Summary of the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Token endpoint responded with a body that could not be parsed.
	#[error("Token endpoint returned malformed JSON.")]
	TokenResponseParse {
		/// Structured parsing failure.
		#[source]
		source: SharedError,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// The OpenID configuration document could not be fetched or parsed.
	#[error("OpenID configuration of `{authority}` is unavailable: {message}.")]
	Discovery {
		/// Authority the document was requested from.
		authority: String,
		/// Summary of the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
}

/// Transport-level failures (network, IO).
#[derive(Clone, Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the authorization provider.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: SharedError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the authorization provider.")]
	Io(#[source] Arc<std::io::Error>),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Arc::new(src) }
	}
}
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}
impl From<std::io::Error> for TransportError {
	fn from(e: std::io::Error) -> Self {
		Self::Io(Arc::new(e))
	}
}
