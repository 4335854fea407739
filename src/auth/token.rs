//! Access tokens issued by hub authorization providers.

// self
use crate::{
	_prelude::*,
	auth::{ClaimNotFoundError, Claims, RequiredClaims},
};

/// Redacted token secret wrapper keeping sensitive material out of logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenSecret(String);
impl TokenSecret {
	/// Wraps a new secret string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the inner token value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}
impl AsRef<str> for TokenSecret {
	fn as_ref(&self) -> &str {
		self.expose()
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("TokenSecret").field(&"<redacted>").finish()
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

/// Client-credentials access token plus its decoded claims.
#[derive(Clone, Debug)]
pub struct Token {
	/// Bearer access token.
	pub access_token: TokenSecret,
	/// Absolute expiry; `None` when the provider did not report `expires_in`.
	pub expires_at: Option<OffsetDateTime>,
	/// Claims decoded from the access token payload.
	pub claims: Claims,
}
impl Token {
	/// Builds a token and decodes its claims.
	pub fn new(access_token: impl Into<String>, expires_at: Option<OffsetDateTime>) -> Self {
		let access_token = TokenSecret::new(access_token);
		let claims = Claims::decode_unverified(access_token.expose());

		Self { access_token, expires_at, claims }
	}

	/// Returns true when the token never expires or expires strictly after `instant`.
	pub fn is_valid_at(&self, instant: OffsetDateTime) -> bool {
		self.expires_at.is_none_or(|expires_at| expires_at > instant)
	}

	/// Verifies the required claims against the decoded payload.
	pub fn check_claims(&self, required: &RequiredClaims) -> Result<(), ClaimNotFoundError> {
		self.claims.check(required)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn secret_formatters_redact() {
		let secret = TokenSecret::new("super-secret");

		assert_eq!(format!("{secret:?}"), "TokenSecret(\"<redacted>\")");
		assert_eq!(format!("{secret}"), "<redacted>");
	}

	#[test]
	fn validity_is_strictly_after_instant() {
		let now = OffsetDateTime::now_utc();
		let token = Token::new("opaque", Some(now + Duration::seconds(30)));

		assert!(token.is_valid_at(now));
		assert!(!token.is_valid_at(now + Duration::seconds(30)));
		assert!(Token::new("opaque", None).is_valid_at(now + Duration::days(365)));
	}
}
