//! Access-token claims and required-claim checks.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde_json::{Map, Value};
// self
use crate::_prelude::*;

/// Claim name to expected value pairs a token must carry.
pub type RequiredClaims = BTreeMap<String, String>;

/// A required claim was absent or carried a different value.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("Token claim `{claim}` is {}, expected `{expected}`.", found(.got))]
pub struct ClaimNotFoundError {
	/// Claim name.
	pub claim: String,
	/// Value the caller required.
	pub expected: String,
	/// Value found in the token, if the claim was present.
	pub got: Option<String>,
}

fn found(got: &Option<String>) -> String {
	got.as_deref().map_or_else(|| "missing".to_owned(), |got| format!("`{got}`"))
}

/// Decoded JWT payload claims.
///
/// Opaque (non-JWT) access tokens decode to an empty claim set; they only satisfy an empty
/// requirement.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Claims(Map<String, Value>);
impl Claims {
	/// Decodes the payload segment of a compact JWT without verifying its signature.
	pub fn decode_unverified(token: &str) -> Self {
		let mut segments = token.split('.');
		let (Some(_), Some(payload), Some(_)) = (segments.next(), segments.next(), segments.next())
		else {
			return Self::default();
		};
		let Ok(bytes) = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')) else {
			return Self::default();
		};

		serde_json::from_slice(&bytes).map(Self).unwrap_or_default()
	}

	/// Returns the claim value rendered as text; strings are returned without quotes.
	pub fn get(&self, claim: &str) -> Option<String> {
		self.0.get(claim).map(|value| match value {
			Value::String(text) => text.clone(),
			other => other.to_string(),
		})
	}

	/// Verifies that every required claim is present with the expected value.
	pub fn check(&self, required: &RequiredClaims) -> Result<(), ClaimNotFoundError> {
		for (claim, expected) in required {
			let got = self.get(claim);

			if got.as_deref() != Some(expected.as_str()) {
				return Err(ClaimNotFoundError {
					claim: claim.clone(),
					expected: expected.clone(),
					got,
				});
			}
		}

		Ok(())
	}
}
impl From<Map<String, Value>> for Claims {
	fn from(value: Map<String, Value>) -> Self {
		Self(value)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn jwt(payload: &str) -> String {
		format!("e30.{}.c2ln", URL_SAFE_NO_PAD.encode(payload))
	}

	#[test]
	fn decodes_payload_segment() {
		let claims = Claims::decode_unverified(&jwt(r#"{"owner":"alice","n":3}"#));

		assert_eq!(claims.get("owner").as_deref(), Some("alice"));
		assert_eq!(claims.get("n").as_deref(), Some("3"));
	}

	#[test]
	fn opaque_tokens_have_no_claims() {
		assert_eq!(Claims::decode_unverified("opaque-token"), Claims::default());
		assert_eq!(Claims::decode_unverified("a.!!!.c"), Claims::default());
	}

	#[test]
	fn check_reports_mismatch() {
		let claims = Claims::decode_unverified(&jwt(r#"{"owner":"mallory"}"#));
		let required = RequiredClaims::from([("owner".to_owned(), "alice".to_owned())]);
		let err = claims.check(&required).expect_err("Mismatched owner should be rejected.");

		assert_eq!(err.claim, "owner");
		assert_eq!(err.got.as_deref(), Some("mallory"));
		assert_eq!(err.to_string(), "Token claim `owner` is `mallory`, expected `alice`.");

		let missing = Claims::default().check(&required).expect_err("Missing claim should fail.");

		assert_eq!(missing.to_string(), "Token claim `owner` is missing, expected `alice`.");
		assert!(claims.check(&RequiredClaims::new()).is_ok());
	}
}
