//! Persisted documents: enrollment groups, hubs, and provisioning records.

pub mod record;

pub use record::*;

// self
use crate::{
	_prelude::*,
	auth::{EnrollmentGroupId, HubId, ScopeSet, TokenSecret},
	error::ConfigError,
	provider::ClientAuthMethod,
	x509::{self, Certificate, CertificateError},
};

const COAP_SCHEMES: [&str; 4] = ["coap", "coaps", "coap+tcp", "coaps+tcp"];
const DEFAULT_GATEWAY_SCHEME_PREFIX: &str = "coaps+tcp://";
const MIN_PRE_SHARED_KEY_LEN: usize = 16;

/// X.509 attestation mechanism of an enrollment group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct X509Attestation {
	/// PEM bundle; the first certificate is the one expected to sign device certificates.
	pub certificate_chain: String,
	/// Issuer common name devices present; defaults to the first certificate's subject.
	#[serde(default)]
	pub lead_certificate_name: String,
	/// Verify device certificates at the midpoint of their validity instead of now.
	#[serde(default)]
	pub expired_certificate_enabled: bool,
}
impl X509Attestation {
	/// Parses the configured certificate chain.
	pub fn parse_chain(&self) -> Result<Vec<Certificate>, CertificateError> {
		x509::parse_pem_chain(self.certificate_chain.as_bytes())
	}
}

/// Tenant trust policy binding a manufacturer certificate chain to linked hubs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentGroup {
	/// Immutable identifier.
	pub id: EnrollmentGroupId,
	/// Immutable owner.
	pub owner: String,
	/// How devices prove their manufacturer identity.
	pub attestation: X509Attestation,
	/// External IDs of the linked hubs, matched against [`Hub::hub_id`].
	pub hub_ids: Vec<HubId>,
	/// Key material for the pre-shared-key credential.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub pre_shared_key: Option<TokenSecret>,
	/// Display name.
	#[serde(default)]
	pub name: String,
}
impl EnrollmentGroup {
	/// Checks the document and fills defaults.
	pub fn validate(&mut self) -> Result<(), ConfigError> {
		if self.owner.is_empty() {
			return Err(ConfigError::invalid("owner", "is empty"));
		}
		if self.hub_ids.is_empty() {
			return Err(ConfigError::invalid("hub_ids", "is empty"));
		}

		let chain = self
			.attestation
			.parse_chain()
			.map_err(|err| ConfigError::invalid("attestation.certificate_chain", err.to_string()))?;

		if self.attestation.lead_certificate_name.is_empty() {
			self.attestation.lead_certificate_name = chain
				.first()
				.map(|cert| cert.subject_common_name().to_owned())
				.unwrap_or_default();
		}
		if self.attestation.lead_certificate_name.is_empty() {
			return Err(ConfigError::invalid("attestation.lead_certificate_name", "is empty"));
		}
		if let Some(psk) = &self.pre_shared_key
			&& psk.expose().len() < MIN_PRE_SHARED_KEY_LEN
		{
			return Err(ConfigError::invalid(
				"pre_shared_key",
				format!("must have at least {MIN_PRE_SHARED_KEY_LEN} bytes"),
			));
		}
		if self.name.is_empty() {
			self.name = self.id.to_string();
		}

		Ok(())
	}

	/// First sixteen bytes of the pre-shared key, when one is configured.
	pub fn pre_shared_key_bytes(&self) -> Option<[u8; MIN_PRE_SHARED_KEY_LEN]> {
		self.pre_shared_key.as_ref().and_then(|psk| psk.expose().as_bytes().first_chunk().copied())
	}
}

/// Certificate authority client settings of a hub.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateAuthorityConfig {
	/// Address of the certificate authority service.
	pub address: String,
}

/// OAuth client-credentials provider settings of a hub.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationProviderConfig {
	/// Provider name handed to devices.
	pub name: String,
	/// Issuer URL the OpenID configuration is discovered from.
	pub authority: Url,
	/// OAuth client ID.
	pub client_id: String,
	/// OAuth client secret.
	#[serde(default)]
	pub client_secret: Option<TokenSecret>,
	/// Requested scopes.
	#[serde(default)]
	pub scopes: ScopeSet,
	/// Optional `audience` form parameter.
	#[serde(default)]
	pub audience: Option<String>,
	/// Client authentication method.
	#[serde(default)]
	pub client_auth_method: ClientAuthMethod,
}
impl AuthorizationProviderConfig {
	fn validate(&self) -> Result<(), ConfigError> {
		if self.name.is_empty() {
			return Err(ConfigError::invalid("name", "is empty"));
		}
		if self.client_id.is_empty() {
			return Err(ConfigError::invalid("client_id", "is empty"));
		}

		Ok(())
	}
}

/// Token claims and provider used to authorize devices at a hub.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationConfig {
	/// Claim carrying the owner.
	pub owner_claim: String,
	/// Claim carrying the device ID; empty when the hub does not bind tokens to devices.
	#[serde(default)]
	pub device_id_claim: String,
	/// Token provider.
	pub provider: AuthorizationProviderConfig,
}

/// One linked hub.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hub {
	/// Document identifier; store watches report changes under it.
	pub id: HubId,
	/// Identifier handed to devices and referenced by enrollment groups; defaults to `id`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub hub_id: Option<HubId>,
	/// Owner.
	pub owner: String,
	/// CoAP gateway URIs.
	pub gateways: Vec<String>,
	/// Certificate authority client.
	pub certificate_authority: CertificateAuthorityConfig,
	/// Device authorization.
	pub authorization: AuthorizationConfig,
	/// Display name; defaults to `id`.
	#[serde(default)]
	pub name: String,
}
impl Hub {
	/// Identifier handed to devices.
	pub fn hub_id(&self) -> &HubId {
		self.hub_id.as_ref().unwrap_or(&self.id)
	}

	/// Checks the document, normalizes gateways, and fills defaults.
	///
	/// When `owner` is given the hub must belong to it.
	pub fn validate(&mut self, owner: Option<&str>) -> Result<(), ConfigError> {
		if self.owner.is_empty() {
			return Err(ConfigError::invalid("owner", "is empty"));
		}
		if let Some(owner) = owner.filter(|owner| !owner.is_empty())
			&& owner != self.owner
		{
			return Err(ConfigError::invalid("owner", format!("expects `{owner}`")));
		}
		if self.gateways.is_empty() {
			return Err(ConfigError::invalid("gateways", "is empty"));
		}

		let mut gateways = Vec::with_capacity(self.gateways.len());

		for (i, gateway) in self.gateways.iter().enumerate() {
			let gateway = validate_coap_gateway_uri(gateway)
				.map_err(|err| err.nested(format_args!("gateways[{i}]")))?;

			if !gateways.contains(&gateway) {
				gateways.push(gateway);
			}
		}

		self.gateways = gateways;

		if self.certificate_authority.address.is_empty() {
			return Err(ConfigError::invalid("certificate_authority.address", "is empty"));
		}
		if self.authorization.owner_claim.is_empty() {
			return Err(ConfigError::invalid("authorization.owner_claim", "is empty"));
		}

		self.authorization.provider.validate().map_err(|err| err.nested("authorization.provider"))?;

		if self.name.is_empty() {
			self.name = self.id.to_string();
		}
		if self.hub_id.is_none() {
			self.hub_id = Some(self.id.clone());
		}

		Ok(())
	}

	/// Gateways that normalize to valid CoAP URIs, in configuration order.
	pub fn valid_gateways(&self) -> impl Iterator<Item = String> + '_ {
		self.gateways.iter().filter_map(|gateway| validate_coap_gateway_uri(gateway).ok())
	}
}

/// Normalizes a gateway address into a CoAP URI.
///
/// URIs with a CoAP scheme are kept as is; anything else is prefixed with `coaps+tcp://`.
pub fn validate_coap_gateway_uri(gateway: &str) -> Result<String, ConfigError> {
	if gateway.is_empty() {
		return Err(ConfigError::invalid("uri", "is empty"));
	}
	if let Ok(url) = Url::parse(gateway)
		&& COAP_SCHEMES.contains(&url.scheme())
	{
		return Ok(gateway.to_owned());
	}

	let prefixed = format!("{DEFAULT_GATEWAY_SCHEME_PREFIX}{gateway}");

	match Url::parse(&prefixed) {
		Ok(url) if url.host_str().is_some_and(|host| !host.is_empty()) => Ok(prefixed),
		_ => Err(ConfigError::invalid("uri", format!("`{gateway}` is not a valid CoAP URI"))),
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn hub_fixture(id: &str) -> Hub {
		Hub {
			id: HubId::new(id).expect("Hub fixture ID should be valid."),
			hub_id: None,
			owner: "owner-1".into(),
			gateways: vec!["hub.example:5684".into()],
			certificate_authority: CertificateAuthorityConfig { address: "ca.example:443".into() },
			authorization: AuthorizationConfig {
				owner_claim: "sub".into(),
				device_id_claim: String::new(),
				provider: AuthorizationProviderConfig {
					name: "plgd".into(),
					authority: Url::parse("https://auth.example").expect("Authority should parse."),
					client_id: "client".into(),
					client_secret: Some(TokenSecret::new("secret")),
					scopes: ScopeSet::default(),
					audience: None,
					client_auth_method: ClientAuthMethod::default(),
				},
			},
			name: String::new(),
		}
	}

	#[test]
	fn gateway_uris_get_a_coap_scheme() {
		assert_eq!(
			validate_coap_gateway_uri("coap+tcp://hub.example:5683")
				.expect("CoAP URI should pass."),
			"coap+tcp://hub.example:5683"
		);
		assert_eq!(
			validate_coap_gateway_uri("hub.example:5684").expect("Bare host should be prefixed."),
			"coaps+tcp://hub.example:5684"
		);
		assert_eq!(
			validate_coap_gateway_uri("127.0.0.1:5684").expect("Bare IP should be prefixed."),
			"coaps+tcp://127.0.0.1:5684"
		);
		assert!(validate_coap_gateway_uri("").is_err());
	}

	#[test]
	fn hub_validation_normalizes_and_fills_defaults() {
		let mut hub = hub_fixture("hub-1");

		hub.gateways = vec!["hub.example:5684".into(), "coaps+tcp://hub.example:5684".into()];
		hub.validate(Some("owner-1")).expect("Hub fixture should validate.");

		assert_eq!(hub.gateways, vec!["coaps+tcp://hub.example:5684".to_owned()]);
		assert_eq!(hub.name, "hub-1");
		assert_eq!(hub.hub_id().as_ref(), "hub-1");
	}

	#[test]
	fn hub_validation_rejects_foreign_owner() {
		let mut hub = hub_fixture("hub-1");
		let err = hub.validate(Some("owner-2")).expect_err("Foreign owner should be rejected.");

		assert_eq!(err.to_string(), "Invalid `owner`: expects `owner-2`.");
	}

	#[test]
	fn hub_validation_reports_nested_paths() {
		let mut hub = hub_fixture("hub-1");

		hub.authorization.provider.client_id.clear();

		let err = hub.validate(None).expect_err("Missing client ID should be rejected.");

		assert_eq!(err.to_string(), "Invalid `authorization.provider.client_id`: is empty.");
	}
}
