//! Service configuration.

// self
use crate::{
	_prelude::*,
	auth::{EnrollmentGroupId, TokenSecret},
	error::ConfigError,
	model::{EnrollmentGroup, Hub, X509Attestation},
};

/// Engine configuration; durations are written in seconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
	/// Bound of every request context and the TTL of verified chains.
	#[serde(with = "seconds", default = "default_inactivity_timeout")]
	pub inactivity_timeout: Duration,
	/// TTL of cached enrollment groups and linked hubs.
	#[serde(with = "seconds", default = "default_cache_expiration")]
	pub cache_expiration: Duration,
	/// Sweep period of every hub token cache.
	#[serde(with = "seconds", default = "default_token_cleanup_interval")]
	pub token_cleanup_interval: Duration,
	/// Groups stored when the service starts.
	#[serde(default)]
	pub enrollment_groups: Vec<EnrollmentGroupConfig>,
}
impl Config {
	/// Parses and validates a JSON document.
	pub fn from_json(json: &str) -> Result<Self, ConfigError> {
		let mut deserializer = serde_json::Deserializer::from_str(json);
		let mut config: Self = serde_path_to_error::deserialize(&mut deserializer).map_err(|err| {
			ConfigError::Parse { path: err.path().to_string(), message: err.inner().to_string() }
		})?;

		config.validate()?;

		Ok(config)
	}

	/// Checks every field and normalizes the preconfigured documents.
	pub fn validate(&mut self) -> Result<(), ConfigError> {
		for (field, value) in [
			("inactivity_timeout", self.inactivity_timeout),
			("cache_expiration", self.cache_expiration),
			("token_cleanup_interval", self.token_cleanup_interval),
		] {
			if !value.is_positive() {
				return Err(ConfigError::invalid(field, "must be positive"));
			}
		}

		for (i, group) in self.enrollment_groups.iter_mut().enumerate() {
			group.validate().map_err(|err| err.nested(format_args!("enrollment_groups[{i}]")))?;
		}

		Ok(())
	}
}
impl Default for Config {
	fn default() -> Self {
		Self {
			inactivity_timeout: default_inactivity_timeout(),
			cache_expiration: default_cache_expiration(),
			token_cleanup_interval: default_token_cleanup_interval(),
			enrollment_groups: Vec::new(),
		}
	}
}

/// Enrollment group stored at startup together with its hubs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentGroupConfig {
	/// Group ID.
	pub id: EnrollmentGroupId,
	/// Group owner.
	pub owner: String,
	/// Manufacturer attestation.
	pub attestation: X509Attestation,
	/// Key material for the pre-shared-key credential.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub pre_shared_key: Option<TokenSecret>,
	/// Display name.
	#[serde(default)]
	pub name: String,
	/// Linked hubs, in preference order.
	pub hubs: Vec<Hub>,
}
impl EnrollmentGroupConfig {
	/// Store documents: the group linked to every hub, then the hubs.
	pub fn to_documents(&self) -> (EnrollmentGroup, Vec<Hub>) {
		let group = EnrollmentGroup {
			id: self.id.clone(),
			owner: self.owner.clone(),
			attestation: self.attestation.clone(),
			hub_ids: self.hubs.iter().map(|hub| hub.hub_id().clone()).collect(),
			pre_shared_key: self.pre_shared_key.clone(),
			name: self.name.clone(),
		};

		(group, self.hubs.clone())
	}

	fn validate(&mut self) -> Result<(), ConfigError> {
		if self.hubs.is_empty() {
			return Err(ConfigError::invalid("hubs", "is empty"));
		}

		for (i, hub) in self.hubs.iter_mut().enumerate() {
			hub.validate(Some(&self.owner)).map_err(|err| err.nested(format_args!("hubs[{i}]")))?;
		}

		let (mut group, _) = self.to_documents();

		group.validate()?;

		self.attestation = group.attestation;
		self.name = group.name;

		Ok(())
	}
}

fn default_inactivity_timeout() -> Duration {
	Duration::seconds(20)
}

fn default_cache_expiration() -> Duration {
	Duration::minutes(10)
}

fn default_token_cleanup_interval() -> Duration {
	Duration::minutes(1)
}

mod seconds {
	// crates.io
	use serde::{Deserializer, Serializer};
	// self
	use crate::_prelude::*;

	pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_i64(value.whole_seconds())
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		i64::deserialize(deserializer).map(Duration::seconds)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn defaults_apply_to_missing_fields() {
		let config = Config::from_json("{}").expect("Empty configuration should be valid.");

		assert_eq!(config, Config::default());
		assert_eq!(config.inactivity_timeout, Duration::seconds(20));
	}

	#[test]
	fn parse_errors_name_the_field() {
		let err = Config::from_json(r#"{"cache_expiration":"soon"}"#)
			.expect_err("Textual duration should be rejected.");

		assert!(matches!(err, ConfigError::Parse { ref path, .. } if path == "cache_expiration"));
	}

	#[test]
	fn non_positive_durations_are_rejected() {
		let err = Config::from_json(r#"{"token_cleanup_interval":0}"#)
			.expect_err("Zero interval should be rejected.");

		assert_eq!(err.to_string(), "Invalid `token_cleanup_interval`: must be positive.");
	}

	#[test]
	fn groups_without_hubs_report_their_index() {
		let err = Config::from_json(
			r#"{"enrollment_groups":[{"id":"g1","owner":"alice","attestation":{"certificate_chain":""},"hubs":[]}]}"#,
		)
		.expect_err("Group without hubs should be rejected.");

		assert_eq!(err.to_string(), "Invalid `enrollment_groups[0].hubs`: is empty.");
	}
}
