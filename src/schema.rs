//! OCF resource payloads exchanged with devices during provisioning.

// crates.io
use serde::{
	Deserializer, Serializer,
	de::{self, SeqAccess, Visitor},
	ser::SerializeStruct,
};
// self
use crate::_prelude::*;

/// Tag attached to every credential issued by the provisioning service.
pub const DPS_TAG: &str = "dps";
/// Credential type: symmetric pair-wise key.
pub const CREDENTIAL_TYPE_SYMMETRIC_PAIR_WISE: u8 = 1;
/// Credential type: asymmetric signing key with certificate.
pub const CREDENTIAL_TYPE_ASYMMETRIC_SIGNING_WITH_CERTIFICATE: u8 = 8;
/// Credential usage: identity certificate.
pub const CREDENTIAL_USAGE_CERT: &str = "oic.sec.cred.cert";
/// Credential usage: trusted CA.
pub const CREDENTIAL_USAGE_TRUST_CA: &str = "oic.sec.cred.trustca";
/// PEM data encoding.
pub const ENCODING_PEM: &str = "oic.sec.encoding.pem";
/// Raw data encoding.
pub const ENCODING_RAW: &str = "oic.sec.encoding.raw";

/// `/x.plgd.dev/time` representation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlgdTime {
	/// RFC 3339 timestamp.
	pub time: String,
}

/// Subset of `/oic/sec/doxm` written by the ownership step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Doxm {
	/// New device owner UUID.
	#[serde(rename = "devowneruuid")]
	pub owner_id: String,
}

/// Cloud endpoint as advertised to devices.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CloudEndpoint {
	/// CoAP gateway URI.
	#[serde(default)]
	pub uri: String,
	/// Hub ID.
	#[serde(default)]
	pub id: String,
}
impl CloudEndpoint {
	/// Returns true when both the URI and the hub ID are set.
	pub fn is_set(&self) -> bool {
		!self.uri.is_empty() && !self.id.is_empty()
	}
}

/// Certificate signing request carried by the credentials step.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Csr {
	/// Encoding of `data`; only PEM is supported.
	#[serde(default)]
	pub encoding: String,
	/// CSR payload.
	#[serde(default)]
	pub data: String,
}

/// Body of `POST /api/v1/provisioning/credentials`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsRequest {
	/// Identity certificate request.
	#[serde(default)]
	pub csr: Csr,
	/// Gateway the device wants to be provisioned for.
	#[serde(default)]
	pub selected_gateway: CloudEndpoint,
}

/// Body of `POST /api/v1/provisioning/cloud-configuration`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudConfigurationRequest {
	/// Device ID.
	#[serde(rename = "di", default)]
	pub device_id: String,
	/// Gateway the device wants to connect to.
	#[serde(default)]
	pub selected_gateway: CloudEndpoint,
}

/// `/CoapCloudConfResURI` update returned by the cloud-configuration step.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudConfigurationUpdate {
	/// Authorization provider name.
	#[serde(rename = "apn")]
	pub authorization_provider: String,
	/// Selected gateway URI.
	#[serde(rename = "cis")]
	pub url: String,
	/// Selected hub ID.
	#[serde(rename = "sid")]
	pub cloud_id: String,
	/// Authorization code.
	#[serde(rename = "at")]
	pub authorization_code: String,
	/// Every gateway the device may fail over to.
	#[serde(rename = "x.org.plgd.cloud.endpoints", default)]
	pub endpoints: Vec<CloudEndpoint>,
}

/// Credential data in the encoding named by `encoding`.
///
/// PEM data is written as a text string, anything else as a byte string.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct CredentialData {
	/// Payload.
	pub data: Bytes,
	/// Payload encoding.
	pub encoding: String,
}
impl CredentialData {
	/// PEM text.
	pub fn pem(pem: impl Into<String>) -> Self {
		Self { data: Bytes(pem.into().into_bytes()), encoding: ENCODING_PEM.into() }
	}

	/// Raw bytes.
	pub fn raw(raw: impl Into<Vec<u8>>) -> Self {
		Self { data: Bytes(raw.into()), encoding: ENCODING_RAW.into() }
	}
}
impl Serialize for CredentialData {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		let mut state = serializer.serialize_struct("CredentialData", 2)?;

		match self.data.as_str() {
			Some(text) if self.encoding == ENCODING_PEM => state.serialize_field("data", text)?,
			_ => state.serialize_field("data", &self.data)?,
		}

		state.serialize_field("encoding", &self.encoding)?;
		state.end()
	}
}

/// One `/oic/sec/cred` entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
	/// Subject UUID.
	#[serde(rename = "subjectuuid")]
	pub subject: String,
	/// Credential type bit mask.
	#[serde(rename = "credtype")]
	pub credential_type: u8,
	/// Credential usage.
	#[serde(rename = "credusage", default, skip_serializing_if = "Option::is_none")]
	pub usage: Option<String>,
	/// Public data.
	#[serde(rename = "publicdata", default, skip_serializing_if = "Option::is_none")]
	pub public_data: Option<CredentialData>,
	/// Private data.
	#[serde(rename = "privatedata", default, skip_serializing_if = "Option::is_none")]
	pub private_data: Option<CredentialData>,
	/// Issuer tag.
	#[serde(default)]
	pub tag: String,
}

/// `/oic/sec/cred` update returned by the credentials step.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialUpdate {
	/// Issued credentials.
	#[serde(rename = "creds", default)]
	pub credentials: Vec<Credential>,
}

/// ACE permission bits.
pub mod permission {
	/// Create.
	pub const CREATE: u8 = 1;
	/// Read.
	pub const READ: u8 = 2;
	/// Write.
	pub const WRITE: u8 = 4;
	/// Delete.
	pub const DELETE: u8 = 8;
	/// Notify.
	pub const NOTIFY: u8 = 16;
	/// Every permission.
	pub const ALL: u8 = CREATE | READ | WRITE | DELETE | NOTIFY;
}

/// ACE subject.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AceSubject {
	/// A device or owner UUID.
	Device {
		/// Subject UUID.
		uuid: String,
	},
	/// Any peer on a connection of the given type.
	Connection {
		/// `anon-clear` or `auth-crypt`.
		conntype: String,
	},
}

/// ACE resource.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AceResource {
	/// Resource path.
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub href: String,
	/// Wildcard.
	#[serde(rename = "wc", default, skip_serializing_if = "String::is_empty")]
	pub wildcard: String,
}
impl AceResource {
	/// Resource addressed by path.
	pub fn href(href: impl Into<String>) -> Self {
		Self { href: href.into(), wildcard: String::new() }
	}

	/// Resources matched by a wildcard.
	pub fn wildcard(wildcard: impl Into<String>) -> Self {
		Self { href: String::new(), wildcard: wildcard.into() }
	}
}

/// One `/oic/sec/acl2` entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessControl {
	/// Who is granted access.
	pub subject: AceSubject,
	/// Permission bit mask.
	pub permission: u8,
	/// Covered resources.
	pub resources: Vec<AceResource>,
	/// Issuer tag.
	#[serde(default)]
	pub tag: String,
}

/// `/oic/sec/acl2` update returned by the ACL step.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControlList {
	/// Access control entries.
	#[serde(rename = "aclist2", default)]
	pub access_controls: Vec<AccessControl>,
}

/// Byte string serialized natively by CBOR; JSON and text inputs are accepted when decoding.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Bytes(pub Vec<u8>);
impl Bytes {
	/// Payload as UTF-8 text, if it is text.
	pub fn as_str(&self) -> Option<&str> {
		std::str::from_utf8(&self.0).ok()
	}
}
impl Debug for Bytes {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "Bytes({} bytes)", self.0.len())
	}
}
impl Serialize for Bytes {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_bytes(&self.0)
	}
}
impl<'de> Deserialize<'de> for Bytes {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		deserializer.deserialize_any(BytesVisitor)
	}
}

struct BytesVisitor;
impl<'de> Visitor<'de> for BytesVisitor {
	type Value = Bytes;

	fn expecting(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("a byte string, a text string, or a sequence of bytes")
	}

	fn visit_bytes<E>(self, v: &[u8]) -> Result<Self::Value, E>
	where
		E: de::Error,
	{
		Ok(Bytes(v.to_vec()))
	}

	fn visit_byte_buf<E>(self, v: Vec<u8>) -> Result<Self::Value, E>
	where
		E: de::Error,
	{
		Ok(Bytes(v))
	}

	fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
	where
		E: de::Error,
	{
		Ok(Bytes(v.as_bytes().to_vec()))
	}

	fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
	where
		A: SeqAccess<'de>,
	{
		let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or_default());

		while let Some(byte) = seq.next_element::<u8>()? {
			bytes.push(byte);
		}

		Ok(Bytes(bytes))
	}
}
