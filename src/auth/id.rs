//! Strongly typed identifiers for enrollment groups, hubs, and provisioning records.

// std
use std::{
	borrow::{Borrow, Cow},
	cmp::Ordering,
	hash::Hasher,
	marker::PhantomData,
	ops::Deref,
};
// crates.io
use serde::{Deserializer, Serializer, de::Error as DeError};
// self
use crate::_prelude::*;

const IDENTIFIER_MAX_LEN: usize = 128;

/// Marker describing one identifier namespace.
pub trait IdKind {
	/// Name used in debug output and validation errors.
	const NAME: &'static str;
}

/// Enrollment group document namespace.
#[derive(Clone, Copy, Debug)]
pub enum EnrollmentGroupKind {}
impl IdKind for EnrollmentGroupKind {
	const NAME: &'static str = "EnrollmentGroup";
}

/// Hub namespace, shared by document IDs and the IDs handed to devices.
#[derive(Clone, Copy, Debug)]
pub enum HubKind {}
impl IdKind for HubKind {
	const NAME: &'static str = "Hub";
}

/// Provisioning record namespace.
#[derive(Clone, Copy, Debug)]
pub enum RecordKind {}
impl IdKind for RecordKind {
	const NAME: &'static str = "Record";
}

/// Identifier of an enrollment group document.
pub type EnrollmentGroupId = Id<EnrollmentGroupKind>;
/// Identifier of a hub document or the external hub ID handed to devices.
pub type HubId = Id<HubKind>;
/// Provisioning record key derived from the manufacturer certificate.
pub type RecordId = Id<RecordKind>;

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// Nothing was supplied.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// Identifier namespace.
		kind: &'static str,
	},
	/// Whitespace never survives store round trips.
	#[error("{kind} identifier contains whitespace.")]
	ContainsWhitespace {
		/// Identifier namespace.
		kind: &'static str,
	},
	/// Longer than [`IDENTIFIER_MAX_LEN`] bytes.
	#[error("{kind} identifier exceeds {max} characters.")]
	TooLong {
		/// Identifier namespace.
		kind: &'static str,
		/// Maximum permitted length.
		max: usize,
	},
}

/// Validated, non-empty identifier in the `K` namespace.
pub struct Id<K> {
	value: Arc<str>,
	kind: PhantomData<fn() -> K>,
}
impl<K> Id<K>
where
	K: IdKind,
{
	/// Validates `value` and wraps it.
	pub fn new(value: impl AsRef<str>) -> Result<Self, IdentifierError> {
		let value = value.as_ref();

		if value.is_empty() {
			Err(IdentifierError::Empty { kind: K::NAME })
		} else if value.chars().any(char::is_whitespace) {
			Err(IdentifierError::ContainsWhitespace { kind: K::NAME })
		} else if value.len() > IDENTIFIER_MAX_LEN {
			Err(IdentifierError::TooLong { kind: K::NAME, max: IDENTIFIER_MAX_LEN })
		} else {
			Ok(Self { value: value.into(), kind: PhantomData })
		}
	}
}
impl<K> Clone for Id<K> {
	fn clone(&self) -> Self {
		Self { value: self.value.clone(), kind: PhantomData }
	}
}
impl<K> PartialEq for Id<K> {
	fn eq(&self, other: &Self) -> bool {
		self.value == other.value
	}
}
impl<K> Eq for Id<K> {}
impl<K> PartialOrd for Id<K> {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}
impl<K> Ord for Id<K> {
	fn cmp(&self, other: &Self) -> Ordering {
		self.value.cmp(&other.value)
	}
}
impl<K> Hash for Id<K> {
	// Must hash like `str` so `Borrow<str>` lookups work.
	fn hash<H>(&self, state: &mut H)
	where
		H: Hasher,
	{
		self.value.as_ref().hash(state);
	}
}
impl<K> Deref for Id<K> {
	type Target = str;

	fn deref(&self) -> &str {
		&self.value
	}
}
impl<K> AsRef<str> for Id<K> {
	fn as_ref(&self) -> &str {
		&self.value
	}
}
impl<K> Borrow<str> for Id<K> {
	fn borrow(&self) -> &str {
		&self.value
	}
}
impl<K> Debug for Id<K>
where
	K: IdKind,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "{}({})", K::NAME, self.value)
	}
}
impl<K> Display for Id<K> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.value)
	}
}
impl<K> FromStr for Id<K>
where
	K: IdKind,
{
	type Err = IdentifierError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::new(s)
	}
}
impl<K> From<Id<K>> for String {
	fn from(id: Id<K>) -> Self {
		id.value.to_string()
	}
}
impl<K> Serialize for Id<K> {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&self.value)
	}
}
impl<'de, K> Deserialize<'de> for Id<K>
where
	K: IdKind,
{
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let value = <Cow<'de, str>>::deserialize(deserializer)?;

		Self::new(value).map_err(DeError::custom)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn padded_or_blank_identifiers_are_rejected() {
		assert_eq!(
			HubId::new(" hub-1").expect_err("Leading whitespace should be rejected."),
			IdentifierError::ContainsWhitespace { kind: "Hub" }
		);
		assert_eq!(
			EnrollmentGroupId::new("").expect_err("Empty group ID should be rejected."),
			IdentifierError::Empty { kind: "EnrollmentGroup" }
		);

		let hub = HubId::new("hub-1").expect("Hub fixture should be valid.");

		assert_eq!(hub.as_ref(), "hub-1");
		assert_eq!(format!("{hub:?}"), "Hub(hub-1)");
	}

	#[test]
	fn documents_reject_invalid_identifiers() {
		let group: EnrollmentGroupId =
			serde_json::from_str("\"group-42\"").expect("Group ID should deserialize.");

		assert_eq!(group.to_string(), "group-42");
		assert_eq!(
			serde_json::to_string(&group).expect("Group ID should serialize."),
			"\"group-42\""
		);
		assert!(serde_json::from_str::<EnrollmentGroupId>("\"with space\"").is_err());
		assert!(RecordId::new("a".repeat(IDENTIFIER_MAX_LEN)).is_ok());
		assert!(RecordId::new("a".repeat(IDENTIFIER_MAX_LEN + 1)).is_err());
	}

	#[test]
	fn maps_look_up_by_plain_strings() {
		let hubs = HashMap::from([(HubId::new("hub-1").expect("Hub ID should be valid."), 7_u8)]);

		assert_eq!(hubs.get("hub-1"), Some(&7));
	}
}
