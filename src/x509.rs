//! X.509 parsing and chain verification for device attestation.

// std
use std::time::Duration as StdDuration;
// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD};
use rustls_pki_types::{CertificateDer, UnixTime};
use uuid::Uuid;
use webpki::{EndEntityCert, KeyUsage};
use x509_parser::{
	certificate::X509Certificate, pem::Pem, prelude::FromDer, time::ASN1Time, x509::X509Name,
};
// self
use crate::_prelude::*;

const PEM_LINE_WIDTH: usize = 64;
const DEVICE_ID_PREFIX: &str = "uuid:";

/// Certificate parsing or verification failure.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum CertificateError {
	/// DER or PEM input could not be decoded.
	#[error("Certificate cannot be parsed: {0}.")]
	Parse(String),
	/// PEM input held no certificate block.
	#[error("Certificate chain is empty.")]
	Empty,
	/// Certificate is outside its validity window at the verification time.
	#[error("Certificate `{subject}` is not valid at {at}.")]
	NotValidAt {
		/// Subject common name.
		subject: String,
		/// Verification time.
		at: OffsetDateTime,
	},
	/// No path to a trust anchor could be built.
	#[error("Certificate `{subject}` does not chain to a trusted authority.")]
	UnknownAuthority {
		/// Subject common name.
		subject: String,
	},
	/// Path building found the issuers but a constraint on the path failed.
	#[error("Certificate `{subject}` was rejected: {reason}.")]
	Rejected {
		/// Subject common name.
		subject: String,
		/// Verifier failure.
		reason: String,
	},
	/// Identity certificate common name does not carry a device ID.
	#[error("Identity certificate common name `{0}` does not carry a device ID.")]
	MissingDeviceId(String),
}

/// Parsed certificate keeping its DER encoding plus the fields the engine inspects.
#[derive(Clone)]
pub struct Certificate {
	der: Arc<[u8]>,
	subject_cn: String,
	issuer_cn: String,
	not_before: OffsetDateTime,
	not_after: OffsetDateTime,
	client_auth: bool,
	public_key: Arc<[u8]>,
}
impl Certificate {
	/// Parses a DER-encoded certificate.
	pub fn from_der(der: &[u8]) -> Result<Self, CertificateError> {
		let (_, cert) = X509Certificate::from_der(der)
			.map_err(|err| CertificateError::Parse(err.to_string()))?;
		let client_auth = cert
			.extended_key_usage()
			.map_err(|err| CertificateError::Parse(err.to_string()))?
			.is_some_and(|eku| eku.value.client_auth || eku.value.any);

		Ok(Self {
			der: Arc::from(der),
			subject_cn: common_name(cert.subject()),
			issuer_cn: common_name(cert.issuer()),
			not_before: to_datetime(cert.validity().not_before)?,
			not_after: to_datetime(cert.validity().not_after)?,
			client_auth,
			public_key: Arc::from(cert.public_key().raw),
		})
	}

	/// DER encoding.
	pub fn der(&self) -> &[u8] {
		&self.der
	}

	/// Subject common name; empty when absent.
	pub fn subject_common_name(&self) -> &str {
		&self.subject_cn
	}

	/// Issuer common name; empty when absent.
	pub fn issuer_common_name(&self) -> &str {
		&self.issuer_cn
	}

	/// DER-encoded SubjectPublicKeyInfo.
	pub fn public_key_der(&self) -> &[u8] {
		&self.public_key
	}

	/// Start of the validity window.
	pub fn not_before(&self) -> OffsetDateTime {
		self.not_before
	}

	/// End of the validity window.
	pub fn not_after(&self) -> OffsetDateTime {
		self.not_after
	}

	/// Returns true when the certificate allows TLS client authentication.
	pub fn has_client_auth(&self) -> bool {
		self.client_auth
	}

	/// Returns true when `at` lies inside the validity window.
	pub fn is_valid_at(&self, at: OffsetDateTime) -> bool {
		self.not_before <= at && at <= self.not_after
	}

	/// Midpoint of the validity window.
	pub fn validity_midpoint(&self) -> OffsetDateTime {
		self.not_before + (self.not_after - self.not_before) / 2
	}

	/// Returns true when `issuer` names and signed this certificate.
	pub fn is_signed_by(&self, issuer: &Certificate) -> bool {
		let (Ok((_, cert)), Ok((_, parent))) =
			(X509Certificate::from_der(&self.der), X509Certificate::from_der(&issuer.der))
		else {
			return false;
		};

		cert.issuer().as_raw() == parent.subject().as_raw()
			&& cert.verify_signature(Some(parent.public_key())).is_ok()
	}

	/// PEM encoding with 64-column lines.
	pub fn to_pem(&self) -> String {
		let body = STANDARD.encode(&self.der);
		let mut pem = String::with_capacity(body.len() + body.len() / PEM_LINE_WIDTH + 64);

		pem.push_str("-----BEGIN CERTIFICATE-----\n");

		for line in body.as_bytes().chunks(PEM_LINE_WIDTH) {
			pem.push_str(&String::from_utf8_lossy(line));
			pem.push('\n');
		}

		pem.push_str("-----END CERTIFICATE-----\n");

		pem
	}
}
impl PartialEq for Certificate {
	fn eq(&self, other: &Self) -> bool {
		self.der == other.der
	}
}
impl Eq for Certificate {}
impl Debug for Certificate {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Certificate")
			.field("subject", &self.subject_cn)
			.field("issuer", &self.issuer_cn)
			.field("not_after", &self.not_after)
			.finish_non_exhaustive()
	}
}

/// Parses every `CERTIFICATE` block of a PEM bundle, in order.
pub fn parse_pem_chain(pem: &[u8]) -> Result<Vec<Certificate>, CertificateError> {
	let mut chain = Vec::new();

	for block in Pem::iter_from_buffer(pem) {
		let block = block.map_err(|err| CertificateError::Parse(err.to_string()))?;

		if block.label == "CERTIFICATE" {
			chain.push(Certificate::from_der(&block.contents)?);
		}
	}

	if chain.is_empty() {
		return Err(CertificateError::Empty);
	}

	Ok(chain)
}

/// Parses a chain of raw DER certificates as presented in a TLS handshake.
pub fn parse_der_chain(raw_certs: &[Vec<u8>]) -> Result<Vec<Certificate>, CertificateError> {
	if raw_certs.is_empty() {
		return Err(CertificateError::Empty);
	}

	raw_certs.iter().map(|der| Certificate::from_der(der)).collect()
}

/// Concatenated PEM encoding of `certs`.
pub fn certificates_to_pem(certs: &[Certificate]) -> String {
	certs.iter().map(Certificate::to_pem).collect()
}

/// Provisioning record key: a name-based UUID over the leaf's public key in the X.500 namespace.
pub fn manufacturer_certificate_id(leaf: &Certificate) -> Uuid {
	Uuid::new_v5(&Uuid::NAMESPACE_X500, leaf.public_key_der())
}

/// Extracts the device ID from an identity certificate common name of the form `uuid:<id>`.
pub fn device_id_from_identity_certificate(cert: &Certificate) -> Result<Uuid, CertificateError> {
	let cn = cert.subject_common_name();

	cn.strip_prefix(DEVICE_ID_PREFIX)
		.and_then(|raw| Uuid::parse_str(raw).ok())
		.ok_or_else(|| CertificateError::MissingDeviceId(cn.to_owned()))
}

/// Builds a verified path from `presented[0]` to one of `anchors`, checking validity at `at`.
///
/// `presented[1..]` may supply intermediates. Every issuer on the path must be a CA and the leaf
/// must permit client authentication. The returned chain starts with the leaf and ends with the
/// anchor.
pub fn verify_chain(
	presented: &[Certificate],
	anchors: &[Certificate],
	at: OffsetDateTime,
) -> Result<Vec<Certificate>, CertificateError> {
	let leaf = presented.first().ok_or(CertificateError::Empty)?;

	if anchors.contains(leaf) {
		ensure_valid(leaf, at)?;

		return Ok(vec![leaf.clone()]);
	}

	let anchor_ders =
		anchors.iter().map(|cert| CertificateDer::from(cert.der())).collect::<Vec<_>>();
	let trust_anchors = anchor_ders
		.iter()
		.map(webpki::anchor_from_trusted_cert)
		.collect::<Result<Vec<_>, _>>()
		.map_err(|err| CertificateError::Parse(format!("{err:?}")))?;
	let intermediates =
		presented[1..].iter().map(|cert| CertificateDer::from(cert.der())).collect::<Vec<_>>();
	let leaf_der = CertificateDer::from(leaf.der());
	let end_entity = EndEntityCert::try_from(&leaf_der)
		.map_err(|err| CertificateError::Parse(format!("{err:?}")))?;
	let path = end_entity
		.verify_for_usage(
			webpki::ALL_VERIFICATION_ALGS,
			&trust_anchors,
			&intermediates,
			unix_time(at),
			KeyUsage::client_auth(),
			None,
			None,
		)
		.map_err(|err| rejection(leaf, at, err))?;
	let mut chain = vec![leaf.clone()];

	for cert in path.intermediate_certificates() {
		let der = cert.der();
		let intermediate = presented[1..]
			.iter()
			.find(|candidate| candidate.der() == der.as_ref())
			.ok_or_else(|| unknown_authority(leaf))?;

		chain.push(intermediate.clone());
	}

	let last = chain.last().ok_or(CertificateError::Empty)?;
	let anchor = anchors
		.iter()
		.find(|anchor| last.is_signed_by(anchor))
		.ok_or_else(|| unknown_authority(leaf))?;

	ensure_valid(anchor, at)?;
	chain.push(anchor.clone());

	Ok(chain)
}

fn rejection(leaf: &Certificate, at: OffsetDateTime, err: webpki::Error) -> CertificateError {
	match err {
		webpki::Error::CertExpired { .. } | webpki::Error::CertNotValidYet { .. } =>
			CertificateError::NotValidAt { subject: leaf.subject_common_name().to_owned(), at },
		webpki::Error::UnknownIssuer => unknown_authority(leaf),
		err => CertificateError::Rejected {
			subject: leaf.subject_common_name().to_owned(),
			reason: format!("{err:?}"),
		},
	}
}

fn unknown_authority(leaf: &Certificate) -> CertificateError {
	CertificateError::UnknownAuthority { subject: leaf.subject_common_name().to_owned() }
}

fn unix_time(at: OffsetDateTime) -> UnixTime {
	let secs = u64::try_from(at.unix_timestamp()).unwrap_or(0);

	UnixTime::since_unix_epoch(StdDuration::from_secs(secs))
}

fn ensure_valid(cert: &Certificate, at: OffsetDateTime) -> Result<(), CertificateError> {
	if cert.is_valid_at(at) {
		Ok(())
	} else {
		Err(CertificateError::NotValidAt { subject: cert.subject_common_name().to_owned(), at })
	}
}

fn common_name(name: &X509Name) -> String {
	name.iter_common_name()
		.next()
		.and_then(|cn| cn.as_str().ok())
		.map(ToOwned::to_owned)
		.unwrap_or_default()
}

fn to_datetime(time: ASN1Time) -> Result<OffsetDateTime, CertificateError> {
	OffsetDateTime::from_unix_timestamp(time.timestamp())
		.map_err(|err| CertificateError::Parse(err.to_string()))
}

#[cfg(test)]
mod tests {
	// crates.io
	use rcgen::{
		BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair,
		KeyUsagePurpose,
	};
	// self
	use super::*;

	struct Authority {
		params: CertificateParams,
		key: KeyPair,
		cert: Certificate,
	}

	fn authority(cn: &str) -> Authority {
		let mut params = CertificateParams::default();

		params.distinguished_name.push(DnType::CommonName, cn);
		params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
		params.key_usages.push(KeyUsagePurpose::KeyCertSign);

		let key = KeyPair::generate().expect("CA key should generate.");
		let cert = params.self_signed(&key).expect("CA should self-sign.");
		let cert = Certificate::from_der(cert.der()).expect("CA certificate should parse.");

		Authority { params, key, cert }
	}

	fn leaf(ca: &Authority, cn: &str, client_auth: bool) -> Certificate {
		let mut params = CertificateParams::default();

		params.distinguished_name.push(DnType::CommonName, cn);

		if client_auth {
			params.extended_key_usages.push(ExtendedKeyUsagePurpose::ClientAuth);
		}

		let key = KeyPair::generate().expect("Leaf key should generate.");
		let issuer = Issuer::from_params(&ca.params, &ca.key);
		let cert = params.signed_by(&key, &issuer).expect("Leaf should be signed.");

		Certificate::from_der(cert.der()).expect("Leaf certificate should parse.")
	}

	#[test]
	fn parses_pem_and_exposes_names() {
		let ca = authority("Manufacturer CA");
		let device = leaf(&ca, "device-1", true);
		let pem = certificates_to_pem(&[device.clone(), ca.cert.clone()]);
		let chain = parse_pem_chain(pem.as_bytes()).expect("PEM chain should parse.");

		assert_eq!(chain.len(), 2);
		assert_eq!(chain[0], device);
		assert_eq!(chain[0].subject_common_name(), "device-1");
		assert_eq!(chain[0].issuer_common_name(), "Manufacturer CA");
		assert!(chain[0].has_client_auth());
		assert!(matches!(parse_pem_chain(b"not a pem"), Err(CertificateError::Empty)));
	}

	#[test]
	fn verifies_against_anchor() {
		let ca = authority("Manufacturer CA");
		let other = authority("Other CA");
		let device = leaf(&ca, "device-1", true);
		let now = OffsetDateTime::now_utc();
		let chain = verify_chain(&[device.clone()], &[ca.cert.clone()], now)
			.expect("Chain should verify against its issuer.");

		assert_eq!(chain, vec![device.clone(), ca.cert.clone()]);
		assert!(matches!(
			verify_chain(&[device], &[other.cert], now),
			Err(CertificateError::UnknownAuthority { .. })
		));
	}

	#[test]
	fn rejects_certificates_outside_validity() {
		let ca = authority("Manufacturer CA");
		let device = leaf(&ca, "device-1", true);
		let later = device.not_after() + Duration::days(1);

		assert!(matches!(
			verify_chain(&[device.clone()], &[ca.cert.clone()], later),
			Err(CertificateError::NotValidAt { .. })
		));
		assert!(device.is_valid_at(device.validity_midpoint()));
	}

	#[test]
	fn end_entities_cannot_issue_leaves() {
		let ca = authority("Manufacturer CA");
		let mut device_params = CertificateParams::default();

		device_params.distinguished_name.push(DnType::CommonName, "device-1");
		device_params.is_ca = IsCa::ExplicitNoCa;
		device_params.extended_key_usages.push(ExtendedKeyUsagePurpose::ClientAuth);

		let device_key = KeyPair::generate().expect("Device key should generate.");
		let device = device_params
			.signed_by(&device_key, &Issuer::from_params(&ca.params, &ca.key))
			.expect("Device certificate should be signed.");
		let device = Certificate::from_der(device.der()).expect("Device certificate should parse.");
		let mut forged_params = CertificateParams::default();

		forged_params.distinguished_name.push(DnType::CommonName, "device-2");
		forged_params.extended_key_usages.push(ExtendedKeyUsagePurpose::ClientAuth);

		let forged_key = KeyPair::generate().expect("Forged key should generate.");
		let forged = forged_params
			.signed_by(&forged_key, &Issuer::from_params(&device_params, &device_key))
			.expect("Forged leaf should be signed.");
		let forged = Certificate::from_der(forged.der()).expect("Forged leaf should parse.");
		let now = OffsetDateTime::now_utc();

		assert!(forged.is_signed_by(&device));
		assert!(verify_chain(&[device.clone()], &[ca.cert.clone()], now).is_ok());
		assert!(verify_chain(&[forged, device], &[ca.cert], now).is_err());
	}

	#[test]
	fn leaves_without_client_auth_are_rejected() {
		let ca = authority("Manufacturer CA");
		let mut params = CertificateParams::default();

		params.distinguished_name.push(DnType::CommonName, "server-1");
		params.extended_key_usages.push(ExtendedKeyUsagePurpose::ServerAuth);

		let key = KeyPair::generate().expect("Leaf key should generate.");
		let server = params
			.signed_by(&key, &Issuer::from_params(&ca.params, &ca.key))
			.expect("Leaf should be signed.");
		let server = Certificate::from_der(server.der()).expect("Leaf should parse.");

		assert!(matches!(
			verify_chain(&[server], &[ca.cert], OffsetDateTime::now_utc()),
			Err(CertificateError::Rejected { .. })
		));
	}

	#[test]
	fn identity_certificate_device_id() {
		let ca = authority("Hub CA");
		let id = Uuid::new_v5(&Uuid::NAMESPACE_URL, b"device");
		let identity = leaf(&ca, &format!("uuid:{id}"), true);

		assert_eq!(device_id_from_identity_certificate(&identity), Ok(id));

		let plain = leaf(&ca, "device", true);

		assert!(device_id_from_identity_certificate(&plain).is_err());
	}

	#[test]
	fn manufacturer_id_tracks_public_key() {
		let ca = authority("Manufacturer CA");
		let device = leaf(&ca, "device-1", false);

		assert!(!device.has_client_auth());
		assert_eq!(manufacturer_certificate_id(&device), manufacturer_certificate_id(&device));
		assert_ne!(manufacturer_certificate_id(&device), manufacturer_certificate_id(&ca.cert));
	}
}
