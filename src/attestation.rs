//! TLS peer certificate attestation against enrollment groups.

// crates.io
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	cache::ExpiringMap,
	context::RequestContext,
	enrollment::EnrollmentGroupsCache,
	x509::{self, Certificate, CertificateError},
};

/// Boxed future returned by [`AuthHandler`] operations.
pub type AuthFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Chains accepted for one peer; each starts with the leaf and ends with a trust anchor.
pub type VerifiedChains = Arc<[Vec<Certificate>]>;

/// Reasons a presented certificate chain is not accepted.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum AttestationError {
	/// Peer sent no certificate.
	#[error("Peer presented an empty certificate chain.")]
	EmptyChain,
	/// A presented certificate could not be parsed.
	#[error(transparent)]
	Certificate(#[from] CertificateError),
	/// Leaf lacks the TLS client-auth extended key usage.
	#[error("Certificate `{subject}` is not valid for client authentication.")]
	MissingClientAuth {
		/// Leaf common name.
		subject: String,
	},
	/// No enrollment group is indexed under the presented issuer names.
	#[error("No enrollment group matches issuers {issuers:?}.")]
	NoMatchingGroup {
		/// Issuer common names of the presented chain.
		issuers: Vec<String>,
	},
	/// Candidate groups exist but none of their chains verifies the peer.
	#[error("Certificate chain is not trusted by any enrollment group: {reason}")]
	Untrusted {
		/// Last verification failure.
		reason: String,
	},
	/// No verified chain was bound to the connection.
	#[error("Unable to find enrollment group for empty certificate chain.")]
	NoVerifiedChain,
}

/// Handshake-time certificate verification strategy.
pub trait AuthHandler
where
	Self: Send + Sync,
{
	/// Verifies the raw DER chain presented by a peer and returns the accepted chains.
	fn verify_peer_certificate<'a>(
		&'a self,
		raw_certs: &'a [Vec<u8>],
	) -> AuthFuture<'a, VerifiedChains>;

	/// Cache of chains accepted recently, keyed by [`leaf_hash`].
	fn verified_chains(&self) -> &VerifiedChainsCache;
}

/// Accepted chains keyed by the hash of the leaf; entries live while connections reuse them.
pub type VerifiedChainsCache = ExpiringMap<u64, VerifiedChains>;

/// 64-bit hash of a DER certificate.
pub fn leaf_hash(der: &[u8]) -> u64 {
	let digest = Sha256::digest(der);
	let mut prefix = [0_u8; 8];

	prefix.copy_from_slice(&digest[..8]);

	u64::from_be_bytes(prefix)
}

/// Verifies peers against the enrollment groups indexed by their issuer names.
pub struct DefaultAuthHandler {
	groups: Arc<EnrollmentGroupsCache>,
	chains: VerifiedChainsCache,
	inactivity_timeout: Duration,
}
impl DefaultAuthHandler {
	/// Creates the handler; accepted chains are cached for `inactivity_timeout`.
	pub fn new(groups: Arc<EnrollmentGroupsCache>, inactivity_timeout: Duration) -> Self {
		Self { groups, chains: ExpiringMap::new(inactivity_timeout), inactivity_timeout }
	}

	async fn verify(&self, raw_certs: &[Vec<u8>]) -> Result<VerifiedChains> {
		if raw_certs.is_empty() {
			return Err(AttestationError::EmptyChain.into());
		}

		let presented = x509::parse_der_chain(raw_certs).map_err(AttestationError::from)?;
		let leaf = &presented[0];

		if !leaf.has_client_auth() {
			return Err(AttestationError::MissingClientAuth {
				subject: leaf.subject_common_name().to_owned(),
			}
			.into());
		}

		let key = leaf_hash(leaf.der());

		if let Some(chains) = self.chains.get(&key) {
			return Ok(chains);
		}

		let mut issuers = Vec::<String>::new();

		for cert in &presented {
			let issuer = cert.issuer_common_name();

			if !issuer.is_empty() && !issuers.iter().any(|known| known == issuer) {
				issuers.push(issuer.to_owned());
			}
		}

		let ctx = RequestContext::with_timeout(self.inactivity_timeout);
		let mut verified = None;
		let mut last_failure = None;

		self.groups
			.get_enrollment_groups_by_issuer_names(&ctx, &issuers, |group| {
				let at = if group.expired_certificate_enabled() {
					leaf.validity_midpoint()
				} else {
					OffsetDateTime::now_utc()
				};

				match x509::verify_chain(&presented, group.attestation_chain(), at) {
					Ok(chain) => {
						verified = Some(chain);

						false
					},
					Err(err) => {
						last_failure = Some(err);

						true
					},
				}
			})
			.await?;

		let Some(chain) = verified else {
			let err = match last_failure {
				Some(err) => AttestationError::Untrusted { reason: err.to_string() },
				None => AttestationError::NoMatchingGroup { issuers },
			};

			return Err(err.into());
		};
		let chains: VerifiedChains = Arc::from(vec![chain]);

		self.chains.insert(key, chains.clone());

		Ok(chains)
	}
}
impl AuthHandler for DefaultAuthHandler {
	fn verify_peer_certificate<'a>(
		&'a self,
		raw_certs: &'a [Vec<u8>],
	) -> AuthFuture<'a, VerifiedChains> {
		Box::pin(self.verify(raw_certs))
	}

	fn verified_chains(&self) -> &VerifiedChainsCache {
		&self.chains
	}
}
impl Debug for DefaultAuthHandler {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("DefaultAuthHandler")
			.field("chains", &self.chains)
			.field("inactivity_timeout", &self.inactivity_timeout)
			.finish_non_exhaustive()
	}
}
