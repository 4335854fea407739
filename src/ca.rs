//! Certificate authority collaborator contract.
//!
//! Each linked hub owns one [`CertificateSigner`] dialed through a [`SignerConnector`]; the
//! credentials step uses it to turn a device CSR into an identity certificate chain.

// self
use crate::{_prelude::*, auth::TokenSecret, context::RequestContext, model::Hub};

/// Boxed future returned by certificate authority operations.
pub type SignFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Identity certificate signing request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignCertificateRequest {
	/// PEM-encoded PKCS#10 request.
	pub certificate_signing_request: Vec<u8>,
	/// Owner-scoped token authorizing the request at the hub.
	pub access_token: TokenSecret,
}

/// Identity certificate signing response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignCertificateResponse {
	/// PEM chain: the identity certificate first, the hub trust anchor last.
	pub certificate: Vec<u8>,
}

/// Remote certificate authority of one hub.
pub trait CertificateSigner
where
	Self: Send + Sync,
{
	/// Signs a generic CSR and returns the PEM certificate.
	fn sign<'a>(&'a self, ctx: &'a RequestContext, csr_pem: &'a [u8]) -> SignFuture<'a, Vec<u8>>;

	/// Signs a device identity CSR; the subject common name becomes `uuid:<device id>`.
	fn sign_identity_certificate<'a>(
		&'a self,
		ctx: &'a RequestContext,
		request: SignCertificateRequest,
	) -> SignFuture<'a, SignCertificateResponse>;

	/// Releases the connection; later calls may fail with [`Error::Closed`].
	fn close(&self);
}

/// Opens certificate authority connections for hubs.
pub trait SignerConnector
where
	Self: Send + Sync,
{
	/// Connects to the authority configured by `hub.certificate_authority`.
	fn connect<'a>(
		&'a self,
		ctx: &'a RequestContext,
		hub: &'a Hub,
	) -> SignFuture<'a, Arc<dyn CertificateSigner>>;
}

/// Wraps a collaborator failure as [`Error::Signing`].
pub fn signing_error(message: impl Display) -> Error {
	Error::Signing { message: message.to_string() }
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn signing_failures_are_transient() {
		let err = signing_error("authority unreachable");

		assert!(err.is_transient());
		assert_eq!(err.to_string(), "Certificate authority failed: authority unreachable.");
	}
}
