// self
use super::{
	Step, describe_token_error, encode_error, find_linked_hub, provision_status, unsupported_method,
};
use crate::{
	_prelude::*,
	auth::{TokenSecret, owner_to_uuid},
	ca::SignCertificateRequest,
	coap::{Code, CoapResponse, Method},
	hub::LinkedHub,
	model::{CredentialStatus, PreSharedKey},
	schema::{
		self, Bytes, Credential, CredentialData, CredentialUpdate, CredentialsRequest,
		ENCODING_PEM,
	},
	x509::{self, Certificate},
};

#[derive(Default)]
struct Issued {
	identity_certificate_pem: String,
	pre_shared_key: Option<PreSharedKey>,
	credentials: Vec<Credential>,
}

pub(super) async fn process(step: Step<'_>, hubs: &[Arc<LinkedHub>]) -> Result<CoapResponse> {
	if step.request.method != Method::Post {
		return Err(unsupported_method(step.request));
	}

	let mut issued = Issued::default();
	let outcome = provision(step, hubs, &mut issued).await;

	step.session
		.update_provisioning_record(step.ctx, |record| {
			record.credential = Some(CredentialStatus {
				status: provision_status(&outcome),
				identity_certificate_pem: issued.identity_certificate_pem,
				pre_shared_key: issued.pre_shared_key,
				credentials: issued.credentials,
			});
		})
		.await;

	outcome
}

async fn provision(
	step: Step<'_>,
	hubs: &[Arc<LinkedHub>],
	issued: &mut Issued,
) -> Result<CoapResponse> {
	let Step { ctx, request, session, group } = step;
	let body = request.decode::<CredentialsRequest>().map_err(|err| {
		Error::status(Code::BadRequest, format!("cannot parse request: {err}"))
	})?;
	let (hub, _) = find_linked_hub(hubs, &body.selected_gateway).map_err(|err| {
		Error::status(Code::BadRequest, format!("cannot find linked hub: {err}"))
	})?;
	let owner_claim = &hub.hub().authorization.owner_claim;
	let claims = BTreeMap::from([(owner_claim.clone(), group.owner().to_owned())]);
	let token = hub.get_token(ctx, group.owner(), &claims, &claims).await.map_err(|err| {
		Error::status(
			err.coap_code(),
			format!(
				"cannot get token for enrollment group {}: {}",
				group.id(),
				describe_token_error(&err, hub, group)
			),
		)
	})?;
	let chain = sign(step, hub, &body, token.access_token).await?;
	let (Some(trust_anchor), Some(identity)) = (chain.last(), chain.first()) else {
		return Err(Error::status(Code::InternalServerError, "unexpected empty chain"));
	};
	let owner_id = owner_to_uuid(group.owner()).to_string();

	if let Some(key) = group.pre_shared_key() {
		issued.credentials.push(Credential {
			subject: owner_id.clone(),
			credential_type: schema::CREDENTIAL_TYPE_SYMMETRIC_PAIR_WISE,
			usage: None,
			public_data: None,
			private_data: Some(CredentialData::raw(key)),
			tag: schema::DPS_TAG.into(),
		});
		issued.pre_shared_key =
			Some(PreSharedKey { subject_id: owner_id.clone(), key: Bytes(key.to_vec()) });
	}

	let device_id = x509::device_id_from_identity_certificate(identity)
		.map_err(|err| Error::status(Code::BadRequest, err.to_string()))?
		.to_string();

	session.set_device_id(device_id.clone());

	let identity_certificate_pem = x509::certificates_to_pem(&chain[..chain.len() - 1]);

	issued.credentials.push(Credential {
		subject: device_id,
		credential_type: schema::CREDENTIAL_TYPE_ASYMMETRIC_SIGNING_WITH_CERTIFICATE,
		usage: Some(schema::CREDENTIAL_USAGE_CERT.into()),
		public_data: Some(CredentialData::pem(identity_certificate_pem.clone())),
		private_data: None,
		tag: schema::DPS_TAG.into(),
	});
	issued.credentials.push(Credential {
		subject: owner_id,
		credential_type: schema::CREDENTIAL_TYPE_ASYMMETRIC_SIGNING_WITH_CERTIFICATE,
		usage: Some(schema::CREDENTIAL_USAGE_TRUST_CA.into()),
		public_data: Some(CredentialData::pem(trust_anchor.to_pem())),
		private_data: None,
		tag: schema::DPS_TAG.into(),
	});
	issued.identity_certificate_pem = identity_certificate_pem;

	let update = CredentialUpdate { credentials: issued.credentials.clone() };

	CoapResponse::with_payload(Code::Changed, request, &update)
		.map_err(|err| encode_error("credentials", err))
}

/// Signs the CSR through the hub authority; requests without a CSR yield no chain.
async fn sign(
	step: Step<'_>,
	hub: &LinkedHub,
	body: &CredentialsRequest,
	access_token: TokenSecret,
) -> Result<Vec<Certificate>> {
	if body.csr.data.is_empty() {
		return Ok(Vec::new());
	}
	if body.csr.encoding != ENCODING_PEM {
		return Err(Error::status(
			Code::BadRequest,
			format!("unsupported encoding ({})", body.csr.encoding),
		));
	}

	let request = SignCertificateRequest {
		certificate_signing_request: body.csr.data.clone().into_bytes(),
		access_token,
	};
	let response = hub.signer().sign_identity_certificate(step.ctx, request).await.map_err(|err| {
		Error::status(err.coap_code(), format!("cannot sign identity certificate: {err}"))
	})?;

	x509::parse_pem_chain(&response.certificate).map_err(|err| {
		Error::status(Code::BadRequest, format!("cannot parse chain of X509 certs: {err}"))
	})
}
