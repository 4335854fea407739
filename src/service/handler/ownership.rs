// self
use super::{Step, encode_error, provision_status, unsupported_method};
use crate::{
	_prelude::*,
	auth::owner_to_uuid,
	coap::{Code, CoapResponse, Method},
	model::OwnershipStatus,
	schema::Doxm,
};

pub(super) async fn process(step: Step<'_>) -> Result<CoapResponse> {
	if step.request.method != Method::Get {
		return Err(unsupported_method(step.request));
	}

	let owner = owner_to_uuid(step.group.owner()).to_string();
	let outcome = CoapResponse::with_payload(
		Code::Content,
		step.request,
		&Doxm { owner_id: owner.clone() },
	)
	.map_err(|err| encode_error("ownership", err));

	step.session
		.update_provisioning_record(step.ctx, |record| {
			record.ownership = Some(OwnershipStatus { status: provision_status(&outcome), owner });
		})
		.await;

	outcome
}
