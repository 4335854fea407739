// crates.io
use time::format_description::well_known::Rfc3339;
// self
use super::{Step, encode_error, provision_status, unsupported_method};
use crate::{
	_prelude::*,
	coap::{Code, CoapResponse, Method},
	model::PlgdTimeStatus,
	schema::PlgdTime,
};

pub(super) async fn process(step: Step<'_>) -> Result<CoapResponse> {
	if step.request.method != Method::Get {
		return Err(unsupported_method(step.request));
	}

	let outcome = respond(step);

	step.session
		.update_provisioning_record(step.ctx, |record| {
			record.plgd_time = Some(PlgdTimeStatus { status: provision_status(&outcome) });
		})
		.await;

	outcome
}

fn respond(step: Step<'_>) -> Result<CoapResponse> {
	let time = OffsetDateTime::now_utc().format(&Rfc3339).map_err(|err| {
		Error::status(Code::InternalServerError, format!("cannot format time: {err}"))
	})?;

	CoapResponse::with_payload(Code::Content, step.request, &PlgdTime { time })
		.map_err(|err| encode_error("time", err))
}
