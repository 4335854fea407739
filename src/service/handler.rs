//! Provisioning step handlers.
//!
//! [`RequestHandler`] is the seam between routing and step logic; [`DefaultRequestHandler`]
//! implements the five steps, and wrappers may decorate or replace individual steps.

mod acls;
mod cloud_configuration;
mod credentials;
mod ownership;
mod plgd_time;

// self
use crate::{
	_prelude::*,
	auth::ClaimNotFoundError,
	coap::{Code, CoapRequest, CoapResponse, CodecError},
	context::RequestContext,
	enrollment::EnrollmentGroup,
	hub::LinkedHub,
	model::ProvisionStatus,
	schema::CloudEndpoint,
	session::Session,
};

/// Boxed future returned by [`RequestHandler`] operations.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<CoapResponse>> + 'a + Send>>;

/// Inputs shared by every step.
#[derive(Clone, Copy, Debug)]
pub struct Step<'a> {
	/// Request context bounded by the inactivity timeout.
	pub ctx: &'a RequestContext,
	/// Inbound request.
	pub request: &'a CoapRequest,
	/// Session of the connection.
	pub session: &'a Session,
	/// Enrollment group of the session.
	pub group: &'a Arc<EnrollmentGroup>,
}

/// Step handlers invoked by the service router.
pub trait RequestHandler
where
	Self: Send + Sync,
{
	/// Answers requests for unknown paths.
	fn default_handler<'a>(&'a self, step: Step<'a>) -> HandlerFuture<'a>;

	/// `GET /x.plgd.dev/time`.
	fn process_plgd_time<'a>(&'a self, step: Step<'a>) -> HandlerFuture<'a>;

	/// `GET /api/v1/provisioning/ownership`.
	fn process_ownership<'a>(&'a self, step: Step<'a>) -> HandlerFuture<'a>;

	/// `POST /api/v1/provisioning/credentials`.
	fn process_credentials<'a>(
		&'a self,
		step: Step<'a>,
		hubs: &'a [Arc<LinkedHub>],
	) -> HandlerFuture<'a>;

	/// `GET /api/v1/provisioning/acls`.
	fn process_acls<'a>(&'a self, step: Step<'a>, hubs: &'a [Arc<LinkedHub>]) -> HandlerFuture<'a>;

	/// `POST /api/v1/provisioning/cloud-configuration`.
	fn process_cloud_configuration<'a>(
		&'a self,
		step: Step<'a>,
		hubs: &'a [Arc<LinkedHub>],
	) -> HandlerFuture<'a>;
}

/// Production step handlers.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultRequestHandler;
impl RequestHandler for DefaultRequestHandler {
	fn default_handler<'a>(&'a self, step: Step<'a>) -> HandlerFuture<'a> {
		Box::pin(async move {
			Err(Error::status(Code::NotFound, format!("unknown path {}", step.request.path)))
		})
	}

	fn process_plgd_time<'a>(&'a self, step: Step<'a>) -> HandlerFuture<'a> {
		Box::pin(plgd_time::process(step))
	}

	fn process_ownership<'a>(&'a self, step: Step<'a>) -> HandlerFuture<'a> {
		Box::pin(ownership::process(step))
	}

	fn process_credentials<'a>(
		&'a self,
		step: Step<'a>,
		hubs: &'a [Arc<LinkedHub>],
	) -> HandlerFuture<'a> {
		Box::pin(credentials::process(step, hubs))
	}

	fn process_acls<'a>(&'a self, step: Step<'a>, hubs: &'a [Arc<LinkedHub>]) -> HandlerFuture<'a> {
		Box::pin(acls::process(step, hubs))
	}

	fn process_cloud_configuration<'a>(
		&'a self,
		step: Step<'a>,
		hubs: &'a [Arc<LinkedHub>],
	) -> HandlerFuture<'a> {
		Box::pin(cloud_configuration::process(step, hubs))
	}
}

fn unsupported_method(request: &CoapRequest) -> Error {
	Error::status(Code::Forbidden, format!("unsupported command({})", request.method))
}

fn encode_error(what: &str, err: CodecError) -> Error {
	let code = match err {
		CodecError::NotAcceptable(_) => Code::NotAcceptable,
		_ => Code::BadRequest,
	};

	Error::status(code, format!("cannot encode {what}: {err}"))
}

/// Status sub-document of a step outcome; failures carry code `0` and the error text.
fn provision_status(outcome: &Result<CoapResponse>) -> ProvisionStatus {
	let (coap_code, error_message) = match outcome {
		Ok(response) => (response.code.as_u8(), String::new()),
		Err(err) => (0, err.to_string()),
	};

	ProvisionStatus { date: OffsetDateTime::now_utc(), coap_code, error_message }
}

/// Picks the hub for `selected` or falls back to the first hub and its first valid gateway.
fn find_linked_hub<'a>(
	hubs: &'a [Arc<LinkedHub>],
	selected: &CloudEndpoint,
) -> Result<(&'a Arc<LinkedHub>, CloudEndpoint)> {
	if selected.is_set()
		&& let Some(hub) = hubs.iter().find(|hub| {
			**hub.hub_id() == *selected.id
				&& hub.hub().valid_gateways().any(|gateway| gateway == selected.uri)
		}) {
		return Ok((hub, selected.clone()));
	}

	let Some(hub) = hubs.first() else {
		return Err(Error::status(Code::BadRequest, "cannot find linked hub"));
	};
	let Some(uri) = hub.hub().valid_gateways().next() else {
		return Err(Error::status(
			Code::BadRequest,
			format!("cannot find valid coap gateway of hub {}", hub.hub_id()),
		));
	};

	Ok((hub, CloudEndpoint { uri, id: hub.hub_id().to_string() }))
}

/// Describes a token failure; owner-claim mismatches name the hub and the group.
fn describe_token_error(err: &Error, hub: &LinkedHub, group: &EnrollmentGroup) -> String {
	match err {
		Error::ClaimNotFound(ClaimNotFoundError { claim, .. })
			if *claim == hub.hub().authorization.owner_claim =>
		{
			let message = format!(
				"configured OAuth client for the hub {} used in enrollment group {} returned owner id claim {} which doesn't match the expected value {}",
				hub.id(),
				group.id(),
				claim,
				group.owner(),
			);

			tracing::warn!(hub = %hub.id(), enrollment_group = %group.id(), "{message}");

			message
		},
		_ => err.to_string(),
	}
}
