// self
use super::{
	Step, describe_token_error, encode_error, find_linked_hub, provision_status, unsupported_method,
};
use crate::{
	_prelude::*,
	coap::{Code, CoapResponse, Method},
	hub::LinkedHub,
	model::CloudStatus,
	schema::{CloudConfigurationRequest, CloudConfigurationUpdate, CloudEndpoint},
};

pub(super) async fn process(step: Step<'_>, hubs: &[Arc<LinkedHub>]) -> Result<CoapResponse> {
	if step.request.method != Method::Post {
		return Err(unsupported_method(step.request));
	}

	let endpoints = cloud_endpoints(hubs);
	let mut selected = None;
	let mut provider_name = String::new();
	let mut device_id = String::new();
	let outcome =
		provision(step, hubs, &endpoints, &mut selected, &mut provider_name, &mut device_id).await;
	let selected_gateway = selected
		.and_then(|selected| endpoints.iter().position(|endpoint| *endpoint == selected))
		.and_then(|i| i32::try_from(i).ok())
		.unwrap_or(-1);

	step.session
		.update_provisioning_record(step.ctx, |record| {
			record.device_id = device_id;
			record.cloud = Some(CloudStatus {
				status: provision_status(&outcome),
				gateways: endpoints,
				provider_name,
				selected_gateway,
			});
		})
		.await;

	outcome
}

async fn provision(
	step: Step<'_>,
	hubs: &[Arc<LinkedHub>],
	endpoints: &[CloudEndpoint],
	selected: &mut Option<CloudEndpoint>,
	provider_name: &mut String,
	device_id: &mut String,
) -> Result<CoapResponse> {
	let Step { ctx, request, group, .. } = step;

	if request.body.is_empty() {
		return Err(Error::status(
			Code::BadRequest,
			"unable to parse cloud configuration request from empty body",
		));
	}

	let body = request.decode::<CloudConfigurationRequest>().map_err(|err| {
		Error::status(
			Code::BadRequest,
			format!("unable to parse cloud configuration request from body: {err}"),
		)
	})?;

	device_id.clone_from(&body.device_id);

	let (hub, gateway) = find_linked_hub(hubs, &body.selected_gateway)?;

	*selected = Some(gateway.clone());
	*provider_name = hub.provider_name().to_owned();

	let authorization = &hub.hub().authorization;
	let mut claims =
		BTreeMap::from([(authorization.owner_claim.clone(), group.owner().to_owned())]);

	if !authorization.device_id_claim.is_empty() {
		claims.insert(authorization.device_id_claim.clone(), body.device_id.clone());
	}

	let token = hub.get_token_from_oauth(ctx, &claims, &claims).await.map_err(|err| {
		Error::status(
			err.coap_code(),
			format!(
				"cannot get token for cloud configuration response: {}",
				describe_token_error(&err, hub, group)
			),
		)
	})?;
	let update = CloudConfigurationUpdate {
		authorization_provider: hub.provider_name().to_owned(),
		url: gateway.uri,
		cloud_id: gateway.id,
		authorization_code: token.access_token.expose().to_owned(),
		endpoints: endpoints.to_vec(),
	};

	CoapResponse::with_payload(Code::Changed, request, &update)
		.map_err(|err| encode_error("cloud configuration", err))
}

/// Valid gateways of every hub, tagged with the hub ID, without duplicates.
fn cloud_endpoints(hubs: &[Arc<LinkedHub>]) -> Vec<CloudEndpoint> {
	let mut endpoints = Vec::<CloudEndpoint>::new();

	for hub in hubs {
		for uri in hub.hub().valid_gateways() {
			let endpoint = CloudEndpoint { uri, id: hub.hub_id().to_string() };

			if !endpoints.contains(&endpoint) {
				endpoints.push(endpoint);
			}
		}
	}

	endpoints
}
