// self
use super::{Step, encode_error, provision_status, unsupported_method};
use crate::{
	_prelude::*,
	auth::owner_to_uuid,
	coap::{Code, CoapResponse, Method},
	hub::LinkedHub,
	model::AclStatus,
	schema::{self, AccessControl, AccessControlList, AceResource, AceSubject, permission},
};

/// Wildcard matching every non-configuration resource.
const ALL_RESOURCES: &str = "*";
/// Device information resources readable without authentication.
const ANONYMOUS_READ_RESOURCES: [&str; 3] = ["/oic/res", "/oic/d", "/oic/p"];
const ANONYMOUS_CONNECTION: &str = "anon-clear";

pub(super) async fn process(step: Step<'_>, hubs: &[Arc<LinkedHub>]) -> Result<CoapResponse> {
	if step.request.method != Method::Get {
		return Err(unsupported_method(step.request));
	}

	let access_controls = access_controls(&owner_to_uuid(step.group.owner()).to_string(), hubs);
	let outcome = CoapResponse::with_payload(
		Code::Content,
		step.request,
		&AccessControlList { access_controls: access_controls.clone() },
	)
	.map_err(|err| encode_error("acls", err));

	step.session
		.update_provisioning_record(step.ctx, |record| {
			record.acl = Some(AclStatus {
				status: provision_status(&outcome),
				access_control_list: access_controls,
			});
		})
		.await;

	outcome
}

/// Owner entry, anonymous read entry, then one entry per distinct hub ID.
fn access_controls(owner_id: &str, hubs: &[Arc<LinkedHub>]) -> Vec<AccessControl> {
	let full_access = |uuid: String| AccessControl {
		subject: AceSubject::Device { uuid },
		permission: permission::ALL,
		resources: vec![AceResource::wildcard(ALL_RESOURCES)],
		tag: schema::DPS_TAG.into(),
	};
	let mut access_controls = vec![
		full_access(owner_id.to_owned()),
		AccessControl {
			subject: AceSubject::Connection { conntype: ANONYMOUS_CONNECTION.into() },
			permission: permission::READ,
			resources: ANONYMOUS_READ_RESOURCES.into_iter().map(AceResource::href).collect(),
			tag: schema::DPS_TAG.into(),
		},
	];
	let mut seen = HashSet::new();

	for hub in hubs {
		let hub_id = hub.hub_id().to_string();

		if seen.insert(hub_id.clone()) {
			access_controls.push(full_access(hub_id));
		}
	}

	access_controls
}
