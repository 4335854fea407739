//! Per-connection provisioning session.

// std
use std::sync::atomic::{AtomicBool, Ordering};
// self
use crate::{
	_prelude::*,
	attestation::AttestationError,
	auth::RecordId,
	context::RequestContext,
	enrollment::{EnrollmentGroup, EnrollmentGroupsCache},
	model::{AttestationStatus, ProvisioningRecord},
	store::Store,
	x509::{self, Certificate},
};

/// Boxed future returned by [`DeviceConnection::local_endpoints`].
pub type EndpointsFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<String>>> + 'a + Send>>;

/// Transport connection a session is bound to.
pub trait DeviceConnection
where
	Self: Send + Sync,
{
	/// Peer address, for logs.
	fn remote_addr(&self) -> String;

	/// Endpoints the device advertises on its local network.
	fn local_endpoints<'a>(&'a self, ctx: &'a RequestContext) -> EndpointsFuture<'a>;
}

/// State shared by every request of one device connection.
///
/// The enrollment group is resolved once, when the session opens. When that fails the error
/// sticks: every request is refused with it and nothing is recorded.
pub struct Session {
	connection: Arc<dyn DeviceConnection>,
	store: Arc<dyn Store>,
	record_id: Option<RecordId>,
	group: Result<Arc<EnrollmentGroup>, Error>,
	device_id: Mutex<String>,
	endpoints_requested: AtomicBool,
	local_endpoints: Mutex<Vec<String>>,
}
impl Session {
	/// Resolves the enrollment group of the verified `chains` and records the attestation.
	pub async fn open(
		ctx: &RequestContext,
		connection: Arc<dyn DeviceConnection>,
		store: Arc<dyn Store>,
		groups: &EnrollmentGroupsCache,
		chains: &[Vec<Certificate>],
	) -> Self {
		let leaf_chain = chains.first().filter(|chain| !chain.is_empty());
		let record_id = leaf_chain.and_then(|chain| {
			RecordId::new(x509::manufacturer_certificate_id(&chain[0]).to_string()).ok()
		});
		let group = match leaf_chain {
			None => Err(AttestationError::NoVerifiedChain.into()),
			Some(chain) => resolve_group(ctx, groups, chains, chain).await,
		};
		let session = Self {
			connection,
			store,
			record_id,
			group,
			device_id: Mutex::new(String::new()),
			endpoints_requested: AtomicBool::new(false),
			local_endpoints: Mutex::new(Vec::new()),
		};

		match (&session.group, leaf_chain) {
			(Ok(group), Some(chain)) => {
				tracing::debug!(
					remote_addr = %session.remote_addr(),
					enrollment_group = %group.id(),
					"Opened provisioning session."
				);

				let attestation = AttestationStatus {
					date: OffsetDateTime::now_utc(),
					certificate_pem: x509::certificates_to_pem(chain),
					common_name: chain[0].subject_common_name().to_owned(),
				};

				session
					.update_provisioning_record(ctx, |record| {
						record.attestation = Some(attestation)
					})
					.await;
			},
			(Err(err), _) => {
				tracing::debug!(
					remote_addr = %session.remote_addr(),
					error = %err,
					"Opened provisioning session without an enrollment group."
				);
			},
			_ => {},
		}

		session
	}

	/// Peer address.
	pub fn remote_addr(&self) -> String {
		self.connection.remote_addr()
	}

	/// Provisioning record ID derived from the manufacturer certificate.
	pub fn record_id(&self) -> Option<&RecordId> {
		self.record_id.as_ref()
	}

	/// Resolved enrollment group, or the sticky error of the session.
	pub fn enrollment_group(&self) -> Result<&Arc<EnrollmentGroup>> {
		self.group.as_ref().map_err(Clone::clone)
	}

	/// Sticky error, when the enrollment group could not be resolved.
	pub fn error(&self) -> Option<&Error> {
		self.group.as_ref().err()
	}

	/// Device ID bound by the credentials step; empty before it.
	pub fn device_id(&self) -> String {
		self.device_id.lock().clone()
	}

	/// Binds the device ID for the rest of the session.
	pub fn set_device_id(&self, device_id: impl Into<String>) {
		*self.device_id.lock() = device_id.into();
	}

	/// Asks the device for its local endpoints once per session; a failed query is not retried.
	pub async fn resolve_local_endpoints(&self, ctx: &RequestContext) {
		if self
			.endpoints_requested
			.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
			.is_err()
		{
			return;
		}

		match ctx.run("local endpoints", self.connection.local_endpoints(ctx)).await {
			Ok(endpoints) => {
				tracing::debug!(
					remote_addr = %self.remote_addr(),
					local_endpoints = ?endpoints,
					"Resolved local endpoints."
				);

				*self.local_endpoints.lock() = endpoints;
			},
			Err(err) => {
				tracing::debug!(
					remote_addr = %self.remote_addr(),
					error = %err,
					"Cannot resolve local endpoints."
				);
			},
		}
	}

	/// Local endpoints resolved so far.
	pub fn local_endpoints(&self) -> Vec<String> {
		self.local_endpoints.lock().clone()
	}

	/// Writes a record update built by `fill`; the session identity fields are set here.
	///
	/// The session device ID fills in when `fill` leaves the record's device ID blank.
	///
	/// Nothing is written for sessions without an enrollment group. Write failures are logged
	/// and never reach the device.
	pub async fn update_provisioning_record(
		&self,
		ctx: &RequestContext,
		fill: impl FnOnce(&mut ProvisioningRecord),
	) {
		let (Ok(group), Some(id)) = (&self.group, &self.record_id) else {
			return;
		};
		let mut record = ProvisioningRecord::new(id.clone());

		fill(&mut record);

		record.enrollment_group_id = group.id().to_string();
		record.owner = group.owner().to_owned();
		if record.device_id.is_empty() {
			record.device_id = self.device_id();
		}
		record.local_endpoints = self.local_endpoints();

		let written = ctx
			.run("provisioning record write", async {
				self.store.update_provisioning_record(record).await.map_err(Error::from)
			})
			.await;

		if let Err(err) = written {
			tracing::error!(
				record = %id,
				enrollment_group = %group.id(),
				error = %err,
				"Cannot update the provisioning record."
			);
		}
	}
}
impl Debug for Session {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Session")
			.field("remote_addr", &self.remote_addr())
			.field("record_id", &self.record_id)
			.field("enrollment_group", &self.group.as_ref().map(|group| group.id()))
			.field("device_id", &self.device_id())
			.finish_non_exhaustive()
	}
}

async fn resolve_group(
	ctx: &RequestContext,
	groups: &EnrollmentGroupsCache,
	chains: &[Vec<Certificate>],
	leaf_chain: &[Certificate],
) -> Result<Arc<EnrollmentGroup>> {
	match groups.get_enrollment_group(ctx, chains).await? {
		Some(group) => Ok(group),
		None => {
			let mut issuers = Vec::<String>::new();

			for cert in leaf_chain {
				let issuer = cert.issuer_common_name();

				if !issuers.iter().any(|known| known == issuer) {
					issuers.push(issuer.to_owned());
				}
			}

			Err(AttestationError::NoMatchingGroup { issuers }.into())
		},
	}
}
