//! Device provisioning engine: TLS attestation against enrollment groups, single-flight hub and
//! token caches, and the CoAP provisioning steps that walk a device from its manufacturer
//! certificate to a linked hub.

#![deny(clippy::all, unused_crate_dependencies)]
#![warn(missing_docs)]

pub mod attestation;
pub mod auth;
pub mod ca;
pub mod cache;
pub mod coap;
pub mod config;
pub mod context;
pub mod enrollment;
pub mod error;
pub mod http;
pub mod hub;
pub mod model;
pub mod oauth;
pub mod obs;
pub mod provider;
pub mod schema;
pub mod service;
pub mod session;
pub mod store;
pub mod x509;

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap, HashSet},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		hash::Hash,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use parking_lot::{Mutex, RwLock};
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use reqwest;
pub use url;
#[cfg(test)] use {httpmock as _, rcgen as _};
