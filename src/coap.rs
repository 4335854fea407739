//! Transport-agnostic CoAP message model.
//!
//! The transport owns the wire codec; the engine only sees decoded requests and produces
//! responses whose bodies are encoded in CBOR (`ciborium`) or JSON (`serde_json`).

// crates.io
use serde::de::DeserializeOwned;
// self
use crate::_prelude::*;

/// CoAP response codes the engine produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Code {
	/// 2.01
	Created,
	/// 2.02
	Deleted,
	/// 2.03
	Valid,
	/// 2.04
	Changed,
	/// 2.05
	Content,
	/// 4.00
	BadRequest,
	/// 4.01
	Unauthorized,
	/// 4.02
	BadOption,
	/// 4.03
	Forbidden,
	/// 4.04
	NotFound,
	/// 4.05
	MethodNotAllowed,
	/// 4.06
	NotAcceptable,
	/// 4.15
	UnsupportedMediaType,
	/// 5.00
	InternalServerError,
	/// 5.01
	NotImplemented,
	/// 5.03
	ServiceUnavailable,
	/// 5.04
	GatewayTimeout,
}
impl Code {
	const ALL: [Self; 17] = [
		Self::Created,
		Self::Deleted,
		Self::Valid,
		Self::Changed,
		Self::Content,
		Self::BadRequest,
		Self::Unauthorized,
		Self::BadOption,
		Self::Forbidden,
		Self::NotFound,
		Self::MethodNotAllowed,
		Self::NotAcceptable,
		Self::UnsupportedMediaType,
		Self::InternalServerError,
		Self::NotImplemented,
		Self::ServiceUnavailable,
		Self::GatewayTimeout,
	];

	/// Wire value (`class << 5 | detail`).
	pub const fn as_u8(self) -> u8 {
		let (class, detail) = match self {
			Self::Created => (2, 1),
			Self::Deleted => (2, 2),
			Self::Valid => (2, 3),
			Self::Changed => (2, 4),
			Self::Content => (2, 5),
			Self::BadRequest => (4, 0),
			Self::Unauthorized => (4, 1),
			Self::BadOption => (4, 2),
			Self::Forbidden => (4, 3),
			Self::NotFound => (4, 4),
			Self::MethodNotAllowed => (4, 5),
			Self::NotAcceptable => (4, 6),
			Self::UnsupportedMediaType => (4, 15),
			Self::InternalServerError => (5, 0),
			Self::NotImplemented => (5, 1),
			Self::ServiceUnavailable => (5, 3),
			Self::GatewayTimeout => (5, 4),
		};

		class << 5 | detail
	}

	/// Parses a wire value.
	pub fn from_u8(value: u8) -> Option<Self> {
		Self::ALL.into_iter().find(|code| code.as_u8() == value)
	}

	/// Returns true for 2.xx codes.
	pub const fn is_success(self) -> bool {
		self.as_u8() >> 5 == 2
	}

	/// Human-readable name.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Created => "Created",
			Self::Deleted => "Deleted",
			Self::Valid => "Valid",
			Self::Changed => "Changed",
			Self::Content => "Content",
			Self::BadRequest => "BadRequest",
			Self::Unauthorized => "Unauthorized",
			Self::BadOption => "BadOption",
			Self::Forbidden => "Forbidden",
			Self::NotFound => "NotFound",
			Self::MethodNotAllowed => "MethodNotAllowed",
			Self::NotAcceptable => "NotAcceptable",
			Self::UnsupportedMediaType => "UnsupportedMediaType",
			Self::InternalServerError => "InternalServerError",
			Self::NotImplemented => "NotImplemented",
			Self::ServiceUnavailable => "ServiceUnavailable",
			Self::GatewayTimeout => "GatewayTimeout",
		}
	}
}
impl Display for Code {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Request methods.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
	/// GET
	Get,
	/// POST
	Post,
	/// PUT
	Put,
	/// DELETE
	Delete,
}
impl Method {
	/// Upper-case method name.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Get => "GET",
			Self::Post => "POST",
			Self::Put => "PUT",
			Self::Delete => "DELETE",
		}
	}
}
impl Display for Method {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Content-Format option values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MediaType {
	/// `text/plain;charset=utf-8`
	TextPlain,
	/// `application/octet-stream`
	AppOctets,
	/// `application/json`
	AppJson,
	/// `application/cbor`
	AppCbor,
	/// `application/vnd.ocf+cbor`
	AppOcfCbor,
}
impl MediaType {
	/// Option value.
	pub const fn as_u16(self) -> u16 {
		match self {
			Self::TextPlain => 0,
			Self::AppOctets => 42,
			Self::AppJson => 50,
			Self::AppCbor => 60,
			Self::AppOcfCbor => 10000,
		}
	}

	/// Parses an option value.
	pub const fn from_u16(value: u16) -> Option<Self> {
		match value {
			0 => Some(Self::TextPlain),
			42 => Some(Self::AppOctets),
			50 => Some(Self::AppJson),
			60 => Some(Self::AppCbor),
			10000 => Some(Self::AppOcfCbor),
			_ => None,
		}
	}

	/// Returns true when bodies of this type can be encoded and decoded.
	pub const fn is_structured(self) -> bool {
		matches!(self, Self::AppJson | Self::AppCbor | Self::AppOcfCbor)
	}
}

/// Body codec failure.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum CodecError {
	/// Request carried no body.
	#[error("Body is empty.")]
	EmptyBody,
	/// Content format is missing or cannot be decoded.
	#[error("Content format {0:?} is not supported.")]
	UnsupportedMediaType(Option<MediaType>),
	/// Accept option names a format responses cannot be encoded in.
	#[error("Accept {0:?} cannot be produced.")]
	NotAcceptable(MediaType),
	/// Body did not match the expected structure.
	#[error("Body cannot be decoded: {0}.")]
	Decode(String),
	/// Value could not be encoded.
	#[error("Body cannot be encoded: {0}.")]
	Encode(String),
}

/// Encodes `value` as `media`.
pub fn encode_body<T>(media: MediaType, value: &T) -> Result<Vec<u8>, CodecError>
where
	T: ?Sized + Serialize,
{
	match media {
		MediaType::AppCbor | MediaType::AppOcfCbor => {
			let mut body = Vec::new();

			ciborium::into_writer(value, &mut body)
				.map_err(|err| CodecError::Encode(err.to_string()))?;

			Ok(body)
		},
		MediaType::AppJson =>
			serde_json::to_vec(value).map_err(|err| CodecError::Encode(err.to_string())),
		other => Err(CodecError::UnsupportedMediaType(Some(other))),
	}
}

/// Decodes `body` as `media`.
pub fn decode_body<T>(media: Option<MediaType>, body: &[u8]) -> Result<T, CodecError>
where
	T: DeserializeOwned,
{
	if body.is_empty() {
		return Err(CodecError::EmptyBody);
	}

	match media {
		Some(MediaType::AppCbor | MediaType::AppOcfCbor) =>
			ciborium::from_reader(body).map_err(|err| CodecError::Decode(err.to_string())),
		Some(MediaType::AppJson) =>
			serde_json::from_slice(body).map_err(|err| CodecError::Decode(err.to_string())),
		other => Err(CodecError::UnsupportedMediaType(other)),
	}
}

/// Decoded inbound request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoapRequest {
	/// Request method.
	pub method: Method,
	/// URI path, always starting with `/`.
	pub path: String,
	/// Message token echoed in the response.
	pub token: Vec<u8>,
	/// Content-Format option.
	pub content_format: Option<MediaType>,
	/// Accept option.
	pub accept: Option<MediaType>,
	/// Payload.
	pub body: Vec<u8>,
}
impl CoapRequest {
	/// Creates a body-less request.
	pub fn new(method: Method, path: impl Into<String>) -> Self {
		Self {
			method,
			path: path.into(),
			token: Vec::new(),
			content_format: None,
			accept: None,
			body: Vec::new(),
		}
	}

	/// Sets the message token.
	pub fn with_token(mut self, token: impl Into<Vec<u8>>) -> Self {
		self.token = token.into();

		self
	}

	/// Sets the Accept option.
	pub fn with_accept(mut self, accept: MediaType) -> Self {
		self.accept = Some(accept);

		self
	}

	/// Sets a raw payload and its content format.
	pub fn with_body(mut self, media: MediaType, body: impl Into<Vec<u8>>) -> Self {
		self.content_format = Some(media);
		self.body = body.into();

		self
	}

	/// Encodes `value` as the payload.
	pub fn with_payload<T>(self, media: MediaType, value: &T) -> Result<Self, CodecError>
	where
		T: ?Sized + Serialize,
	{
		let body = encode_body(media, value)?;

		Ok(self.with_body(media, body))
	}

	/// Decodes the payload according to its content format.
	pub fn decode<T>(&self) -> Result<T, CodecError>
	where
		T: DeserializeOwned,
	{
		decode_body(self.content_format, &self.body)
	}

	/// Format the response should be encoded in.
	///
	/// Accept wins, then the request's own structured content format, then OCF CBOR. An Accept
	/// naming a format responses cannot be encoded in is refused.
	pub fn negotiate_accept(&self) -> Result<MediaType, CodecError> {
		match self.accept {
			Some(accept) if accept.is_structured() => Ok(accept),
			Some(accept) => Err(CodecError::NotAcceptable(accept)),
			None => Ok(self
				.content_format
				.filter(|media| media.is_structured())
				.unwrap_or(MediaType::AppOcfCbor)),
		}
	}
}

/// Outbound response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoapResponse {
	/// Response code.
	pub code: Code,
	/// Token of the request being answered.
	pub token: Vec<u8>,
	/// Content-Format option of the payload, if any.
	pub content_format: Option<MediaType>,
	/// Payload.
	pub body: Vec<u8>,
}
impl CoapResponse {
	/// Creates an empty response answering `request`.
	pub fn new(code: Code, request: &CoapRequest) -> Self {
		Self { code, token: request.token.clone(), content_format: None, body: Vec::new() }
	}

	/// Creates a response carrying `value` encoded in the negotiated format.
	pub fn with_payload<T>(code: Code, request: &CoapRequest, value: &T) -> Result<Self, CodecError>
	where
		T: ?Sized + Serialize,
	{
		let media = request.negotiate_accept()?;
		let body = encode_body(media, value)?;

		Ok(Self { content_format: Some(media), body, ..Self::new(code, request) })
	}

	/// Creates an error response with a plain-text diagnostic.
	pub fn diagnostic(code: Code, request: &CoapRequest, message: impl Display) -> Self {
		Self {
			content_format: Some(MediaType::TextPlain),
			body: message.to_string().into_bytes(),
			..Self::new(code, request)
		}
	}

	/// Decodes the payload according to its content format.
	pub fn decode<T>(&self) -> Result<T, CodecError>
	where
		T: DeserializeOwned,
	{
		decode_body(self.content_format, &self.body)
	}

	/// Payload as text, lossily decoded.
	pub fn text(&self) -> String {
		String::from_utf8_lossy(&self.body).into_owned()
	}
}
