use coap_lite::{CoapOption, MessageClass, MessageType, Packet, RequestType, ResponseType};

use wotkit::uri::{percent_encode, split_query_item};
#[cfg(test)]
use wotkit::uri::percent_decode;

/// A request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Method {
    /// `GET`.
    Get,
    /// `POST`.
    Post,
    /// `PUT`.
    Put,
    /// `DELETE`.
    Delete,
    /// Any other method.
    Other,
}

impl Method {
    fn from_request_type(request_type: RequestType) -> Self {
        match request_type {
            RequestType::Get => Self::Get,
            RequestType::Post => Self::Post,
            RequestType::Put => Self::Put,
            RequestType::Delete => Self::Delete,
            _ => Self::Other,
        }
    }
}

/// A response code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResponseCode {
    /// 2.05 Content.
    Content,
    /// 2.04 Changed.
    Changed,
    /// 4.00 Bad Request.
    BadRequest,
    /// 4.04 Not Found.
    NotFound,
    /// 4.05 Method Not Allowed.
    MethodNotAllowed,
    /// 4.06 Not Acceptable.
    NotAcceptable,
    /// 4.15 Unsupported Content-Format.
    UnsupportedContentFormat,
    /// 5.00 Internal Server Error.
    InternalServerError,
    /// 5.01 Not Implemented.
    NotImplemented,
}

impl ResponseCode {
    const fn class_detail(self) -> (u8, u8) {
        match self {
            Self::Content => (2, 5),
            Self::Changed => (2, 4),
            Self::BadRequest => (4, 0),
            Self::NotFound => (4, 4),
            Self::MethodNotAllowed => (4, 5),
            Self::NotAcceptable => (4, 6),
            Self::UnsupportedContentFormat => (4, 15),
            Self::InternalServerError => (5, 0),
            Self::NotImplemented => (5, 1),
        }
    }

    const fn response_type(self) -> ResponseType {
        match self {
            Self::Content => ResponseType::Content,
            Self::Changed => ResponseType::Changed,
            Self::BadRequest => ResponseType::BadRequest,
            Self::NotFound => ResponseType::NotFound,
            Self::MethodNotAllowed => ResponseType::MethodNotAllowed,
            Self::NotAcceptable => ResponseType::NotAcceptable,
            Self::UnsupportedContentFormat => ResponseType::UnsupportedContentFormat,
            Self::InternalServerError => ResponseType::InternalServerError,
            Self::NotImplemented => ResponseType::NotImplemented,
        }
    }
}

impl std::fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (class, detail) = self.class_detail();
        write!(f, "{class}.{detail:02}")
    }
}

pub(crate) fn encode_uint(value: u32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

pub(crate) fn decode_uint(bytes: &[u8]) -> Option<u32> {
    if bytes.len() > 4 {
        return None;
    }
    Some(
        bytes
            .iter()
            .fold(0, |value, byte| (value << 8) | u32::from(*byte)),
    )
}

fn first_uint(packet: &Packet, option: CoapOption) -> Option<u32> {
    packet
        .get_option(option)
        .and_then(|values| values.front())
        .and_then(|value| decode_uint(value))
}

/// An inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InboundRequest {
    /// Method.
    pub method: Method,
    /// Decoded path segments.
    pub segments: Vec<String>,
    /// Decoded query items.
    pub queries: Vec<String>,
    /// Declared content format of the payload.
    pub content_format: Option<u16>,
    /// Accepted content format.
    pub accept: Option<u16>,
    /// Observe option value.
    pub observe: Option<u32>,
    /// Payload.
    pub payload: Vec<u8>,
}

impl InboundRequest {
    /// Creates an [`InboundRequest`] from a method and a percent-encoded
    /// path, optionally followed by a query.
    #[cfg(test)]
    #[must_use]
    pub fn new(method: Method, path: &str) -> Self {
        let (path, query) = path.split_once('?').unwrap_or((path, ""));
        Self {
            method,
            segments: path
                .trim_start_matches('/')
                .split('/')
                .filter(|segment| !segment.is_empty())
                .map(|segment| percent_decode(segment).into_owned())
                .collect(),
            queries: wotkit::uri::query_pairs(&format!("?{query}"))
                .map(|(name, value)| format!("{name}={value}"))
                .collect(),
            content_format: None,
            accept: None,
            observe: None,
            payload: Vec::new(),
        }
    }

    /// Sets the content format.
    #[cfg(test)]
    #[must_use]
    pub const fn content_format(mut self, content_format: u16) -> Self {
        self.content_format = Some(content_format);
        self
    }

    /// Sets the accepted content format.
    #[cfg(test)]
    #[must_use]
    pub const fn accept(mut self, accept: u16) -> Self {
        self.accept = Some(accept);
        self
    }

    /// Sets the observe option.
    #[cfg(test)]
    #[must_use]
    pub const fn observe(mut self, observe: u32) -> Self {
        self.observe = Some(observe);
        self
    }

    /// Sets the payload.
    #[cfg(test)]
    #[must_use]
    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Returns the query items as `(name, value)` pairs.
    ///
    /// Each `Uri-Query` option is split on its first `=` only. A value
    /// is never decoded or split again.
    pub fn query_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.queries.iter().map(|item| split_query_item(item))
    }

    /// Returns the percent-encoded path followed by the query, if any.
    #[must_use]
    pub fn path(&self) -> String {
        let mut path = String::new();
        for segment in &self.segments {
            path.push('/');
            path.push_str(&percent_encode(segment));
        }
        if path.is_empty() {
            path.push('/');
        }
        for (index, (name, value)) in self.query_pairs().enumerate() {
            path.push(if index == 0 { '?' } else { '&' });
            path.push_str(&percent_encode(name));
            path.push('=');
            path.push_str(&percent_encode(value));
        }
        path
    }

    /// Parses a request out of a packet.
    ///
    /// Returns [`None`] for packets which are not requests.
    pub(crate) fn from_packet(packet: &Packet) -> Option<Self> {
        let MessageClass::Request(request_type) = packet.header.code else {
            return None;
        };

        let strings = |option: CoapOption| -> Vec<String> {
            packet
                .get_option(option)
                .map(|values| {
                    values
                        .iter()
                        .map(|value| String::from_utf8_lossy(value).into_owned())
                        .collect()
                })
                .unwrap_or_default()
        };

        Some(Self {
            method: Method::from_request_type(request_type),
            segments: strings(CoapOption::UriPath)
                .into_iter()
                .filter(|segment| !segment.is_empty())
                .collect(),
            queries: strings(CoapOption::UriQuery),
            content_format: first_uint(packet, CoapOption::ContentFormat)
                .and_then(|value| u16::try_from(value).ok()),
            accept: first_uint(packet, CoapOption::Accept)
                .and_then(|value| u16::try_from(value).ok()),
            observe: first_uint(packet, CoapOption::Observe),
            payload: packet.payload.clone(),
        })
    }
}

/// An outbound response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OutboundResponse {
    /// Response code.
    pub code: ResponseCode,
    /// Content format of the payload.
    pub content_format: Option<u16>,
    /// Observe option value.
    pub observe: Option<u32>,
    /// Payload.
    pub payload: Vec<u8>,
}

impl OutboundResponse {
    /// Creates an [`OutboundResponse`] without payload.
    #[must_use]
    pub const fn new(code: ResponseCode) -> Self {
        Self {
            code,
            content_format: None,
            observe: None,
            payload: Vec::new(),
        }
    }

    /// Creates an [`OutboundResponse`] with a diagnostic payload.
    #[must_use]
    pub fn diagnostic(code: ResponseCode, message: impl Into<String>) -> Self {
        Self {
            payload: message.into().into_bytes(),
            ..Self::new(code)
        }
    }

    /// Creates a [`ResponseCode::Content`] response.
    #[must_use]
    pub fn content(payload: impl Into<Vec<u8>>, content_format: Option<u16>) -> Self {
        Self {
            content_format,
            payload: payload.into(),
            ..Self::new(ResponseCode::Content)
        }
    }

    /// Sets the observe option.
    #[must_use]
    pub const fn observe(mut self, observe: u32) -> Self {
        self.observe = Some(observe);
        self
    }

    pub(crate) fn into_packet(
        self,
        message_type: MessageType,
        message_id: u16,
        token: Vec<u8>,
    ) -> Packet {
        let mut packet = Packet::new();
        packet.header.set_type(message_type);
        packet.header.message_id = message_id;
        packet.header.code = MessageClass::Response(self.code.response_type());
        packet.set_token(token);
        if let Some(observe) = self.observe {
            packet.add_option(CoapOption::Observe, encode_uint(observe));
        }
        if let Some(content_format) = self.content_format {
            packet.add_option(
                CoapOption::ContentFormat,
                encode_uint(u32::from(content_format)),
            );
        }
        packet.payload = self.payload;
        packet
    }
}

#[cfg(test)]
mod tests {
    use coap_lite::{CoapOption, MessageClass, MessageType, Packet, RequestType, ResponseType};

    use super::{
        InboundRequest, Method, OutboundResponse, ResponseCode, decode_uint, encode_uint,
    };

    #[test]
    fn uint_options() {
        assert!(encode_uint(0).is_empty());
        assert_eq!(encode_uint(50), [50]);
        assert_eq!(encode_uint(2100), [0x08, 0x34]);
        assert_eq!(decode_uint(&[]), Some(0));
        assert_eq!(decode_uint(&[0x08, 0x34]), Some(2100));
        assert_eq!(decode_uint(&[1, 2, 3, 4, 5]), None);
    }

    #[test]
    fn response_code_display() {
        assert_eq!(ResponseCode::Content.to_string(), "2.05");
        assert_eq!(ResponseCode::UnsupportedContentFormat.to_string(), "4.15");
        assert_eq!(ResponseCode::NotImplemented.to_string(), "5.01");
    }

    #[test]
    fn request_from_path() {
        let request = InboundRequest::new(Method::Get, "/lamp%201/properties/on?unit=celsius");

        assert_eq!(request.segments, ["lamp 1", "properties", "on"]);
        assert_eq!(request.queries, ["unit=celsius"]);
        assert_eq!(request.path(), "/lamp%201/properties/on?unit=celsius");
        assert_eq!(InboundRequest::new(Method::Get, "/").path(), "/");
    }

    #[test]
    fn query_options_keep_reserved_characters() {
        let mut request = InboundRequest::new(Method::Get, "/lamp-1/properties/on");
        request.queries = vec!["name=a&b".into(), "level=100%41".into(), "flag".into()];

        assert_eq!(
            request.query_pairs().collect::<Vec<_>>(),
            [("name", "a&b"), ("level", "100%41"), ("flag", "")]
        );
        assert_eq!(
            request.path(),
            "/lamp-1/properties/on?name=a%26b&level=100%2541&flag="
        );
    }

    #[test]
    fn request_from_packet() {
        let mut packet = Packet::new();
        packet.header.set_type(MessageType::Confirmable);
        packet.header.code = MessageClass::Request(RequestType::Put);
        packet.add_option(CoapOption::UriPath, b"lamp-1".to_vec());
        packet.add_option(CoapOption::UriPath, b"properties".to_vec());
        packet.add_option(CoapOption::UriPath, b"on".to_vec());
        packet.add_option(CoapOption::ContentFormat, vec![50]);
        packet.payload = b"true".to_vec();

        let request = InboundRequest::from_packet(&packet).unwrap();
        assert_eq!(
            request,
            InboundRequest::new(Method::Put, "/lamp-1/properties/on")
                .content_format(50)
                .payload("true")
        );

        let mut response = Packet::new();
        response.header.code = MessageClass::Response(ResponseType::Content);
        assert!(InboundRequest::from_packet(&response).is_none());
    }

    #[test]
    fn response_into_packet() {
        let packet = OutboundResponse::content("42", Some(50))
            .observe(3)
            .into_packet(MessageType::NonConfirmable, 7, vec![0xab]);

        assert_eq!(packet.header.get_type(), MessageType::NonConfirmable);
        assert_eq!(packet.header.message_id, 7);
        assert_eq!(
            packet.header.code,
            MessageClass::Response(ResponseType::Content)
        );
        assert_eq!(packet.get_token().to_vec(), vec![0xab]);
        assert_eq!(
            packet.get_option(CoapOption::Observe).unwrap().front(),
            Some(&vec![3])
        );
        assert_eq!(packet.payload, b"42");

        let bytes = packet.to_bytes().unwrap();
        assert_eq!(Packet::from_bytes(&bytes).unwrap().payload, b"42");
    }
}
