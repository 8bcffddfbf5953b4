/// JSON-RPC plumbing: request envelopes, inbound classification and the HTTP client

pub mod envelope;
pub mod params;
pub mod http;

pub use envelope::{InboundMessage, JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestBuilder};
pub use http::HttpClient;
