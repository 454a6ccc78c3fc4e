//! Transport adapters binding the endpoint set to wire protocols.
//!
//! - [`grpc`]: server adapter, client adapter, and the in-process connection
//! - [`http`]: JSON request/response projection
//! - [`status`]: the fixed error-to-status taxonomy shared by both

pub mod grpc;
pub mod http;
pub mod status;

pub use grpc::{
    decode_grpc_preamble_request, decode_grpc_preamble_response, encode_grpc_preamble_request,
    encode_grpc_preamble_response, GrpcClient, GrpcServer,
};
pub use http::{decode_http_preamble_request, encode_http_response, HttpHandler};
pub use status::{encode_error, OPAQUE_INTERNAL_MESSAGE};
