//! Protobuf messages and tonic bindings for the `pb.Preamblesvc` gRPC service.
//!
//! The messages mirror `proto/preamblesvc.proto`. The build script generates
//! [`preamblesvc_server`] (the `Preamblesvc` trait and `PreamblesvcServer`)
//! and [`preamblesvc_client`] (`PreamblesvcClient`) around them.

/// Fully-qualified gRPC service name.
pub const SERVICE_NAME: &str = "pb.Preamblesvc";

include!(concat!(env!("OUT_DIR"), "/pb.Preamblesvc.rs"));

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct PreambleRequest {
    #[prost(int64, optional, tag = "1")]
    pub msg: ::core::option::Option<i64>,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct PreambleReply {
    #[prost(int64, tag = "1")]
    pub rs: i64,
}
