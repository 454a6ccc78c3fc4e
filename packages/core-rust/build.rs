//! Generates the `pb.Preamblesvc` tonic client and server.
//!
//! The message types are the prost structs in `src/messages/wire.rs`, kept in
//! step with `proto/preamblesvc.proto`, so the build does not need `protoc`.

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let preamble = tonic_build::manual::Method::builder()
        .name("preamble")
        .route_name("Preamble")
        .input_type("crate::messages::wire::PreambleRequest")
        .output_type("crate::messages::wire::PreambleReply")
        .codec_path("tonic_prost::ProstCodec")
        .build();

    let service = tonic_build::manual::Service::builder()
        .name("Preamblesvc")
        .package("pb")
        .method(preamble)
        .build();

    tonic_build::manual::Builder::new().compile(&[service]);
}
