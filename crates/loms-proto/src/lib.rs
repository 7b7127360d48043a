//! Generated gRPC types and service stubs for LOMS's `Orders`/`Stocks` services.
//! See `build.rs` and `proto/loms.proto`.

pub mod v1 {
    tonic::include_proto!("loms.v1");
}

/// Encoded `FileDescriptorSet` for the `loms.v1` package, used to register
/// gRPC server reflection in non-release builds.
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("loms_descriptor");
