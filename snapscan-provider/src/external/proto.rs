//! Generated protobuf types for the `provider.Provider` service.

#![allow(clippy::enum_variant_names)]

tonic::include_proto!("provider");
