//! Horn API - gRPC and broker message definitions
//!
//! This crate provides:
//! - `twinface.subscribe`: the client-facing streaming service (generated from proto)
//! - `twins.notify`: payloads exchanged with Twins over AMQP (generated from proto)
//! - Shared constants and update builders

pub mod model;

pub mod subscribe {
    tonic::include_proto!("twinface.subscribe");
}

pub mod notify {
    tonic::include_proto!("twins.notify");
}

pub use model::*;
