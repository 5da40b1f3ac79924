//! Generated gRPC bindings for the reader's SiLA2 surface.
//!
//! The vendor server exposes two feature groups: `LockController` (the
//! standard exclusivity feature) and `ApplicationController` (the
//! readout commands). Wire types live in [`proto`]; the commonly used
//! clients and request types are re-exported here.

/// Metadata key carrying the lease token on every application-control call.
pub const LOCK_METADATA_KEY: &str = "lock-identifier";

/// Raw types generated from `proto/absorbance96.proto`.
pub mod proto {
    #![allow(missing_docs)]
    tonic::include_proto!("absorbance96.v1");
}

pub use proto::application_controller_client::ApplicationControllerClient;
pub use proto::lock_controller_client::LockControllerClient;
pub use proto::{
    ExportResultsRequest, GetResultsRequest, LoadWorkspaceRequest, LockServerRequest,
    PerformReadoutRequest, PrepareForReadoutRequest, QuitApplicationRequest, UnlockServerRequest,
};
