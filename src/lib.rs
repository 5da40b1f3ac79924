//! SiLA2 automation client for the Byonoy Absorbance 96 plate reader.
//!
//! The vendor desktop application embeds a SiLA2 (gRPC) server with two
//! feature groups: the standard `LockController` and the device-specific
//! `ApplicationController`. The server consumes its lock after every
//! command, so this client renews the lock (unlock, then lock) right
//! before each call. Readout commands only make sense in a fixed order,
//! which [`workflow::ReadoutWorkflow`] enforces before touching the wire.
//!
//! ```no_run
//! use absorbance96::{ConnectionConfig, ExportFormat, ReadoutWorkflow, RetryPolicy, Session};
//!
//! # async fn demo() -> absorbance96::ReaderResult<()> {
//! let session = Session::new(ConnectionConfig::default());
//! let mut reader = ReadoutWorkflow::new(session);
//! reader.connect(&RetryPolicy::default()).await?;
//!
//! reader.load_workspace("protocols/absorbance_600.byop").await?;
//! reader.prepare_for_readout().await?;
//! // Insert the plate.
//! reader.perform_readout().await?;
//! // Remove the plate.
//! let csv = reader.get_results(ExportFormat::Csv).await?;
//! reader.quit_application().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod grpc;
pub mod launcher;
pub mod session;
pub mod workflow;

mod lock;

pub use config::ConnectionConfig;
pub use error::{ReaderError, ReaderResult};
pub use launcher::{launch_app, locate_app, LaunchConfig};
pub use session::{RetryPolicy, Session};
pub use workflow::{normalize_workspace_uri, ExportFormat, ReaderState, ReadoutWorkflow};
