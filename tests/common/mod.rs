//! In-process mock of the reader's SiLA2 server.
//!
//! Mirrors the vendor server's locking contract: a lease is issued by
//! `LockServer`, every application command must present it as metadata,
//! and executing a command consumes the lease. Fault behaviors can be
//! switched on per test to exercise the client's error paths.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::metadata::MetadataMap;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

use absorbance96::grpc::proto::application_controller_server::{
    ApplicationController, ApplicationControllerServer,
};
use absorbance96::grpc::proto::lock_controller_server::{LockController, LockControllerServer};
use absorbance96::grpc::proto::{
    ExportResultsRequest, ExportResultsResponse, GetResultsRequest, GetResultsResponse,
    LoadWorkspaceRequest, LoadWorkspaceResponse, LockServerRequest, LockServerResponse,
    PerformReadoutRequest, PerformReadoutResponse, PrepareForReadoutRequest,
    PrepareForReadoutResponse, QuitApplicationRequest, QuitApplicationResponse,
    UnlockServerRequest, UnlockServerResponse,
};
use absorbance96::grpc::LOCK_METADATA_KEY;
use absorbance96::ConnectionConfig;

/// Sample payload returned by `GetResults`.
pub const SAMPLE_CSV: &[u8] = b"well,od600\nA1,0.42\nA2,0.38\n";

/// Switchable fault behaviors.
#[derive(Default)]
pub struct Behavior {
    /// `UnlockServer` fails with `Internal` instead of releasing.
    pub fail_unlock: AtomicBool,
    /// `LockServer` refuses the lease.
    pub deny_lock: AtomicBool,
    /// `PrepareForReadout` reports a reader fault.
    pub fail_prepare: AtomicBool,
    /// `QuitApplication` reports a fault.
    pub fail_quit: AtomicBool,
    /// `PerformReadout` never answers.
    pub hang_readout: AtomicBool,
}

#[derive(Default)]
struct Inner {
    calls: Mutex<Vec<String>>,
    lease: Mutex<Option<String>>,
    lease_counter: AtomicU32,
    results_ready: AtomicBool,
    behavior: Behavior,
}

/// Shared handle to the mock server's state; clone freely.
#[derive(Clone, Default)]
pub struct MockReader {
    inner: Arc<Inner>,
}

impl MockReader {
    /// Ordered log of unlock/lock/command dispatches.
    pub fn calls(&self) -> Vec<String> {
        self.inner.calls.lock().unwrap().clone()
    }

    /// Fault switches.
    pub fn behavior(&self) -> &Behavior {
        &self.inner.behavior
    }

    fn record(&self, name: &str) {
        self.inner.calls.lock().unwrap().push(name.to_string());
    }

    /// Validates the presented lease and consumes it, the way the vendor
    /// server burns its lock on every command.
    fn take_lease(&self, metadata: &MetadataMap) -> Result<(), Status> {
        let presented = metadata
            .get(LOCK_METADATA_KEY)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| Status::permission_denied("missing lease token"))?;

        let mut lease = self.inner.lease.lock().unwrap();
        match lease.as_deref() {
            Some(current) if current == presented => {
                *lease = None;
                Ok(())
            }
            _ => Err(Status::permission_denied("missing or stale lease token")),
        }
    }
}

#[tonic::async_trait]
impl LockController for MockReader {
    async fn lock_server(
        &self,
        request: Request<LockServerRequest>,
    ) -> Result<Response<LockServerResponse>, Status> {
        self.record("lock");
        if self.inner.behavior.deny_lock.load(Ordering::SeqCst) {
            return Err(Status::permission_denied("server is locked by another client"));
        }

        let req = request.into_inner();
        if req.lock_identifier.is_empty() {
            return Err(Status::invalid_argument("empty lock identifier"));
        }
        if req.timeout_seconds == 0 {
            return Err(Status::invalid_argument("lease timeout must be positive"));
        }

        let token = format!(
            "lease-{}",
            self.inner.lease_counter.fetch_add(1, Ordering::SeqCst) + 1
        );
        *self.inner.lease.lock().unwrap() = Some(token.clone());
        Ok(Response::new(LockServerResponse { lease_token: token }))
    }

    async fn unlock_server(
        &self,
        request: Request<UnlockServerRequest>,
    ) -> Result<Response<UnlockServerResponse>, Status> {
        self.record("unlock");
        if self.inner.behavior.fail_unlock.load(Ordering::SeqCst) {
            return Err(Status::internal("lock subsystem fault"));
        }
        if request.get_ref().lock_identifier.is_empty() {
            return Err(Status::invalid_argument("empty lock identifier"));
        }

        let mut lease = self.inner.lease.lock().unwrap();
        if lease.take().is_none() {
            return Err(Status::failed_precondition("server is not locked"));
        }
        Ok(Response::new(UnlockServerResponse {}))
    }
}

#[tonic::async_trait]
impl ApplicationController for MockReader {
    async fn load_workspace(
        &self,
        request: Request<LoadWorkspaceRequest>,
    ) -> Result<Response<LoadWorkspaceResponse>, Status> {
        self.take_lease(request.metadata())?;
        self.record("load_workspace");

        let uri = &request.get_ref().workspace_uri;
        if !(uri.starts_with("file://") || uri.starts_with("http://") || uri.starts_with("https://"))
        {
            return Err(Status::invalid_argument("workspace uri must be absolute"));
        }
        Ok(Response::new(LoadWorkspaceResponse {}))
    }

    async fn prepare_for_readout(
        &self,
        request: Request<PrepareForReadoutRequest>,
    ) -> Result<Response<PrepareForReadoutResponse>, Status> {
        self.take_lease(request.metadata())?;
        self.record("prepare_for_readout");

        if self.inner.behavior.fail_prepare.load(Ordering::SeqCst) {
            return Err(Status::failed_precondition("no reader attached"));
        }
        Ok(Response::new(PrepareForReadoutResponse {}))
    }

    async fn perform_readout(
        &self,
        request: Request<PerformReadoutRequest>,
    ) -> Result<Response<PerformReadoutResponse>, Status> {
        self.take_lease(request.metadata())?;
        self.record("perform_readout");

        if self.inner.behavior.hang_readout.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.inner.results_ready.store(true, Ordering::SeqCst);
        Ok(Response::new(PerformReadoutResponse {}))
    }

    async fn export_results(
        &self,
        request: Request<ExportResultsRequest>,
    ) -> Result<Response<ExportResultsResponse>, Status> {
        self.take_lease(request.metadata())?;
        self.record("export_results");

        if !self.inner.results_ready.load(Ordering::SeqCst) {
            return Err(Status::failed_precondition("no readout performed"));
        }
        if request.get_ref().output_path.is_empty() {
            return Err(Status::invalid_argument("empty output path"));
        }
        Ok(Response::new(ExportResultsResponse {}))
    }

    async fn get_results(
        &self,
        request: Request<GetResultsRequest>,
    ) -> Result<Response<GetResultsResponse>, Status> {
        self.take_lease(request.metadata())?;
        self.record("get_results");

        if !self.inner.results_ready.load(Ordering::SeqCst) {
            return Err(Status::failed_precondition("no readout performed"));
        }
        Ok(Response::new(GetResultsResponse {
            data: SAMPLE_CSV.to_vec(),
        }))
    }

    async fn quit_application(
        &self,
        request: Request<QuitApplicationRequest>,
    ) -> Result<Response<QuitApplicationResponse>, Status> {
        self.take_lease(request.metadata())?;
        self.record("quit_application");

        if self.inner.behavior.fail_quit.load(Ordering::SeqCst) {
            return Err(Status::internal("application refused to shut down"));
        }
        Ok(Response::new(QuitApplicationResponse {}))
    }
}

/// Serves the mock on an already-bound listener.
pub fn serve_mock_on(listener: TcpListener, mock: MockReader) {
    tokio::spawn(async move {
        let _ = Server::builder()
            .add_service(LockControllerServer::new(mock.clone()))
            .add_service(ApplicationControllerServer::new(mock))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await;
    });
}

/// Spawns a mock server on an ephemeral port.
pub async fn spawn_mock_reader() -> (MockReader, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    let mock = MockReader::default();
    serve_mock_on(listener, mock.clone());
    (mock, addr)
}

/// Client settings pointed at a mock server.
pub fn test_config(port: u16) -> ConnectionConfig {
    ConnectionConfig {
        host: "127.0.0.1".to_string(),
        port,
        insecure: true,
        ..ConnectionConfig::default()
    }
}
