//! Readout workflow for the plate reader.
//!
//! The reader accepts its commands only in a fixed order: load a
//! workspace, prepare, perform the readout, then export or fetch the
//! results. [`ReadoutWorkflow`] tracks the reader's position in that
//! sequence and refuses out-of-order calls before anything reaches the
//! wire, so an operator sees "no workspace loaded" instead of a remote
//! fault. Every command runs behind a fresh lock renewal (see the
//! session's command path); a failed command leaves the state where it
//! was, except `quit_application`, which is best-effort and terminal
//! either way.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use tonic::Request;
use tracing::{info, warn};
use url::Url;

use crate::error::{ReaderError, ReaderResult};
use crate::grpc::{
    ApplicationControllerClient, ExportResultsRequest, GetResultsRequest, LoadWorkspaceRequest,
    PerformReadoutRequest, PrepareForReadoutRequest, QuitApplicationRequest, LOCK_METADATA_KEY,
};
use crate::session::{RetryPolicy, Session};

/// Position of the reader in the readout sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// No workspace loaded yet.
    Idle,
    /// A protocol is loaded; the reader can be prepared.
    WorkspaceLoaded,
    /// The reader accepted the protocol; the plate can be inserted.
    Prepared,
    /// A measurement exists; results can be exported or fetched.
    ReadoutPerformed,
    /// The application was told to shut down. Terminal.
    Terminated,
}

impl fmt::Display for ReaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::WorkspaceLoaded => "workspace loaded",
            Self::Prepared => "prepared",
            Self::ReadoutPerformed => "readout performed",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Result encodings the reader deployments are known to export.
///
/// Deployments disagree on the supported set (older installations expose
/// CSV-en/CSV-de/PDF, newer ones CSV/XLSX/JSON/XML), so the full union is
/// exposed here and the server arbitrates: a format a given installation
/// does not advertise comes back as a command failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Comma-separated values, English number formatting.
    Csv,
    /// Comma-separated values, German number formatting.
    CsvDe,
    /// Portable document.
    Pdf,
    /// Excel workbook.
    Xlsx,
    /// JSON document.
    Json,
    /// XML document.
    Xml,
}

impl ExportFormat {
    /// Wire name understood by the `ExportResults`/`GetResults` commands.
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Csv => "CSV-en",
            Self::CsvDe => "CSV-de",
            Self::Pdf => "PDF",
            Self::Xlsx => "XLSX",
            Self::Json => "JSON",
            Self::Xml => "XML",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for ExportFormat {
    type Err = ReaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" | "csv-en" => Ok(Self::Csv),
            "csv-de" => Ok(Self::CsvDe),
            "pdf" => Ok(Self::Pdf),
            "xlsx" => Ok(Self::Xlsx),
            "json" => Ok(Self::Json),
            "xml" => Ok(Self::Xml),
            other => Err(ReaderError::Validation {
                value: other.to_string(),
                reason: "unknown export format (expected csv, csv-de, pdf, xlsx, json or xml)"
                    .to_string(),
            }),
        }
    }
}

/// Normalizes a protocol reference to an absolute, scheme-qualified URI.
///
/// References already carrying a `file://`, `http://` or `https://` scheme
/// pass through unchanged. Anything else is treated as a filesystem path,
/// absolutized against the current directory if needed, and converted to a
/// `file://` URI. The server never receives a relative path.
pub fn normalize_workspace_uri(reference: &str) -> ReaderResult<String> {
    if reference.starts_with("file://")
        || reference.starts_with("http://")
        || reference.starts_with("https://")
    {
        return Ok(reference.to_string());
    }

    let path = Path::new(reference);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    Url::from_file_path(&absolute)
        .map(String::from)
        .map_err(|_| ReaderError::Validation {
            value: reference.to_string(),
            reason: "path cannot be expressed as a file:// URI".to_string(),
        })
}

/// Strict command sequence for one plate readout.
///
/// Owns the [`Session`] it drives and never constructs its own transport.
/// Multiple concurrent callers share a workflow behind
/// `Arc<tokio::sync::Mutex<ReadoutWorkflow>>`; within one workflow the
/// exclusive receivers already rule out interleaved commands.
pub struct ReadoutWorkflow {
    session: Session,
    state: ReaderState,
}

impl ReadoutWorkflow {
    /// Binds a workflow to a session. The session may connect later.
    pub fn new(session: Session) -> Self {
        Self {
            session,
            state: ReaderState::Idle,
        }
    }

    /// Current position in the readout sequence.
    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// The session this workflow drives.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Connects the underlying session. See [`Session::connect`].
    pub async fn connect(&mut self, policy: &RetryPolicy) -> ReaderResult<()> {
        self.session.connect(policy).await
    }

    /// Disconnects the underlying session.
    pub fn disconnect(&mut self) {
        self.session.disconnect();
    }

    /// Whether the underlying session is connected.
    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Loads an assay protocol from a path or URI.
    ///
    /// Allowed from any non-terminated state; loading a new protocol
    /// supersedes a previous preparation or readout, so the state resets
    /// to [`ReaderState::WorkspaceLoaded`].
    pub async fn load_workspace(&mut self, reference: &str) -> ReaderResult<()> {
        const COMMAND: &str = "load_workspace";
        if self.state == ReaderState::Terminated {
            return Err(self.out_of_order(COMMAND, "application already terminated"));
        }

        let uri = normalize_workspace_uri(reference)?;
        info!(uri = %uri, "loading workspace");
        self.session
            .execute(COMMAND, move |channel, lease| async move {
                let mut app = ApplicationControllerClient::new(channel);
                let mut request = Request::new(LoadWorkspaceRequest { workspace_uri: uri });
                request.metadata_mut().insert(LOCK_METADATA_KEY, lease);
                app.load_workspace(request).await.map(|_| ())
            })
            .await?;

        self.state = ReaderState::WorkspaceLoaded;
        Ok(())
    }

    /// Checks reader connectivity, status, and assay compatibility.
    ///
    /// After success the plate can be inserted.
    pub async fn prepare_for_readout(&mut self) -> ReaderResult<()> {
        const COMMAND: &str = "prepare_for_readout";
        if self.state != ReaderState::WorkspaceLoaded {
            return Err(self.out_of_order(COMMAND, "no workspace loaded"));
        }

        info!("preparing reader");
        self.session
            .execute(COMMAND, |channel, lease| async move {
                let mut app = ApplicationControllerClient::new(channel);
                let mut request = Request::new(PrepareForReadoutRequest {});
                request.metadata_mut().insert(LOCK_METADATA_KEY, lease);
                app.prepare_for_readout(request).await.map(|_| ())
            })
            .await?;

        self.state = ReaderState::Prepared;
        Ok(())
    }

    /// Performs the measurement defined by the loaded protocol.
    ///
    /// After success the plate can be removed.
    pub async fn perform_readout(&mut self) -> ReaderResult<()> {
        const COMMAND: &str = "perform_readout";
        if self.state != ReaderState::Prepared {
            return Err(self.out_of_order(COMMAND, "reader not prepared"));
        }

        info!("performing readout");
        self.session
            .execute(COMMAND, |channel, lease| async move {
                let mut app = ApplicationControllerClient::new(channel);
                let mut request = Request::new(PerformReadoutRequest {});
                request.metadata_mut().insert(LOCK_METADATA_KEY, lease);
                app.perform_readout(request).await.map(|_| ())
            })
            .await?;

        self.state = ReaderState::ReadoutPerformed;
        Ok(())
    }

    /// Writes results to a path addressable by the server machine.
    ///
    /// Repeatable after one successful readout.
    pub async fn export_results(
        &mut self,
        output_path: &str,
        format: ExportFormat,
    ) -> ReaderResult<()> {
        const COMMAND: &str = "export_results";
        if self.state != ReaderState::ReadoutPerformed {
            return Err(self.out_of_order(COMMAND, "no results available"));
        }

        info!(path = %output_path, format = %format, "exporting results");
        let output_path = output_path.to_string();
        self.session
            .execute(COMMAND, move |channel, lease| async move {
                let mut app = ApplicationControllerClient::new(channel);
                let mut request = Request::new(ExportResultsRequest {
                    format: format.wire_name().to_string(),
                    output_path,
                });
                request.metadata_mut().insert(LOCK_METADATA_KEY, lease);
                app.export_results(request).await.map(|_| ())
            })
            .await
    }

    /// Returns the encoded results. Repeatable after one successful readout.
    pub async fn get_results(&mut self, format: ExportFormat) -> ReaderResult<Vec<u8>> {
        const COMMAND: &str = "get_results";
        if self.state != ReaderState::ReadoutPerformed {
            return Err(self.out_of_order(COMMAND, "no results available"));
        }

        info!(format = %format, "fetching results");
        self.session
            .execute(COMMAND, move |channel, lease| async move {
                let mut app = ApplicationControllerClient::new(channel);
                let mut request = Request::new(GetResultsRequest {
                    format: format.wire_name().to_string(),
                });
                request.metadata_mut().insert(LOCK_METADATA_KEY, lease);
                app.get_results(request)
                    .await
                    .map(|response| response.into_inner().data)
            })
            .await
    }

    /// Shuts the vendor application down. The only way to close it when
    /// running headless.
    ///
    /// Best-effort: the workflow is terminated afterwards even when the
    /// remote call fails, and the failure is still reported.
    pub async fn quit_application(&mut self) -> ReaderResult<()> {
        const COMMAND: &str = "quit_application";
        if self.state == ReaderState::Terminated {
            return Err(self.out_of_order(COMMAND, "application already terminated"));
        }
        if !self.session.is_connected() {
            return Err(ReaderError::Precondition {
                command: COMMAND,
                reason: "not connected".to_string(),
            });
        }

        info!("shutting down application");
        let result = self
            .session
            .execute(COMMAND, |channel, lease| async move {
                let mut app = ApplicationControllerClient::new(channel);
                let mut request = Request::new(QuitApplicationRequest {});
                request.metadata_mut().insert(LOCK_METADATA_KEY, lease);
                app.quit_application(request).await.map(|_| ())
            })
            .await;

        self.state = ReaderState::Terminated;
        if let Err(err) = &result {
            warn!(error = %err, "quit reported an error; treating application as terminated");
        }
        result
    }

    fn out_of_order(&self, command: &'static str, reason: &str) -> ReaderError {
        ReaderError::Precondition {
            command,
            reason: format!("{} (reader state: {})", reason, self.state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_qualified_references_pass_through() {
        let uri = normalize_workspace_uri("https://example.com/assays/a.byop")
            .expect("scheme-qualified URI should pass through");
        assert_eq!(uri, "https://example.com/assays/a.byop");

        let uri = normalize_workspace_uri("file:///tmp/a.byop").expect("file URI passes through");
        assert_eq!(uri, "file:///tmp/a.byop");
    }

    #[test]
    fn test_absolute_path_becomes_file_uri() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("assay.byop");
        let uri =
            normalize_workspace_uri(path.to_str().expect("utf-8 path")).expect("normalizes");
        assert!(uri.starts_with("file://"), "got {}", uri);
        assert!(uri.ends_with("assay.byop"));
    }

    #[test]
    fn test_relative_path_is_absolutized() {
        let uri = normalize_workspace_uri("protocols/assay.byop").expect("normalizes");
        assert!(uri.starts_with("file://"));
        let cwd = std::env::current_dir().expect("cwd");
        let parsed = Url::parse(&uri).expect("valid URI");
        let back = parsed.to_file_path().expect("file path");
        assert!(back.is_absolute());
        assert!(back.starts_with(cwd));
    }

    #[test]
    fn test_export_format_wire_names() {
        assert_eq!(ExportFormat::Csv.wire_name(), "CSV-en");
        assert_eq!(ExportFormat::CsvDe.wire_name(), "CSV-de");
        assert_eq!(ExportFormat::Pdf.wire_name(), "PDF");
        assert_eq!(ExportFormat::Xlsx.wire_name(), "XLSX");
    }

    #[test]
    fn test_export_format_parsing() {
        assert_eq!("csv".parse::<ExportFormat>().expect("csv"), ExportFormat::Csv);
        assert_eq!("CSV-en".parse::<ExportFormat>().expect("csv-en"), ExportFormat::Csv);
        assert_eq!("csv-de".parse::<ExportFormat>().expect("csv-de"), ExportFormat::CsvDe);
        assert_eq!("XML".parse::<ExportFormat>().expect("xml"), ExportFormat::Xml);
        assert!("docx".parse::<ExportFormat>().is_err());
    }
}
