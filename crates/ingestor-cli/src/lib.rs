use anyhow::Context;
use ingestor_core::{ErrorMetadata, IngestConfig, IngestError, Rejection, SkipReason};
use ingestor_processing::{mime, EntryFilter, SecurityValidator};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// What the pipeline would do with an entry name before reading any content
#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum CheckReport {
    Skipped {
        reason: SkipReason,
    },
    Rejected {
        #[serde(flatten)]
        rejection: Rejection,
    },
    /// Passed every name and size check; the content signature is still unchecked
    Eligible {
        mime_type: String,
    },
}

/// Run the noise filter and the content-free validator checks for one name.
pub fn check_entry(
    config: Arc<IngestConfig>,
    name: &str,
    declared_size: u64,
    compressed_size: u64,
) -> anyhow::Result<CheckReport> {
    let filter = EntryFilter::new(&config.skip_patterns).context("Invalid skip pattern")?;
    if let Some(reason) = filter.should_skip(name) {
        return Ok(CheckReport::Skipped { reason });
    }

    let declared = mime::guess_from_name(name);
    let report =
        match SecurityValidator::new(config).precheck(name, declared, declared_size, compressed_size)
        {
            Ok(()) => CheckReport::Eligible {
                mime_type: declared.to_string(),
            },
            Err(rejection) => CheckReport::Rejected { rejection },
        };
    Ok(report)
}

/// JSON body printed when a batch aborts
#[derive(Debug, Serialize)]
pub struct AbortReport {
    pub error_code: &'static str,
    pub message: String,
    pub recoverable: bool,
    pub orphaned_keys: Vec<String>,
}

impl From<&IngestError> for AbortReport {
    fn from(err: &IngestError) -> Self {
        Self {
            error_code: err.error_code(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
            orphaned_keys: err.orphaned_keys().to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    /// One JSON object per event
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        match std::env::var("INGEST_LOG_FORMAT") {
            Ok(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// Load `.env` (from `dotenv_path`, or looked up from the working
/// directory), then read the log format.
///
/// Must run before tracing is set up, since `.env` may carry `RUST_LOG` and
/// `INGEST_LOG_FORMAT`.
pub fn load_environment(dotenv_path: Option<&Path>) -> LogFormat {
    match dotenv_path {
        Some(path) => {
            dotenvy::from_path(path).ok();
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }
    LogFormat::from_env()
}

/// Initialize tracing for CLI binaries.
///
/// Logs go to stderr so stdout stays parseable.
pub fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingestor_core::RejectionCode;

    fn config() -> Arc<IngestConfig> {
        Arc::new(IngestConfig::default())
    }

    #[test]
    fn check_skips_noise() {
        assert_eq!(
            check_entry(config(), "photos/.DS_Store", 10, 10).unwrap(),
            CheckReport::Skipped {
                reason: SkipReason::OsMetadata
            }
        );
    }

    #[test]
    fn check_rejects_bomb_ratio() {
        let report = check_entry(config(), "big.txt", 1_000_000, 1_000).unwrap();
        match report {
            CheckReport::Rejected { rejection } => {
                assert_eq!(rejection.code, RejectionCode::CompressionRatioExceeded)
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn check_accepts_plain_document() {
        assert_eq!(
            check_entry(config(), "reports/q1.pdf", 2048, 1900).unwrap(),
            CheckReport::Eligible {
                mime_type: "application/pdf".to_string()
            }
        );
    }

    #[test]
    fn check_report_serializes_with_decision_tag() {
        let json = serde_json::to_value(check_entry(config(), "../x.txt", 1, 1).unwrap()).unwrap();
        assert_eq!(json["decision"], "rejected");
        assert_eq!(json["code"], "PATH_TRAVERSAL");
    }

    #[test]
    fn log_format_comes_from_dotenv_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "INGEST_LOG_FORMAT=json\n").unwrap();
        std::env::remove_var("INGEST_LOG_FORMAT");

        assert_eq!(load_environment(Some(&path)), LogFormat::Json);
        std::env::remove_var("INGEST_LOG_FORMAT");
        assert_eq!(LogFormat::from_env(), LogFormat::Text);
    }

    #[test]
    fn abort_report_carries_orphans() {
        let err = IngestError::aborted(
            IngestError::Cancelled,
            vec!["t/a.txt".to_string()],
        );
        let report = AbortReport::from(&err);
        assert_eq!(report.error_code, "BATCH_CANCELLED");
        assert!(report.recoverable);
        assert_eq!(report.orphaned_keys, vec!["t/a.txt"]);
    }
}
