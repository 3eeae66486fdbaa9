/// Audit logging for privileged operations
///
/// Every setup and cleanup is recorded with its parameters and outcome, so
/// an administrator can tell when the mangle table was last touched and why.
use crate::core::rules::RuntimeParameters;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Types of auditable events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Setup,
    Cleanup,
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Type of event
    pub event_type: EventType,

    /// Whether the operation succeeded
    pub success: bool,

    /// Additional structured data about the event
    pub details: serde_json::Value,

    /// Error message if operation failed
    pub error: Option<String>,
}

impl AuditEvent {
    /// Creates a new audit event
    pub fn new(
        event_type: EventType,
        success: bool,
        details: serde_json::Value,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            event_type,
            success,
            details,
            error,
        }
    }
}

/// Audit log writer
pub struct AuditLog {
    log_path: PathBuf,
}

impl AuditLog {
    /// Creates an audit log in the state directory
    ///
    /// # Errors
    ///
    /// Returns `Err` if state directory cannot be determined
    pub fn new() -> std::io::Result<Self> {
        let mut log_path = crate::utils::get_state_dir().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "State directory not found")
        })?;
        log_path.push("audit.log");

        Ok(Self { log_path })
    }

    /// Creates an audit log at an explicit path
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: path.into(),
        }
    }

    /// Appends an event to the audit log
    ///
    /// Events are written as JSON-lines format (one JSON object per line)
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be opened or written
    pub async fn log(&self, event: AuditEvent) -> std::io::Result<()> {
        let json = serde_json::to_string(&event)?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .mode(0o600)
            .open(&self.log_path)
            .await?;

        file.write_all(json.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.sync_all().await?;

        Ok(())
    }

    /// Reads the most recent events from the log, newest first
    ///
    /// # Arguments
    ///
    /// * `count` - Maximum number of events to return
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be read. Lines that are not valid events
    /// are skipped.
    pub async fn read_recent(&self, count: usize) -> std::io::Result<Vec<AuditEvent>> {
        let content = tokio::fs::read_to_string(&self.log_path).await?;

        let events: Vec<AuditEvent> = content
            .lines()
            .rev()
            .filter_map(|line| serde_json::from_str(line).ok())
            .take(count)
            .collect();

        Ok(events)
    }

    /// Returns the path to the audit log file
    pub fn path(&self) -> &Path {
        &self.log_path
    }

    async fn record(&self, event: AuditEvent) {
        if let Err(e) = self.log(event).await {
            tracing::warn!("Failed to write audit log {}: {}", self.log_path.display(), e);
        }
    }

    /// Logs a setup attempt
    ///
    /// # Arguments
    ///
    /// * `params` - Parameters the rules were rendered with
    /// * `skipped` - Optional rules the kernel refused
    /// * `error` - Error message if setup failed
    pub async fn log_setup(
        &self,
        params: &RuntimeParameters,
        skipped: usize,
        error: Option<String>,
    ) {
        let event = AuditEvent::new(
            EventType::Setup,
            error.is_none(),
            serde_json::json!({
                "mark": params.mark,
                "mask": params.mask,
                "queue_num": params.queue_num,
                "all_interfaces": params.all_interfaces,
                "interfaces": params.interfaces,
                "optional_skipped": skipped,
            }),
            error,
        );
        self.record(event).await;
    }

    /// Logs a cleanup, which never fails
    pub async fn log_cleanup(&self, reason: &str) {
        let event = AuditEvent::new(
            EventType::Cleanup,
            true,
            serde_json::json!({ "reason": reason }),
            None,
        );
        self.record(event).await;
    }
}

/// Logs a setup attempt to the default audit log
pub async fn log_setup(params: &RuntimeParameters, skipped: usize, error: Option<String>) {
    if let Ok(audit) = AuditLog::new() {
        audit.log_setup(params, skipped, error).await;
    }
}

/// Logs a cleanup to the default audit log
pub async fn log_cleanup(reason: &str) {
    if let Ok(audit) = AuditLog::new() {
        audit.log_cleanup(reason).await;
    }
}
