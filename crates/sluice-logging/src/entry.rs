use crate::runtime::{OperatingSystem, operating_system};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use sluice_types::{LogLevel, MessageKind, MessageMethod, MessageState, RequestId};

const CATEGORY_ASSEMBLY: &str = "assembly";
const CATEGORY_COMMUNICATION: &str = "communication";
const CATEGORY_LOG_TASK: &str = "log task";

/// Identity of a loaded component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentInfo {
    pub full_name: String,
    pub file_version: Option<String>,
    pub informational_version: Option<String>,
    pub location: Option<String>,
    pub operating_system: Option<OperatingSystem>,
}

impl ComponentInfo {
    /// This library as loaded into the current process.
    pub fn current() -> Self {
        Self {
            full_name: format!(
                "{}, Version={}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ),
            file_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            informational_version: option_env!("SLUICE_BUILD_COMMIT").map(str::to_string),
            location: std::env::current_exe()
                .ok()
                .map(|path| path.display().to_string()),
            operating_system: operating_system(),
        }
    }

    /// The executable hosting this library. Its versions are whatever the host reports.
    pub fn entry(version: Option<String>, informational_version: Option<String>) -> Self {
        let full_name = std::env::current_exe()
            .ok()
            .and_then(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "unknown".to_string());
        Self {
            full_name,
            file_version: version,
            informational_version,
            location: None,
            operating_system: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntryKind {
    Assembly(ComponentInfo),
    EntryAssembly(ComponentInfo),
    Communication {
        request_id: RequestId,
        method: MessageMethod,
        kind: MessageKind,
        state: MessageState,
        details: Option<String>,
    },
    TaskLog {
        request_id: RequestId,
        task_id: Option<String>,
        message: String,
        level: LogLevel,
    },
}

/// A log entry stamped with the time it was created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    timestamp: DateTime<Utc>,
    kind: LogEntryKind,
}

impl LogEntry {
    pub fn new(kind: LogEntryKind) -> Self {
        Self::at(Utc::now(), kind)
    }

    pub fn at(timestamp: DateTime<Utc>, kind: LogEntryKind) -> Self {
        Self { timestamp, kind }
    }

    pub fn assembly() -> Self {
        Self::new(LogEntryKind::Assembly(ComponentInfo::current()))
    }

    pub fn entry_assembly(version: Option<String>, informational_version: Option<String>) -> Self {
        Self::new(LogEntryKind::EntryAssembly(ComponentInfo::entry(
            version,
            informational_version,
        )))
    }

    pub fn communication(
        request_id: RequestId,
        method: MessageMethod,
        kind: MessageKind,
        state: MessageState,
        details: Option<String>,
    ) -> Self {
        Self::new(LogEntryKind::Communication {
            request_id,
            method,
            kind,
            state,
            details,
        })
    }

    /// Narration tied to a request. Records the current tokio task when there is one.
    pub fn task_log(request_id: RequestId, message: impl Into<String>, level: LogLevel) -> Self {
        Self::new(LogEntryKind::TaskLog {
            request_id,
            task_id: tokio::task::try_id().map(|id| id.to_string()),
            message: message.into(),
            level,
        })
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn kind(&self) -> &LogEntryKind {
        &self.kind
    }

    pub fn category(&self) -> &'static str {
        match self.kind {
            LogEntryKind::Assembly(_) | LogEntryKind::EntryAssembly(_) => CATEGORY_ASSEMBLY,
            LogEntryKind::Communication { .. } => CATEGORY_COMMUNICATION,
            LogEntryKind::TaskLog { .. } => CATEGORY_LOG_TASK,
        }
    }

    pub fn level(&self) -> LogLevel {
        match &self.kind {
            LogEntryKind::Assembly(_) | LogEntryKind::EntryAssembly(_) => LogLevel::Information,
            LogEntryKind::Communication { .. } => LogLevel::Debug,
            LogEntryKind::TaskLog { level, .. } => *level,
        }
    }

    /// Render into the canonical record. Pure, performs no I/O.
    pub fn to_record(&self) -> LogRecord {
        let mut message = Map::new();
        match &self.kind {
            LogEntryKind::Assembly(info) | LogEntryKind::EntryAssembly(info) => {
                put(&mut message, "assembly full name", &info.full_name);
                put_opt(&mut message, "file version", info.file_version.as_deref());
                put_opt(&mut message, "location", info.location.as_deref());
                put_opt(
                    &mut message,
                    "operating system",
                    info.operating_system.map(|os| os.to_string()).as_deref(),
                );
                put_opt(
                    &mut message,
                    "informational version",
                    info.informational_version.as_deref(),
                );
            }
            LogEntryKind::Communication {
                request_id,
                method,
                kind,
                state,
                details,
            } => {
                put(&mut message, "request ID", request_id.as_str());
                put(&mut message, "method", &method.to_string());
                put(&mut message, "message kind", &kind.to_string());
                put(&mut message, "state", &state.to_string());
                put_opt(&mut message, "details", details.as_deref());
            }
            LogEntryKind::TaskLog {
                request_id,
                task_id,
                message: text,
                level,
            } => {
                put(&mut message, "request ID", request_id.as_str());
                put(&mut message, "message", text);
                put(&mut message, "log level", &level.to_string());
                put_opt(&mut message, "current task ID", task_id.as_deref());
            }
        }

        LogRecord {
            timestamp: self
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            category: self.category(),
            message,
            level: self.level(),
        }
    }
}

fn put(map: &mut Map<String, Value>, key: &str, value: &str) {
    map.insert(key.to_string(), Value::String(value.to_string()));
}

fn put_opt(map: &mut Map<String, Value>, key: &str, value: Option<&str>) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        put(map, key, value);
    }
}

/// Canonical structured form of a [`LogEntry`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub timestamp: String,
    pub category: &'static str,
    pub message: Map<String, Value>,
    #[serde(skip)]
    pub level: LogLevel,
}

impl LogRecord {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.message.get(key).and_then(Value::as_str)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn assembly_omits_absent_fields() {
        let info = ComponentInfo {
            full_name: "sluice-logging, Version=0.1.0".to_string(),
            file_version: Some("0.1.0".to_string()),
            informational_version: None,
            location: None,
            operating_system: None,
        };
        let record = LogEntry::at(fixed_time(), LogEntryKind::Assembly(info)).to_record();

        assert_eq!(record.category, "assembly");
        assert_eq!(record.timestamp, "2024-03-01T12:00:00.000Z");
        assert_eq!(record.field("file version"), Some("0.1.0"));
        assert!(!record.message.contains_key("informational version"));
        assert!(!record.message.contains_key("location"));
        assert!(!record.message.contains_key("operating system"));
        assert!(!record.to_json().contains("null"));
    }

    #[test]
    fn own_component_reports_operating_system_when_known() {
        let record = LogEntry::assembly().to_record();
        assert_eq!(
            record.field("operating system").map(str::to_string),
            operating_system().map(|os| os.to_string())
        );
    }

    #[test]
    fn entry_component_never_carries_os() {
        let record = LogEntry::entry_assembly(Some("2.1.0".to_string()), None).to_record();
        assert_eq!(record.category, "assembly");
        assert_eq!(record.field("file version"), Some("2.1.0"));
        assert!(!record.message.contains_key("informational version"));
        assert!(!record.message.contains_key("operating system"));
        assert!(!record.message.contains_key("location"));
    }

    #[test]
    fn entry_component_reports_host_build() {
        let record = LogEntry::entry_assembly(
            Some("2.1.0".to_string()),
            Some("2.1.0+3f9c2e1".to_string()),
        )
        .to_record();
        assert_eq!(record.field("informational version"), Some("2.1.0+3f9c2e1"));
    }

    #[test]
    fn communication_fields() {
        let record = LogEntry::communication(
            "r1".into(),
            MessageMethod::ListResources,
            MessageKind::Response,
            MessageState::Succeeded,
            None,
        )
        .to_record();

        assert_eq!(record.category, "communication");
        assert_eq!(record.field("request ID"), Some("r1"));
        assert_eq!(record.field("method"), Some("ListResources"));
        assert_eq!(record.field("message kind"), Some("Response"));
        assert_eq!(record.field("state"), Some("Succeeded"));
        assert!(!record.message.contains_key("details"));
    }

    #[test]
    fn communication_details_when_present() {
        let record = LogEntry::communication(
            "r2".into(),
            MessageMethod::GetCredentials,
            MessageKind::Fault,
            MessageState::Failed,
            Some("access denied".to_string()),
        )
        .to_record();
        assert_eq!(record.field("details"), Some("access denied"));
    }

    #[test]
    fn task_log_outside_a_task_has_no_task_id() {
        let record = LogEntry::task_log("r3".into(), "hello", LogLevel::Warning).to_record();
        assert_eq!(record.category, "log task");
        assert_eq!(record.field("message"), Some("hello"));
        assert_eq!(record.field("log level"), Some("Warning"));
        assert!(!record.message.contains_key("current task ID"));
        assert_eq!(record.level, LogLevel::Warning);
    }

    #[tokio::test]
    async fn task_log_inside_a_task_records_task_id() {
        let record = tokio::spawn(async {
            LogEntry::task_log("r4".into(), "from task", LogLevel::Debug).to_record()
        })
        .await
        .unwrap();
        assert!(record.message.contains_key("current task ID"));
    }
}
