//! JSONL log files.
//!
//! [`LogFileLayer`] is a `tracing_subscriber::Layer` that appends every event
//! to `combined.log` and warnings/errors additionally to `error.log`, one JSON
//! object per line.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tracing::{
        Level,
        field::{Field, Visit},
    },
    tracing_subscriber::{Layer, layer::Context},
};

pub const COMBINED_LOG: &str = "combined.log";
pub const ERROR_LOG: &str = "error.log";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub ts: String,
    pub level: String,
    pub target: String,
    pub message: String,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    #[serde(default)]
    pub fields: serde_json::Map<String, Value>,
}

// ── Visitor (extracts fields from tracing events) ───────────────────────────

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: serde_json::Map<String, Value>,
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields
                .insert(field.name().into(), Value::String(format!("{value:?}")));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.into();
        } else {
            self.fields
                .insert(field.name().into(), Value::String(value.into()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields
            .insert(field.name().into(), Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields
            .insert(field.name().into(), Value::Number(value.into()));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.fields.insert(field.name().into(), Value::Number(n));
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().into(), Value::Bool(value));
    }
}

// ── LogFileLayer ────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct LogFileLayer {
    combined: Arc<Mutex<File>>,
    errors: Arc<Mutex<File>>,
    dir: PathBuf,
}

impl LogFileLayer {
    /// Open (creating if needed) the log files inside `dir`.
    pub fn open(dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let open = |name: &str| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(name))
        };
        Ok(Self {
            combined: Arc::new(Mutex::new(open(COMBINED_LOG)?)),
            errors: Arc::new(Mutex::new(open(ERROR_LOG)?)),
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn append(file: &Mutex<File>, line: &str) {
        if let Ok(mut file) = file.lock() {
            let _ = writeln!(file, "{line}");
        }
    }
}

impl<S: tracing::Subscriber> Layer<S> for LogFileLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let entry = LogEntry {
            ts: chrono::Utc::now().to_rfc3339(),
            level: meta.level().to_string(),
            target: meta.target().into(),
            message: visitor.message,
            fields: visitor.fields,
        };
        let Ok(line) = serde_json::to_string(&entry) else {
            return;
        };

        Self::append(&self.combined, &line);
        if *meta.level() <= Level::WARN {
            Self::append(&self.errors, &line);
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        tracing::{error, info, warn},
        tracing_subscriber::layer::SubscriberExt,
    };

    fn read_entries(path: &Path) -> Vec<LogEntry> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn writes_combined_and_error_files() {
        let tmp = tempfile::tempdir().unwrap();
        let layer = LogFileLayer::open(&tmp.path().join("logs")).unwrap();
        let subscriber = tracing_subscriber::registry().with(layer.clone());

        tracing::subscriber::with_default(subscriber, || {
            info!(port = 3000u64, "server listening");
            warn!(reason = "LOGOUT", "client disconnected");
            error!("send failed");
        });

        let combined = read_entries(&layer.dir().join(COMBINED_LOG));
        assert_eq!(combined.len(), 3);
        assert_eq!(combined[0].message, "server listening");
        assert_eq!(combined[0].level, "INFO");
        assert_eq!(combined[0].fields["port"], 3000);

        let errors = read_entries(&layer.dir().join(ERROR_LOG));
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].fields["reason"], "LOGOUT");
        assert_eq!(errors[1].level, "ERROR");
    }

    #[test]
    fn appends_across_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        for _ in 0..2 {
            let layer = LogFileLayer::open(tmp.path()).unwrap();
            let subscriber = tracing_subscriber::registry().with(layer);
            tracing::subscriber::with_default(subscriber, || info!("tick"));
        }
        assert_eq!(read_entries(&tmp.path().join(COMBINED_LOG)).len(), 2);
    }
}
