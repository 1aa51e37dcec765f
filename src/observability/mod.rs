pub mod pii;

use chrono::Utc;
use serde_json::{Map, Value};
use self::pii::mask_secrets;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Error,
    Warn,
    Info,
    Debug,
}

impl Level {
    fn as_str(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
        }
    }
}

/// JSON-lines logger on stderr; stdout is reserved for the report.
#[derive(Debug, Clone)]
pub struct Logger {
    run_id: String,
    max_level: Level,
}

impl Logger {
    pub fn new(run_id: String, max_level: Level) -> Self {
        Self { run_id, max_level }
    }

    pub fn enabled(&self, level: Level) -> bool {
        level <= self.max_level
    }

    pub fn error(&self, msg: &str, context: Option<&Value>) {
        self.log(Level::Error, msg, context);
    }

    pub fn warn(&self, msg: &str, context: Option<&Value>) {
        self.log(Level::Warn, msg, context);
    }

    pub fn info(&self, msg: &str, context: Option<&Value>) {
        self.log(Level::Info, msg, context);
    }

    pub fn debug(&self, msg: &str, context: Option<&Value>) {
        self.log(Level::Debug, msg, context);
    }

    fn log(&self, level: Level, msg: &str, context: Option<&Value>) {
        if !self.enabled(level) {
            return;
        }
        let entry = self.build_entry(level, msg, context);
        eprintln!("{}", serde_json::to_string(&entry).unwrap_or_default());
    }

    fn build_entry(&self, level: Level, msg: &str, context: Option<&Value>) -> Value {
        let mut entry = Map::new();
        entry.insert("ts".into(), Value::from(Utc::now().to_rfc3339()));
        entry.insert("level".into(), Value::from(level.as_str()));
        entry.insert("msg".into(), Value::from(mask_secrets(msg)));
        entry.insert("run_id".into(), Value::from(self.run_id.as_str()));

        let fields = context.and_then(Value::as_object).into_iter().flatten();
        for (key, value) in fields {
            let value = match value {
                Value::String(s) => Value::String(mask_secrets(s)),
                other => other.clone(),
            };
            entry.insert(key.clone(), value);
        }

        Value::Object(entry)
    }
}
