//! env_logger setup driven by [`LoggerConfig`]

use std::io::Write;
use chrono::{SecondsFormat, Utc};
use log::kv::{self, Key, VisitSource};
use log::{LevelFilter, Record};
use serde_json::{Map, Value};

use crate::config::{LogOutput, LoggerConfig};
use crate::error::Error;

/// Parse a level name; "warning" is accepted for "warn"
pub fn parse_level(level: &str) -> Result<LevelFilter, Error>
{   let normalized = match level.trim().to_ascii_lowercase().as_str()
    {   "warning" => "warn".to_string()
      , other => other.to_string()
    };
    normalized.parse::<LevelFilter>()
      .map_err(|_| Error::InvalidConfiguration(
        format!("unknown log level: {}", level)
      ))
}

/// Collects a record's key/values into a JSON object, keeping numbers
/// and booleans typed
struct FieldCollector<'a>(&'a mut Map<String, Value>);

impl<'kvs> VisitSource<'kvs> for FieldCollector<'_>
{   fn visit_pair(
      &mut self
    , key: Key<'kvs>
    , value: kv::Value<'kvs>
    ) -> Result<(), kv::Error>
    {   let rendered = if let Some(b) = value.to_bool()
        {   Value::from(b)
        } else if let Some(n) = value.to_u64()
        {   Value::from(n)
        } else if let Some(n) = value.to_i64()
        {   Value::from(n)
        } else if let Some(n) = value.to_f64()
        {   Value::from(n)
        } else
        {   Value::from(value.to_string())
        };
        self.0.insert(key.as_str().to_string(), rendered);
        Ok(())
    }
}

/// Key/values attached to `record`
pub fn record_fields(record: &Record) -> Map<String, Value>
{   let mut fields = Map::new();
    // Visiting a Map never fails
    let _ = record.key_values().visit(&mut FieldCollector(&mut fields));
    fields
}

/// One structured log line. A `request_id` field is lifted to the top
/// level; the remaining fields go under `fields`
pub fn json_line(
  level: log::Level
, target: &str
, message: &str
, mut fields: Map<String, Value>
) -> Value
{   let mut line = serde_json::json!({
      "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
      "level": level.as_str(),
      "target": target,
      "message": message,
    });
    if let Some(request_id) = fields.remove("request_id")
    {   line["request_id"] = request_id;
    }
    if !fields.is_empty()
    {   line["fields"] = Value::Object(fields);
    }
    line
}

pub fn record_line(record: &Record) -> Value
{   json_line(
      record.level()
    , record.target()
    , &record.args().to_string()
    , record_fields(record)
    )
}

/// Install the global logger. `RUST_LOG`, when set, refines the
/// configured level
pub fn init(config: &LoggerConfig) -> Result<(), Error>
{   let mut builder = env_logger::Builder::new();
    builder
      .filter_level(parse_level(&config.level)?)
      .target(match config.output
      {   LogOutput::Stdout => env_logger::Target::Stdout
        , LogOutput::Stderr => env_logger::Target::Stderr
      })
      .parse_default_env();

    if config.structured
    {   builder.format(|buf, record| {
          writeln!(buf, "{}", record_line(record))
        });
    }

    builder.try_init()
      .map_err(|e| Error::InvalidConfiguration(e.to_string()))
}
