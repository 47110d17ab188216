//! Logging setup for cpc binaries.
//!
//! Configuration comes from the environment:
//!
//! | Variable         | Values                   | Default          |
//! |------------------|--------------------------|------------------|
//! | `CPC_LOG_LEVEL`  | any `EnvFilter` directive | `info`           |
//! | `CPC_LOG_OUTPUT` | `console`, `file`, `both` | `console`        |
//! | `CPC_LOG_FORMAT` | `human`, `json`          | `human`          |
//! | `CPC_LOG_FILE`   | path                     | `/tmp/cpc.log`   |
//! | `CPC_LOG_TAGS`   | `key:value,...`          | none             |
//!
//! `CPC_LOG_TAGS` keeps only events emitted inside spans whose fields match,
//! e.g. `workspace:ubuntu` or `correlation_id:*`.

use std::{
    collections::HashMap,
    env,
    io::{self, Write},
    path::Path,
};

use tracing::{field::Visit, span, Metadata, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::MakeWriter,
    layer::{Context, Layer},
    prelude::*,
    registry::LookupSpan,
    EnvFilter,
};

/// Settings resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: String,
    pub console: bool,
    pub file: bool,
    pub json: bool,
    pub file_path: String,
    pub tags: Vec<SpanTag>,
}

impl LogSettings {
    pub fn from_env() -> Self {
        let level = env::var("CPC_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let output = env::var("CPC_LOG_OUTPUT").unwrap_or_else(|_| "console".to_string());
        let format = env::var("CPC_LOG_FORMAT").unwrap_or_else(|_| "human".to_string());
        let file_path = env::var("CPC_LOG_FILE").unwrap_or_else(|_| "/tmp/cpc.log".to_string());
        let tags = env::var("CPC_LOG_TAGS")
            .map(|raw| parse_tags(&raw))
            .unwrap_or_default();

        Self {
            level,
            console: output == "console" || output == "both",
            file: output == "file" || output == "both",
            json: format == "json",
            file_path,
            tags,
        }
    }

    /// Raise the level to `debug` (the CLI `--debug` flag).
    pub fn with_debug(mut self, debug: bool) -> Self {
        if debug {
            self.level = "debug".to_string();
        }
        self
    }
}

/// A `key:value` filter on span fields. `*` matches any value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanTag {
    pub key: String,
    pub value: String,
}

pub fn parse_tags(raw: &str) -> Vec<SpanTag> {
    raw.split(',')
        .filter_map(|s| {
            let (key, value) = s.split_once(':')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some(SpanTag {
                key: key.to_string(),
                value: value.trim().to_string(),
            })
        })
        .collect()
}

// Writes every line to both writers.
struct Tee<A, B> {
    a: A,
    b: B,
}

impl<A: Write, B: Write> Write for Tee<A, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let res_a = self.a.write(buf);
        let res_b = self.b.write(buf);
        res_a.or(res_b)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.a.flush()?;
        self.b.flush()
    }
}

#[derive(Clone)]
struct MakeTee<A, B> {
    make_a: A,
    make_b: B,
}

impl<'a, A, B> MakeWriter<'a> for MakeTee<A, B>
where
    A: MakeWriter<'a>,
    B: MakeWriter<'a>,
{
    type Writer = Tee<A::Writer, B::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        Tee {
            a: self.make_a.make_writer(),
            b: self.make_b.make_writer(),
        }
    }
}

struct SpanTagLayer {
    tags: Vec<SpanTag>,
}

struct SpanFields(HashMap<String, String>);

impl<S> Layer<S> for SpanTagLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut fields = HashMap::new();
        attrs.record(&mut FieldVisitor(&mut fields));
        span.extensions_mut().insert(SpanFields(fields));
    }

    fn enabled(&self, meta: &Metadata<'_>, ctx: Context<'_, S>) -> bool {
        if self.tags.is_empty() || meta.is_span() {
            return true;
        }

        let Some(scope) = ctx.lookup_current().map(|span| span.scope()) else {
            return false;
        };

        let mut seen: HashMap<String, String> = HashMap::new();
        for span in scope {
            if let Some(fields) = span.extensions().get::<SpanFields>() {
                for (k, v) in &fields.0 {
                    seen.entry(k.clone()).or_insert_with(|| v.clone());
                }
            }
        }

        self.tags.iter().all(|tag| {
            seen.get(&tag.key)
                .is_some_and(|value| tag.value == "*" || value.contains(&tag.value))
        })
    }
}

struct FieldVisitor<'a>(&'a mut HashMap<String, String>);

impl Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{value:?}"));
    }
}

/// Install the global subscriber from the environment.
///
/// Hold the returned guard until exit so buffered file output is flushed.
pub fn init_subscriber() -> Option<WorkerGuard> {
    init_with(LogSettings::from_env())
}

pub fn init_with(settings: LogSettings) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(SpanTagLayer {
            tags: settings.tags.clone(),
        });

    let log_path = Path::new(&settings.file_path);
    let log_dir = log_path.parent().unwrap_or_else(|| Path::new("/tmp"));
    let log_name = log_path.file_name().unwrap_or("cpc.log".as_ref());

    // Console output goes to stderr so stdout stays clean for command results.
    match (settings.console, settings.file) {
        (true, true) => {
            let appender = tracing_appender::rolling::daily(log_dir, log_name);
            let (file_writer, guard) = tracing_appender::non_blocking(appender);
            let writer = MakeTee {
                make_a: io::stderr,
                make_b: file_writer,
            };
            let layer = tracing_subscriber::fmt::layer().with_writer(writer);
            let result = if settings.json {
                registry.with(layer.json()).try_init()
            } else {
                registry.with(layer.compact()).try_init()
            };
            result.ok().map(|_| guard)
        }
        (false, true) => {
            let appender = tracing_appender::rolling::daily(log_dir, log_name);
            let (file_writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer);
            let result = if settings.json {
                registry.with(layer.json()).try_init()
            } else {
                registry.with(layer).try_init()
            };
            result.ok().map(|_| guard)
        }
        (true, false) => {
            let layer = tracing_subscriber::fmt::layer().with_writer(io::stderr);
            if settings.json {
                let _ = registry.with(layer.json()).try_init();
            } else {
                let _ = registry.with(layer.compact()).try_init();
            }
            None
        }
        (false, false) => {
            let _ = registry.try_init();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_tags() {
        let tags = parse_tags("workspace:ubuntu, correlation_id:*,broken,:nokey");
        assert_eq!(
            tags,
            vec![
                SpanTag {
                    key: "workspace".into(),
                    value: "ubuntu".into()
                },
                SpanTag {
                    key: "correlation_id".into(),
                    value: "*".into()
                },
            ]
        );
    }

    #[test]
    #[serial]
    fn test_settings_from_env() {
        env::set_var("CPC_LOG_OUTPUT", "both");
        env::set_var("CPC_LOG_FORMAT", "json");
        env::set_var("CPC_LOG_TAGS", "workflow_id:abc");
        let settings = LogSettings::from_env().with_debug(true);
        env::remove_var("CPC_LOG_OUTPUT");
        env::remove_var("CPC_LOG_FORMAT");
        env::remove_var("CPC_LOG_TAGS");

        assert!(settings.console);
        assert!(settings.file);
        assert!(settings.json);
        assert_eq!(settings.level, "debug");
        assert_eq!(settings.tags.len(), 1);
    }

    #[test]
    #[serial]
    fn test_default_settings_are_console_human() {
        env::remove_var("CPC_LOG_OUTPUT");
        env::remove_var("CPC_LOG_FORMAT");
        let settings = LogSettings::from_env();
        assert!(settings.console);
        assert!(!settings.file);
        assert!(!settings.json);
    }
}
