//! Logging setup.
//!
//! Console output goes through `tracing-subscriber` with level colours and
//! a `RUST_LOG` filter (default `info`). When a log file is given, every
//! event at debug level or above is also appended to it as
//! `[HH:MM:SS] message`, including each command invocation. In CI mode,
//! warnings and errors are repeated as GitHub Actions annotations.

use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Local;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::{Context as LayerContext, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// `[HH:MM:SS]` wall-clock stamp.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClockTime;

impl FormatTime for ClockTime {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        write!(w, "[{}]", Local::now().format("%H:%M:%S"))
    }
}

/// Install the global subscriber.
pub fn init(log_file: Option<&Path>, annotations: bool) -> Result<()> {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_timer(ClockTime)
        .with_filter(console_filter);

    let file = match log_file {
        Some(path) => Some(file_layer::<Registry>(path)?),
        None => None,
    };

    let annotations = annotations.then(|| GithubAnnotations::new(io::stdout()));

    tracing_subscriber::registry()
        .with(file)
        .with(console)
        .with(annotations)
        .try_init()
        .context("Failed to install logger")?;
    Ok(())
}

/// Append `[HH:MM:SS] message` lines for debug events and above to `path`.
/// No level, target or colour codes.
pub fn file_layer<S>(path: &Path) -> Result<impl Layer<S>>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;
    Ok(tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_level(false)
        .with_timer(ClockTime)
        .with_writer(Mutex::new(file))
        .with_filter(LevelFilter::DEBUG))
}

/// GitHub Actions workflow command for an event, if its level has one.
pub fn annotation(level: Level, message: &str) -> Option<String> {
    // Workflow commands end at the first newline.
    let message = message.replace('%', "%25").replace('\r', "%0D").replace('\n', "%0A");
    match level {
        Level::ERROR => Some(format!("::error::{}", message)),
        Level::WARN => Some(format!("::warning::{}", message)),
        _ => None,
    }
}

/// Layer printing `::error::` / `::warning::` lines for warn and error events.
pub struct GithubAnnotations<W> {
    out: Mutex<W>,
}

impl<W: Write> GithubAnnotations<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

impl<S, W> Layer<S> for GithubAnnotations<W>
where
    S: Subscriber,
    W: Write + Send + 'static,
{
    fn on_event(&self, event: &Event<'_>, _ctx: LayerContext<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        if let Some(line) = annotation(*event.metadata().level(), &visitor.message) {
            if let Ok(mut out) = self.out.lock() {
                let _ = writeln!(out, "{}", line);
            }
        }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{HostShell, InterruptFlag, RunOptions, Shell};
    use regex::Regex;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn stamped(message: &str) -> Regex {
        Regex::new(&format!(
            r"(?m)^\[\d{{2}}:\d{{2}}:\d{{2}}\] {}$",
            regex::escape(message)
        ))
        .unwrap()
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn test_annotation_levels() {
        assert_eq!(
            annotation(Level::ERROR, "build failed").as_deref(),
            Some("::error::build failed")
        );
        assert_eq!(
            annotation(Level::WARN, "retry 1/2").as_deref(),
            Some("::warning::retry 1/2")
        );
        assert_eq!(annotation(Level::INFO, "hello"), None);
    }

    #[test]
    fn test_annotation_escapes_newlines() {
        assert_eq!(
            annotation(Level::ERROR, "a\nb 100%").as_deref(),
            Some("::error::a%0Ab 100%25")
        );
    }

    #[test]
    fn test_layer_writes_annotations() {
        let buf = SharedBuf::default();
        let subscriber =
            tracing_subscriber::registry().with(GithubAnnotations::new(buf.clone()));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("starting");
            tracing::warn!("retry {}/{}", 1, 2);
            tracing::error!("kernel build failed: {} error", "disk");
        });
        assert_eq!(
            buf.contents(),
            "::warning::retry 1/2\n::error::kernel build failed: disk error\n"
        );
    }

    #[test]
    fn test_clock_time_format() {
        let mut out = String::new();
        ClockTime.format_time(&mut Writer::new(&mut out)).unwrap();
        assert_eq!(out.len(), "[00:00:00]".len());
        assert!(out.starts_with('[') && out.ends_with(']'));
    }

    #[test]
    fn test_file_layer_writes_stamped_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("build.log");

        let layer = file_layer::<Registry>(&path).unwrap();
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!("retry {}/{}", 1, 2);
            let shell = HostShell::with_interrupt(InterruptFlag::new()).unwrap();
            shell.run("echo hi", &RunOptions::buffered()).unwrap();
            tracing::trace!("too chatty");
        });

        let contents = fs::read_to_string(&path).unwrap();
        assert!(stamped("retry 1/2").is_match(&contents), "{}", contents);
        assert!(stamped("exec: echo hi").is_match(&contents), "{}", contents);
        assert!(!contents.contains("WARN"));
        assert!(!contents.contains("DEBUG"));
        assert!(!contents.contains('\x1b'));
        assert!(!contents.contains("too chatty"));
    }

    #[test]
    fn test_file_layer_appends_across_runs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("build_progress.log");

        for message in ["first run", "second run"] {
            let layer = file_layer::<Registry>(&path).unwrap();
            let subscriber = tracing_subscriber::registry().with(layer);
            tracing::subscriber::with_default(subscriber, || tracing::info!("{}", message));
        }

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(stamped("first run").is_match(&contents));
        assert!(stamped("second run").is_match(&contents));
    }
}
