//! Rolling trace file + stderr logging, and an injectable mirror for
//! selected levels (the Rust reading of the original's storage-queue log
//! handler — see `SPEC_FULL.md` §1).

use std::sync::{Arc, Mutex};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Destination for mirrored `WARN`+ trace events. Default is a no-op; a real
/// deployment wires in a storage-queue-backed sink here (out of scope, §1).
pub trait EventMirror: Send + Sync {
    /// Receive one formatted, already-leveled trace line.
    fn mirror(&self, level: Level, line: &str);
}

/// Mirrors nothing; the default when no remote-debugging sink is configured.
pub struct NoopMirror;

impl EventMirror for NoopMirror {
    fn mirror(&self, _level: Level, _line: &str) {}
}

struct MirrorLayer {
    mirror: Arc<dyn EventMirror>,
    buffer: Mutex<String>,
}

impl<S> tracing_subscriber::Layer<S> for MirrorLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::WARN {
            return;
        }
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        let mut buffer = self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        buffer.clear();
        buffer.push_str(event.metadata().target());
        buffer.push_str(": ");
        buffer.push_str(&visitor.0);
        self.mirror.mirror(level, &buffer);
    }
}

struct MessageVisitor(String);

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

/// Install the global tracing subscriber: stderr (INFO, or DEBUG under
/// `--verbose`), a daily-rolling file under `<root>/trace/sapmon.trc`, and
/// the `WARN`+ mirror. Call once, at process startup.
pub fn init(trace_dir: &std::path::Path, verbose: bool, mirror: Arc<dyn EventMirror>) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let file_appender = tracing_appender::rolling::daily(trace_dir, "sapmon.trc");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false).with_level(true);
    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false).with_target(true);
    let mirror_layer = MirrorLayer { mirror, buffer: Mutex::new(String::new()) };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .with(mirror_layer)
        .try_init()
        .map_err(|err| anyhow::anyhow!("could not install tracing subscriber: {err}"))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingMirror(AtomicUsize);

    impl EventMirror for CountingMirror {
        fn mirror(&self, _level: Level, _line: &str) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_mirror_does_nothing() {
        NoopMirror.mirror(Level::ERROR, "unreachable");
    }

    #[test]
    fn counting_mirror_counts_calls() {
        let mirror = CountingMirror(AtomicUsize::new(0));
        mirror.mirror(Level::WARN, "one");
        mirror.mirror(Level::ERROR, "two");
        assert_eq!(mirror.0.load(Ordering::SeqCst), 2);
    }
}
