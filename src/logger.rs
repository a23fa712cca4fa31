//! C10/C13 — Async logger and its `tracing` transport.
//!
//! The call sites throughout the crate (`trace!`/`debug!`/`info!`/`warn!`/
//! `error!`) are C13; this module is C10, the lock-free transport beneath
//! them. A custom [`tracing_subscriber::Layer`] formats each event and
//! pushes the line onto a `flume` queue instead of writing synchronously —
//! matching songbird's channel-everywhere idiom — so no audio-path
//! thread ever blocks on a write syscall. A dedicated drain thread owns
//! the actual `io::Write` and does the formatting/flush off the hot path.

use flume::{Receiver, Sender};
use std::io::Write;
use tracing::field::{Field, Visit};
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// One message on the drain queue: either a rendered log line, or the
/// shutdown sentinel. A sentinel rather than closing the channel, since
/// both the installed `Layer` and the `LoggerHandle` hold their own
/// sender clone and either alone staying alive would otherwise keep the
/// channel open forever.
enum LogMessage {
    Line(String),
    Shutdown,
}

/// The `tracing_subscriber::Layer` installed on the process-wide
/// subscriber. `on_event` never writes; it only formats and pushes.
pub struct AsyncLogLayer {
    tx: Sender<LogMessage>,
}

impl<S> Layer<S> for AsyncLogLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let line = format!(
            "{level} {target}{message}{fields}",
            level = event.metadata().level(),
            target = event.metadata().target(),
            message = visitor.message.map(|m| format!(" {m}")).unwrap_or_default(),
            fields = visitor.rest,
        );

        // Non-blocking: a full queue drops the line rather than stalling
        // the caller. The bound is generous (see `spawn`), so this only
        // triggers under sustained logger-thread starvation.
        let _ = self.tx.try_send(LogMessage::Line(line));
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: Option<String>,
    rest: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        } else {
            self.rest.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

/// A handle to the running drain thread, returned by [`spawn`]. Dropping
/// this does not stop the thread — call [`LoggerHandle::shutdown`] to
/// drain fully and join it.
pub struct LoggerHandle {
    tx: Sender<LogMessage>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl LoggerHandle {
    /// Pushes a pre-formatted line directly, bypassing `tracing` — used
    /// by call sites on the audio hot path that want to skip the
    /// subscriber dispatch entirely.
    pub fn log(&self, msg: impl Into<String>) {
        let _ = self.tx.try_send(LogMessage::Line(msg.into()));
    }

    /// Signals the drain thread to flush everything already queued and
    /// exit, then blocks until it has. Safe to call more than once; the
    /// second call is a no-op since `join` is only `Some` once.
    pub fn shutdown(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = self.tx.send(LogMessage::Shutdown);
            let _ = join.join();
        }
    }
}

/// Builds the async log layer and its drain thread. `writer` is typically
/// `std::io::stdout()`; tests pass an in-memory buffer instead.
pub fn spawn<W>(mut writer: W) -> (AsyncLogLayer, LoggerHandle)
where
    W: Write + Send + 'static,
{
    let (tx, rx): (Sender<LogMessage>, Receiver<LogMessage>) = flume::bounded(4096);

    let drain_tx = tx.clone();
    let join = std::thread::Builder::new()
        .name("sipbridge-logger".into())
        .spawn(move || {
            while let Ok(msg) = rx.recv() {
                match msg {
                    LogMessage::Line(line) => {
                        let _ = writeln!(writer, "{line}");
                    },
                    LogMessage::Shutdown => break,
                }
            }
            let _ = writer.flush();
        })
        .expect("failed to spawn logger drain thread");

    (AsyncLogLayer { tx: drain_tx.clone() }, LoggerHandle { tx: drain_tx, join: Some(join) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn logger_drains_queued_lines_on_shutdown() {
        let buf = SharedBuf::default();
        let (_layer, mut handle) = spawn(buf.clone());

        for i in 0..5 {
            handle.log(format!("line {i}"));
        }
        handle.shutdown();

        let written = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        for i in 0..5 {
            assert!(written.contains(&format!("line {i}")));
        }
    }

    #[test]
    fn shutdown_is_idempotent() {
        let buf = SharedBuf::default();
        let (_layer, mut handle) = spawn(buf);
        handle.shutdown();
        handle.shutdown();
    }
}
