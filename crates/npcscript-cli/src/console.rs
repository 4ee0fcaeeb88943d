use npcscript_host::{DialogSink, EntityId, SessionId};
use std::io::Write;
use std::sync::Mutex;

/// Renders dialog notifications as plain text
pub struct ConsoleSink<W> {
    speaker: String,
    out: Mutex<W>,
}

impl<W: Write + Send + 'static> ConsoleSink<W> {
    pub fn new(out: W, speaker: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            out: Mutex::new(out),
        }
    }

    fn line(&self, text: &str) {
        let Ok(mut out) = self.out.lock() else {
            return;
        };
        // Nothing sensible to do if the terminal went away
        let _ = writeln!(out, "{}", text);
        let _ = out.flush();
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<W: Write + Send + 'static> DialogSink for ConsoleSink<W> {
    fn notify_message(&self, _session: SessionId, _entity: EntityId, text: &str) {
        self.line(&format!("[{}] {}", self.speaker, text));
    }

    fn notify_advance(&self, _session: SessionId, _entity: EntityId) {
        self.line("  (press Enter to continue)");
    }

    fn notify_close(&self, _session: SessionId, _entity: EntityId) {
        self.line(&format!("[{} closes the dialog]", self.speaker));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renders_dialog() {
        let sink = ConsoleSink::new(Vec::new(), "Guide");
        sink.notify_message(SessionId(1), EntityId(2), "Welcome");
        sink.notify_advance(SessionId(1), EntityId(2));
        sink.notify_close(SessionId(1), EntityId(2));

        let output = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(
            output,
            "[Guide] Welcome\n  (press Enter to continue)\n[Guide closes the dialog]\n"
        );
    }
}
