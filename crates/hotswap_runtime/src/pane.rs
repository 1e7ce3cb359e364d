//! Terminal log pane
//!
//! Lines are queued to a printer thread so the core never waits on the
//! terminal.

use hotswap_script::{LogSink, Tag};
use std::io::Write;
use std::sync::mpsc;
use std::thread::JoinHandle;

const RESET: &str = "\x1b[0m";
const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

enum PaneEvent {
    Line(String, Tag),
    Clear,
}

pub struct LogPane {
    sender: Option<mpsc::Sender<PaneEvent>>,
    printer: Option<JoinHandle<()>>,
}

impl LogPane {
    pub fn spawn() -> std::io::Result<Self> {
        let (sender, events) = mpsc::channel();
        let printer = std::thread::Builder::new()
            .name("hotswap-pane".to_string())
            .spawn(move || {
                let stdout = std::io::stdout();
                for event in events {
                    let mut out = stdout.lock();
                    let written = match event {
                        PaneEvent::Line(text, tag) => writeln!(out, "{}", render(&text, tag)),
                        PaneEvent::Clear => write!(out, "{CLEAR_SCREEN}"),
                    };
                    if written.and_then(|()| out.flush()).is_err() {
                        break;
                    }
                }
            })?;

        Ok(Self {
            sender: Some(sender),
            printer: Some(printer),
        })
    }

    pub fn clear(&self) {
        self.send(PaneEvent::Clear);
    }

    fn send(&self, event: PaneEvent) {
        if let Some(sender) = &self.sender {
            // The printer only stops when stdout is gone
            let _ = sender.send(event);
        }
    }
}

impl LogSink for LogPane {
    fn log_line(&self, text: &str, tag: Tag) {
        self.send(PaneEvent::Line(text.to_string(), tag));
    }
}

impl Drop for LogPane {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(printer) = self.printer.take() {
            let _ = printer.join();
        }
    }
}

/// Colour per tag: green guest output, blue lifecycle, red errors.
pub fn render(text: &str, tag: Tag) -> String {
    let colour = match tag {
        Tag::GuestOutput => "\x1b[32m",
        Tag::Lifecycle => "\x1b[34m",
        Tag::Error => "\x1b[31m",
    };
    format!("{colour}{text}{RESET}")
}
