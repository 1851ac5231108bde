//! Shared doubles for the unit tests in this crate.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::link::ClientLink;
use crate::tu::Tu;

/// A `ClientLink` that records every line instead of writing to a socket,
/// with switchable write failure for testing the non-rollback rule.
#[derive(Clone, Default)]
pub struct RecordingLink {
    sent: Arc<Mutex<Vec<String>>>,
    fail: Arc<AtomicBool>,
}

impl RecordingLink {
    pub fn lines(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl ClientLink for RecordingLink {
    fn send_line(&mut self, line: &str) -> io::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "injected write failure"));
        }
        self.sent.lock().unwrap().push(line.to_string());
        Ok(())
    }

    fn shutdown_both(&self) -> io::Result<()> {
        Ok(())
    }
}

/// A fresh unregistered unit wired to a recording link.
pub fn recorded_tu() -> (Tu, RecordingLink) {
    let link = RecordingLink::default();
    let tu = Tu::new(Box::new(link.clone()));
    (tu, link)
}
