use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::Transport;
use crate::error::{Error, Result};

/// Records outbound frames; can be switched into a failing state
#[derive(Default)]
pub(crate) struct MockTransport {
    sent: Mutex<Vec<String>>,
    failing: AtomicBool,
    closed: AtomicBool,
}

impl MockTransport {
    pub(crate) fn failing() -> Self {
        let transport = Self::default();
        transport.set_failing(true);
        transport
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn sent(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }

    pub(crate) fn last_sent(&self) -> Value {
        self.sent().pop().expect("nothing was sent")
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    fn send(&self, text: String) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Transport("mock transport is down".to_string()));
        }
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
