use std::sync::Mutex;

use dispatch_relay::LogSink;

/// Concurrent append-only buffer capturing agent and child logs while the
/// TUI owns the terminal. Grows unbounded; this is a development tool and
/// sessions are short-lived.
#[derive(Default)]
pub struct LogBuffer {
    inner: Mutex<Vec<u8>>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, bytes: &[u8]) {
        self.inner.lock().unwrap().extend_from_slice(bytes);
    }

    pub fn snapshot(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock().unwrap()).into_owned()
    }

    /// Takes the captured bytes, e.g. to flush them to the terminal after
    /// the TUI has been torn down.
    pub fn drain(&self) -> Vec<u8> {
        std::mem::take(&mut *self.inner.lock().unwrap())
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

impl LogSink for LogBuffer {
    fn write_all(&self, bytes: &[u8]) {
        self.append(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_drain() {
        let buffer = LogBuffer::new();
        buffer.append(b"one\n");
        buffer.append(b"two\n");
        assert_eq!(buffer.snapshot(), "one\ntwo\n");
        assert_eq!(buffer.drain(), b"one\ntwo\n");
        assert!(buffer.is_empty());
    }
}
