use std::io::{self, Write};
use std::sync::Arc;

/// Destination for agent and child-process log lines. Either the terminal's
/// stderr or the TUI log buffer.
pub trait LogSink: Send + Sync {
    fn write_all(&self, bytes: &[u8]);
}

/// Plain stderr sink, used when the TUI is inactive.
pub struct StderrSink;

impl LogSink for StderrSink {
    fn write_all(&self, bytes: &[u8]) {
        let mut stderr = io::stderr().lock();
        let _ = stderr.write_all(bytes);
    }
}

/// Prepends a fixed prefix to every write so Dispatch logs and application
/// logs stay distinguishable when interleaved.
#[derive(Clone)]
pub struct PrefixedLineWriter {
    sink: Arc<dyn LogSink>,
    prefix: Vec<u8>,
}

impl PrefixedLineWriter {
    pub fn new(sink: Arc<dyn LogSink>, prefix: &str) -> Self {
        Self {
            sink,
            prefix: prefix.as_bytes().to_vec(),
        }
    }

    pub fn write_line(&self, line: &str) {
        let mut buffer = Vec::with_capacity(self.prefix.len() + line.len() + 1);
        buffer.extend_from_slice(&self.prefix);
        buffer.extend_from_slice(line.as_bytes());
        buffer.push(b'\n');
        self.sink.write_all(&buffer);
    }
}

impl Write for PrefixedLineWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut buffer = Vec::with_capacity(self.prefix.len() + buf.len());
        buffer.extend_from_slice(&self.prefix);
        buffer.extend_from_slice(buf);
        self.sink.write_all(&buffer);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CaptureSink(Mutex<Vec<u8>>);

    impl LogSink for CaptureSink {
        fn write_all(&self, bytes: &[u8]) {
            self.0.lock().unwrap().extend_from_slice(bytes);
        }
    }

    #[test]
    fn prefixes_every_line() {
        let sink = Arc::new(CaptureSink(Mutex::new(Vec::new())));
        let writer = PrefixedLineWriter::new(sink.clone(), "app | ");
        writer.write_line("starting");
        writer.write_line("ready");
        let captured = sink.0.lock().unwrap().clone();
        assert_eq!(
            String::from_utf8(captured).unwrap(),
            "app | starting\napp | ready\n"
        );
    }
}
