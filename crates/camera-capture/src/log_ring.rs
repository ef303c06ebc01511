//! Decoder stderr ring buffer
//!
//! FFmpeg writes everything to stderr. A reader thread tees the lines into
//! a bounded ring that the watchdog dumps to the log when the decoder
//! misbehaves.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::warn;

/// Lines retained per decoder.
pub const RING_CAPACITY: usize = 1000;

pub struct LogRing {
    camera: String,
    lines: Arc<Mutex<VecDeque<String>>>,
    reader: Option<JoinHandle<()>>,
}

impl LogRing {
    pub fn new(camera: &str) -> Self {
        Self {
            camera: camera.to_string(),
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(RING_CAPACITY))),
            reader: None,
        }
    }

    /// Starts teeing a decoder stderr stream into the ring. The previous
    /// reader thread, if any, is joined first; it ends when its stream
    /// reaches EOF, which the decoder stop path guarantees.
    pub fn attach<R: Read + Send + 'static>(&mut self, stderr: R) {
        self.join_reader();

        let lines = Arc::clone(&self.lines);
        let handle = std::thread::Builder::new()
            .name(format!("decoder-log:{}", self.camera))
            .spawn(move || {
                let reader = BufReader::new(stderr);
                for line in reader.lines() {
                    let Ok(line) = line else { break };
                    let mut ring = lines.lock().unwrap();
                    if ring.len() >= RING_CAPACITY {
                        ring.pop_front();
                    }
                    ring.push_back(line);
                }
            })
            .expect("spawn decoder log reader");
        self.reader = Some(handle);
    }

    /// Flushes the ring into the system log at WARN.
    pub fn dump(&self) {
        let mut ring = self.lines.lock().unwrap();
        while let Some(line) = ring.pop_front() {
            warn!(camera = %self.camera, "decoder: {line}");
        }
    }

    /// Joins the reader thread. Call after the decoder process is gone.
    pub fn join_reader(&mut self) {
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for LogRing {
    fn drop(&mut self) {
        self.join_reader();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn lines_are_captured_and_dumped() {
        let mut ring = LogRing::new("front");
        ring.attach(Cursor::new("first error\nsecond error\n"));
        ring.join_reader();
        assert_eq!(ring.len(), 2);
        ring.dump();
        assert!(ring.is_empty());
    }

    #[test]
    fn ring_is_bounded() {
        let mut ring = LogRing::new("front");
        let mut input = String::new();
        for i in 0..RING_CAPACITY + 50 {
            input.push_str(&format!("line {i}\n"));
        }
        ring.attach(Cursor::new(input));
        ring.join_reader();
        assert_eq!(ring.len(), RING_CAPACITY);
        // The oldest lines were evicted.
        assert_eq!(
            ring.lines.lock().unwrap().front().map(String::as_str),
            Some("line 50")
        );
    }
}
