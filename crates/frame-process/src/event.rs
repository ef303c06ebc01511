//! Event worker and sinks

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{info, warn};

use edgescope_core::types::Event;

const EVENT_POLL: Duration = Duration::from_secs(1);

/// Delivery seam for analyzed frames. An MQTT publisher, a database writer
/// or anything else plugs in here; delivery is best-effort.
pub trait EventSink: Send {
    fn name(&self) -> &str;

    fn publish(&mut self, event: &Event) -> anyhow::Result<()>;
}

/// Built-in sink: structured log lines carrying the serialized event.
pub struct TracingSink {
    topic_prefix: String,
}

impl TracingSink {
    pub fn new(topic_prefix: &str) -> Self {
        Self {
            topic_prefix: topic_prefix.to_string(),
        }
    }
}

impl EventSink for TracingSink {
    fn name(&self) -> &str {
        "log"
    }

    fn publish(&mut self, event: &Event) -> anyhow::Result<()> {
        let payload = serde_json::to_string(event)?;
        info!(
            topic = format!("{}/{}/events", self.topic_prefix, event.camera),
            "{payload}"
        );
        Ok(())
    }
}

/// Drains the event queue into the configured sinks until stopped.
pub struct EventWorker {
    event_rx: Receiver<Event>,
    sinks: Vec<Box<dyn EventSink>>,
    stop: Arc<AtomicBool>,
}

impl EventWorker {
    pub fn new(event_rx: Receiver<Event>, sinks: Vec<Box<dyn EventSink>>, stop: Arc<AtomicBool>) -> Self {
        Self {
            event_rx,
            sinks,
            stop,
        }
    }

    pub fn run(mut self) {
        info!(sinks = self.sinks.len(), "event worker started");
        while !self.stop.load(Ordering::Relaxed) {
            let event = match self.event_rx.recv_timeout(EVENT_POLL) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            for sink in &mut self.sinks {
                if let Err(e) = sink.publish(&event) {
                    warn!(sink = sink.name(), camera = %event.camera, "publish failed: {e}");
                }
            }
        }
        info!("event worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::sync::Mutex;

    struct CollectingSink {
        seen: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl EventSink for CollectingSink {
        fn name(&self) -> &str {
            "collect"
        }

        fn publish(&mut self, event: &Event) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("sink offline");
            }
            self.seen.lock().unwrap().push(event.camera.clone());
            Ok(())
        }
    }

    fn event(camera: &str) -> Event {
        Event {
            camera: camera.to_string(),
            frame_time: 1.0,
            motion_boxes: Vec::new(),
            detections: Vec::new(),
        }
    }

    #[test]
    fn events_reach_every_sink_and_failures_are_isolated() {
        let (tx, rx) = bounded(8);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));
        let sinks: Vec<Box<dyn EventSink>> = vec![
            Box::new(CollectingSink {
                seen: Arc::clone(&seen),
                fail: false,
            }),
            Box::new(CollectingSink {
                seen: Arc::clone(&seen),
                fail: true,
            }),
        ];
        let worker = EventWorker::new(rx, sinks, Arc::clone(&stop));
        let handle = std::thread::spawn(move || worker.run());

        tx.send(event("front")).unwrap();
        tx.send(event("back")).unwrap();
        drop(tx);
        handle.join().unwrap();

        assert_eq!(seen.lock().unwrap().as_slice(), &["front", "back"]);
    }

    #[test]
    fn stop_flag_ends_an_idle_worker() {
        let (_tx, rx) = bounded::<Event>(1);
        let stop = Arc::new(AtomicBool::new(true));
        EventWorker::new(rx, Vec::new(), stop).run();
    }
}
