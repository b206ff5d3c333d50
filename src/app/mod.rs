use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};

use crate::blob::ImageBlobStore;
use crate::clipboard::{ArboardClipboard, ClipEvent, ClipboardPoller, PollerHandle};
use crate::config::{AppConfig, ConfigPaths};
use crate::persist::{PersistenceEngine, WriteOutcome};
use crate::store::HistoryStore;

/// Long-running capture loop: a clipboard poller on its own thread feeds
/// events over a channel into this single-threaded owner of the store.
/// Dedup and insert therefore always run back to back; no mutation races
/// another.
pub struct MonitorApp {
    engine: PersistenceEngine,
    store: HistoryStore,
    events: Receiver<ClipEvent>,
    poller: Option<PollerHandle>,
    shutdown: Arc<AtomicBool>,
    tick_rate: Duration,
}

impl MonitorApp {
    pub fn new(config: &AppConfig, paths: &ConfigPaths, engine: PersistenceEngine) -> Result<Self> {
        let clipboard = ArboardClipboard::new().context("initialising system clipboard")?;
        let blobs = ImageBlobStore::new(paths.images_dir.clone());
        let store = HistoryStore::load(&engine, config, blobs.clone());

        // Small bound: the consumer drains far faster than one event per
        // poll tick, so anything deeper just hides a stalled loop.
        let (tx, rx) = bounded(16);
        let poller = ClipboardPoller::new(clipboard, blobs, tx, config.poller.clone());
        let handle = poller.spawn();

        Ok(Self {
            engine,
            store,
            events: rx,
            poller: Some(handle),
            shutdown: Arc::new(AtomicBool::new(false)),
            tick_rate: Duration::from_millis(250),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_parts(
        engine: PersistenceEngine,
        store: HistoryStore,
        events: Receiver<ClipEvent>,
    ) -> Self {
        Self {
            engine,
            store,
            events,
            poller: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            tick_rate: Duration::from_millis(10),
        }
    }

    /// Flag watched by the loop; flip it from a signal handler to request
    /// a clean shutdown.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn run(&mut self) -> Result<()> {
        tracing::info!("clipboard monitor running");
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }
            match self.events.recv_timeout(self.tick_rate) {
                Ok(event) => self.store.process_clipboard_content(event),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::warn!("clipboard event channel closed, shutting down");
                    break;
                }
            }
            report_outcomes(&self.store.poll_writes(&self.engine));
        }
        self.finish()
    }

    /// Stop the poller and flush whatever the debounce window is still
    /// holding. A clean exit never costs captured data.
    fn finish(&mut self) -> Result<()> {
        if let Some(poller) = self.poller.take() {
            poller.join();
        }
        report_outcomes(&self.store.flush_now(&self.engine));
        tracing::info!("clipboard monitor stopped");
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &HistoryStore {
        &self.store
    }
}

fn report_outcomes(outcomes: &[WriteOutcome]) {
    for outcome in outcomes {
        match outcome {
            WriteOutcome::Written { key } => tracing::debug!(%key, "state persisted"),
            WriteOutcome::Failed { key, message } => {
                tracing::warn!(%key, %message, "state write failed, awaiting next mutation");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::test_support::temp_engine;
    use crate::persist::PersistKey;
    use tempfile::TempDir;

    #[test]
    fn drains_events_and_flushes_on_channel_close() -> Result<()> {
        let temp = TempDir::new()?;
        let engine = temp_engine(&temp)?;
        let store = HistoryStore::empty_for_test(50);
        let (tx, rx) = bounded(16);
        let mut app = MonitorApp::with_parts(engine.clone(), store, rx);

        tx.send(ClipEvent::Text("first".into()))?;
        tx.send(ClipEvent::Text("second".into()))?;
        drop(tx); // loop exits once the queue is drained

        app.run()?;
        assert_eq!(app.store().history().len(), 2);
        assert_eq!(app.store().history()[0].text, "second");

        let persisted = engine.get(PersistKey::History)?.expect("history flushed");
        assert_eq!(persisted.as_array().map(Vec::len), Some(2));
        Ok(())
    }

    #[test]
    fn shutdown_flag_stops_the_loop() -> Result<()> {
        let temp = TempDir::new()?;
        let engine = temp_engine(&temp)?;
        let store = HistoryStore::empty_for_test(50);
        let (tx, rx) = bounded(16);
        let mut app = MonitorApp::with_parts(engine, store, rx);

        app.shutdown_flag().store(true, Ordering::Relaxed);
        app.run()?;
        // Sender still alive: only the flag could have ended the loop.
        drop(tx);
        Ok(())
    }
}
