use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;

use crate::blob::ImageBlobStore;
use crate::config::PollerOptions;

use super::{ClipEvent, SystemClipboard};

/// Recurring, non-overlapping clipboard sampler.
///
/// The loop is a self-rescheduling chain, not a fixed-rate timer: the next
/// tick's delay is measured from the completion of the current tick, so a
/// slow image read can never cause overlapping samples. Change detection
/// keeps one marker per channel — the last text value seen and the last
/// image fingerprint — so recopying identical content never re-emits.
pub struct ClipboardPoller<C: SystemClipboard> {
    clipboard: C,
    blobs: ImageBlobStore,
    events: Sender<ClipEvent>,
    options: PollerOptions,
    stop: Arc<AtomicBool>,
    in_flight: AtomicBool,
    last_text: Option<String>,
    last_fingerprint: Option<Vec<u8>>,
}

/// Owner-side handle to a spawned poller thread. Dropping the handle stops
/// the chain; no further ticks run and the thread is joined.
pub struct PollerHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl PollerHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn join(mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("clipboard poller thread panicked");
            }
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl<C: SystemClipboard + 'static> ClipboardPoller<C> {
    pub fn new(
        clipboard: C,
        blobs: ImageBlobStore,
        events: Sender<ClipEvent>,
        options: PollerOptions,
    ) -> Self {
        Self {
            clipboard,
            blobs,
            events,
            options,
            stop: Arc::new(AtomicBool::new(false)),
            in_flight: AtomicBool::new(false),
            last_text: None,
            last_fingerprint: None,
        }
    }

    /// Spawn the sampling chain on a dedicated thread.
    pub fn spawn(mut self) -> PollerHandle {
        let stop = self.stop.clone();
        let interval = self.options.interval();
        let thread = thread::spawn(move || {
            tracing::info!(
                interval_ms = interval.as_millis() as u64,
                "clipboard poller started"
            );
            loop {
                if self.stop.load(Ordering::Relaxed) {
                    break;
                }
                self.sample_once();
                if self.stop.load(Ordering::Relaxed) {
                    break;
                }
                // Rescheduled from completion of the tick, not its start.
                thread::sleep(interval);
            }
            tracing::info!("clipboard poller stopped");
        });
        PollerHandle {
            stop,
            thread: Some(thread),
        }
    }

    /// Execute one sampling tick. Errors are logged and swallowed; nothing
    /// here may terminate the chain.
    pub fn sample_once(&mut self) {
        // Re-entrancy guard: checked and set with no suspension point in
        // between. A tick that fires while a sample is still dispatching
        // is a no-op.
        if self.in_flight.swap(true, Ordering::Acquire) {
            tracing::debug!("sample already in flight, skipping tick");
            return;
        }
        self.sample_inner();
        self.in_flight.store(false, Ordering::Release);
    }

    fn sample_inner(&mut self) {
        match self.sample_text() {
            Ok(true) => return, // text event emitted, skip the image check
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(?err, "clipboard text sample failed");
                return;
            }
        }
        if let Err(err) = self.sample_image() {
            tracing::warn!(?err, "clipboard image sample failed");
        }
    }

    /// Returns true when a text event was emitted this tick. Text takes
    /// priority over images; a tick that emits text skips the (expensive)
    /// image read entirely.
    fn sample_text(&mut self) -> anyhow::Result<bool> {
        let Some(text) = self.clipboard.read_text()? else {
            return Ok(false);
        };
        if text.is_empty() {
            return Ok(false);
        }
        if self.last_text.as_deref() == Some(text.as_str()) {
            return Ok(false);
        }
        self.last_text = Some(text.clone());
        self.emit(ClipEvent::Text(text));
        Ok(true)
    }

    fn sample_image(&mut self) -> anyhow::Result<()> {
        let Some(encoded) = self.clipboard.read_image_encoded()? else {
            return Ok(());
        };
        let print = fingerprint(&encoded, self.options.fingerprint_window);
        if self.last_fingerprint.as_deref() == Some(print.as_slice()) {
            return Ok(());
        }
        let filename = self.blobs.save(&encoded)?;
        self.last_fingerprint = Some(print);
        self.emit(ClipEvent::Image { filename });
        Ok(())
    }

    fn emit(&self, event: ClipEvent) {
        // Liveness check: a sample that completed after teardown must not
        // leak a late event into the store.
        if self.stop.load(Ordering::Relaxed) {
            return;
        }
        if self.events.send(event).is_err() {
            tracing::debug!("event channel closed, dropping clipboard event");
        }
    }

    #[cfg(test)]
    pub(crate) fn clipboard_mut(&mut self) -> &mut C {
        &mut self.clipboard
    }
}

/// Cheap change-detection digest: the first and last `window` bytes of the
/// encoded payload, concatenated. Deliberately NOT a full hash — large
/// images make full comparison too expensive per tick, and the rare
/// collision of both windows is an accepted false negative.
pub fn fingerprint(payload: &[u8], window: usize) -> Vec<u8> {
    let prefix_len = window.min(payload.len());
    let suffix_start = payload.len().saturating_sub(window);
    let mut print = Vec::with_capacity(prefix_len + (payload.len() - suffix_start));
    print.extend_from_slice(&payload[..prefix_len]);
    print.extend_from_slice(&payload[suffix_start..]);
    print
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::mock::MockClipboard;
    use crossbeam_channel::unbounded;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_poller(
        clipboard: MockClipboard,
        temp: &TempDir,
    ) -> (
        ClipboardPoller<MockClipboard>,
        crossbeam_channel::Receiver<ClipEvent>,
    ) {
        let (tx, rx) = unbounded();
        let blobs = ImageBlobStore::new(temp.path().join("images"));
        let poller = ClipboardPoller::new(clipboard, blobs, tx, PollerOptions::default());
        (poller, rx)
    }

    #[test]
    fn new_text_emits_once_and_identical_recopy_never_re_emits() {
        let temp = TempDir::new().unwrap();
        let (mut poller, rx) = test_poller(MockClipboard::with_text("hello"), &temp);

        poller.sample_once();
        assert_eq!(rx.try_recv().unwrap(), ClipEvent::Text("hello".into()));

        // Marker persists across ticks: same content, no event.
        for _ in 0..3 {
            poller.sample_once();
        }
        assert!(rx.try_recv().is_err());

        poller.clipboard_mut().text = Some("world".into());
        poller.sample_once();
        assert_eq!(rx.try_recv().unwrap(), ClipEvent::Text("world".into()));
    }

    #[test]
    fn text_event_skips_image_read_that_tick() {
        let temp = TempDir::new().unwrap();
        let mut clipboard = MockClipboard::with_text("copied");
        clipboard.image = Some(vec![1, 2, 3]);
        let (mut poller, rx) = test_poller(clipboard, &temp);

        poller.sample_once();
        assert_eq!(rx.try_recv().unwrap(), ClipEvent::Text("copied".into()));
        assert_eq!(poller.clipboard_mut().image_reads, 0);
    }

    #[test]
    fn one_transfer_per_channel_per_tick() {
        // The image payload must cross the clipboard boundary once per
        // tick, not once for a presence probe and again for the read.
        let temp = TempDir::new().unwrap();
        let (mut poller, rx) = test_poller(MockClipboard::with_image(vec![9u8; 128]), &temp);

        poller.sample_once();
        assert!(matches!(rx.try_recv(), Ok(ClipEvent::Image { .. })));
        assert_eq!(poller.clipboard_mut().text_reads, 1);
        assert_eq!(poller.clipboard_mut().image_reads, 1);

        // Unchanged contents on the next tick: still single reads.
        poller.sample_once();
        assert_eq!(poller.clipboard_mut().text_reads, 2);
        assert_eq!(poller.clipboard_mut().image_reads, 2);
    }

    #[test]
    fn image_change_saves_blob_and_emits_filename() {
        let temp = TempDir::new().unwrap();
        let payload: Vec<u8> = (0u8..=255).cycle().take(300).collect();
        let (mut poller, rx) = test_poller(MockClipboard::with_image(payload.clone()), &temp);

        poller.sample_once();
        let event = rx.try_recv().unwrap();
        let ClipEvent::Image { filename } = event else {
            panic!("expected image event, got {event:?}");
        };
        assert!(filename.starts_with("img_"));
        let stored = ImageBlobStore::new(temp.path().join("images"))
            .read(&filename)
            .unwrap()
            .expect("blob written");
        assert_eq!(stored, payload);

        // Unchanged image: no further event, no further blob.
        poller.sample_once();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn fingerprint_collision_is_treated_as_duplicate() {
        let temp = TempDir::new().unwrap();
        // Two payloads sharing the first and last 50 bytes but differing in
        // the middle. Per the change-detection contract the second one is
        // (incorrectly, acceptedly) considered unchanged.
        let mut first = vec![7u8; 200];
        let mut second = vec![7u8; 200];
        first[100] = 1;
        second[100] = 2;
        assert_ne!(first, second);
        assert_eq!(fingerprint(&first, 50), fingerprint(&second, 50));

        let (mut poller, rx) = test_poller(MockClipboard::with_image(first), &temp);
        poller.sample_once();
        assert!(matches!(rx.try_recv(), Ok(ClipEvent::Image { .. })));

        poller.clipboard_mut().image = Some(second);
        poller.sample_once();
        assert!(rx.try_recv().is_err(), "collision must be dropped");
    }

    #[test]
    fn read_error_does_not_terminate_the_chain() {
        let temp = TempDir::new().unwrap();
        let mut clipboard = MockClipboard::with_text("first");
        clipboard.fail_text_reads = true;
        let (mut poller, rx) = test_poller(clipboard, &temp);

        poller.sample_once();
        assert!(rx.try_recv().is_err());

        poller.clipboard_mut().fail_text_reads = false;
        poller.sample_once();
        assert_eq!(rx.try_recv().unwrap(), ClipEvent::Text("first".into()));
    }

    #[test]
    fn short_payload_fingerprint_is_total() {
        assert_eq!(fingerprint(b"abc", 50), b"abcabc".to_vec());
        assert_eq!(fingerprint(b"", 50), Vec::<u8>::new());
    }

    #[test]
    fn spawned_poller_stops_cleanly() {
        let temp = TempDir::new().unwrap();
        let (poller, rx) = test_poller(MockClipboard::with_text("spawned"), &temp);
        let handle = poller.spawn();

        let event = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("first tick emits");
        assert_eq!(event, ClipEvent::Text("spawned".into()));

        handle.join();
        // Channel disconnects once the poller thread is gone.
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }
}
