use std::time::{Duration, Instant};

use indexmap::IndexMap;

use super::{PersistKey, PersistenceEngine};

/// Result of one flushed key, reported to the caller for logging and
/// status display.
#[derive(Debug, Clone)]
pub enum WriteOutcome {
    Written { key: PersistKey },
    Failed { key: PersistKey, message: String },
}

#[derive(Debug)]
struct Pending {
    value: serde_json::Value,
    armed_at: Instant,
}

/// Coalesces bursts of mutations per logical key into a single persisted
/// write after a quiet period. Each `schedule` call replaces the pending
/// value for its key and re-arms the delay; keys debounce independently.
///
/// Flushing is poll-driven: the owning loop calls [`poll`](Self::poll) on
/// its tick. A failed write is reported and dropped, never retried and
/// never rolled back; the in-memory state remains the source of truth and
/// the next mutation's write supersedes the failure.
#[derive(Debug)]
pub struct DebouncedWriter {
    debounce: Duration,
    pending: IndexMap<PersistKey, Pending>,
}

impl DebouncedWriter {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            pending: IndexMap::new(),
        }
    }

    /// Queue the latest value for a key, cancelling any write already
    /// armed for it.
    pub fn schedule(&mut self, key: PersistKey, value: serde_json::Value) {
        self.pending.insert(
            key,
            Pending {
                value,
                armed_at: Instant::now(),
            },
        );
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Write every key whose quiet period has elapsed.
    pub fn poll(&mut self, engine: &PersistenceEngine) -> Vec<WriteOutcome> {
        let debounce = self.debounce;
        self.flush_where(engine, |pending| pending.armed_at.elapsed() >= debounce)
    }

    /// Write everything still pending regardless of the quiet period.
    /// Shutdown path: the debounce window must not cost data on a clean
    /// exit.
    pub fn flush_now(&mut self, engine: &PersistenceEngine) -> Vec<WriteOutcome> {
        self.flush_where(engine, |_| true)
    }

    fn flush_where<F>(&mut self, engine: &PersistenceEngine, ready: F) -> Vec<WriteOutcome>
    where
        F: Fn(&Pending) -> bool,
    {
        let due: Vec<PersistKey> = self
            .pending
            .iter()
            .filter(|(_, pending)| ready(pending))
            .map(|(key, _)| *key)
            .collect();

        let mut outcomes = Vec::with_capacity(due.len());
        for key in due {
            let Some(pending) = self.pending.shift_remove(&key) else {
                continue;
            };
            match engine.put(key, &pending.value) {
                Ok(()) => outcomes.push(WriteOutcome::Written { key }),
                Err(err) => {
                    tracing::warn!(%key, ?err, "debounced write failed");
                    outcomes.push(WriteOutcome::Failed {
                        key,
                        message: err.to_string(),
                    });
                }
            }
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::test_support::temp_engine;
    use assert_matches::assert_matches;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn burst_of_schedules_persists_only_the_last_value() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let engine = temp_engine(&temp)?;
        let mut writer = DebouncedWriter::new(Duration::ZERO);

        for i in 0..5 {
            writer.schedule(PersistKey::History, json!([{"seq": i}]));
        }
        let outcomes = writer.poll(&engine);
        assert_eq!(outcomes.len(), 1);
        assert_matches!(
            outcomes[0],
            WriteOutcome::Written {
                key: PersistKey::History
            }
        );
        assert_eq!(engine.get(PersistKey::History)?, Some(json!([{"seq": 4}])));
        assert!(!writer.has_pending());
        Ok(())
    }

    #[test]
    fn poll_before_quiet_period_writes_nothing() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let engine = temp_engine(&temp)?;
        let mut writer = DebouncedWriter::new(Duration::from_secs(60));

        writer.schedule(PersistKey::GlobalTags, json!(["a"]));
        assert!(writer.poll(&engine).is_empty());
        assert!(engine.get(PersistKey::GlobalTags)?.is_none());
        assert!(writer.has_pending());
        Ok(())
    }

    #[test]
    fn keys_debounce_independently() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let engine = temp_engine(&temp)?;
        let mut writer = DebouncedWriter::new(Duration::ZERO);

        writer.schedule(PersistKey::History, json!([]));
        writer.schedule(PersistKey::Projects, json!([{"name": "Default"}]));
        let outcomes = writer.poll(&engine);
        assert_eq!(outcomes.len(), 2);
        assert!(engine.get(PersistKey::History)?.is_some());
        assert!(engine.get(PersistKey::Projects)?.is_some());
        Ok(())
    }

    #[test]
    fn flush_now_ignores_the_quiet_period() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let engine = temp_engine(&temp)?;
        let mut writer = DebouncedWriter::new(Duration::from_secs(60));

        writer.schedule(PersistKey::History, json!(["pending"]));
        let outcomes = writer.flush_now(&engine);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(engine.get(PersistKey::History)?, Some(json!(["pending"])));
        Ok(())
    }

    #[test]
    fn rescheduling_rearms_the_delay() {
        let mut writer = DebouncedWriter::new(Duration::from_millis(100));
        writer.schedule(PersistKey::History, json!(1));
        std::thread::sleep(Duration::from_millis(20));
        writer.schedule(PersistKey::History, json!(2));
        // Armed instant should reflect the second schedule.
        let pending = writer.pending.get(&PersistKey::History).unwrap();
        assert!(pending.armed_at.elapsed() < Duration::from_millis(20));
        assert_eq!(pending.value, json!(2));
    }
}
