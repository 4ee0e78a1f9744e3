// ============================================================================
// CompanionDb — Embedded Database (redb)
// ============================================================================
// Persistent local storage for conversation history and rate windows.
// Default path: ~/.companion/companion.redb (override via COMPANION_DB_PATH)
// ============================================================================

pub mod types;

pub use types::{DbStats, HistoryEntry, RateOutcome, RateWindowRecord};

use anyhow::{anyhow, Result};
use redb::{Database, ReadableTable, TableDefinition};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

// Table definitions.
// History is keyed (conversation key, score, seq): redb orders tuple keys
// lexicographically, so a range over one conversation key yields entries in
// score order with seq as the deterministic tie-breaker.
const HISTORY: TableDefinition<(&str, i64, u64), &str> = TableDefinition::new("history");
const RATE: TableDefinition<&str, &[u8]> = TableDefinition::new("rate_windows");

/// Embedded database for the companion memory engine
pub struct CompanionDb {
    db: Database,
    path: PathBuf,
}

impl CompanionDb {
    /// Open (or create) the database at the given path.
    /// If `path` is None, uses COMPANION_DB_PATH env var or
    /// ~/.companion/companion.redb
    pub fn open(path: Option<&str>) -> Result<Self> {
        let db_path = if let Some(p) = path {
            PathBuf::from(p)
        } else if let Ok(env_path) = std::env::var("COMPANION_DB_PATH") {
            PathBuf::from(env_path)
        } else {
            let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
            let data_dir = home.join(".companion");
            std::fs::create_dir_all(&data_dir)
                .map_err(|e| anyhow!("Failed to create .companion directory: {}", e))?;
            data_dir.join("companion.redb")
        };

        info!("Opening database at: {}", db_path.display());

        let db = Database::create(&db_path)
            .map_err(|e| anyhow!("Failed to open database: {}", e))?;

        // Ensure tables exist by doing a write transaction
        let write_txn = db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let _ = write_txn
                .open_table(HISTORY)
                .map_err(|e| anyhow!("Failed to create history table: {}", e))?;
            let _ = write_txn
                .open_table(RATE)
                .map_err(|e| anyhow!("Failed to create rate table: {}", e))?;
        }
        write_txn
            .commit()
            .map_err(|e| anyhow!("Failed to commit init: {}", e))?;

        info!("Database ready");

        Ok(Self { db, path: db_path })
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    // ========================================================================
    // History Operations
    // ========================================================================

    /// True if any entry exists under the conversation key.
    pub fn history_exists(&self, key: &str) -> Result<bool> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn
            .open_table(HISTORY)
            .map_err(|e| anyhow!("Failed to open history table: {}", e))?;

        let mut iter = table
            .range((key, i64::MIN, u64::MIN)..=(key, i64::MAX, u64::MAX))
            .map_err(|e| anyhow!("Failed to range history: {}", e))?;
        Ok(iter.next().is_some())
    }

    /// Append one entry under the conversation key with the given score.
    /// The sequence number is assigned inside the write transaction, one past
    /// the last entry's, so concurrent appends never collide and score ties
    /// keep insertion order.
    pub fn history_append(&self, key: &str, score: i64, text: &str) -> Result<u64> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let seq;
        {
            let mut table = write_txn
                .open_table(HISTORY)
                .map_err(|e| anyhow!("Failed to open history table: {}", e))?;

            seq = {
                let mut iter = table
                    .range((key, i64::MIN, u64::MIN)..=(key, i64::MAX, u64::MAX))
                    .map_err(|e| anyhow!("Failed to range history: {}", e))?;
                match iter.next_back() {
                    Some(entry) => {
                        let (k, _) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
                        k.value().2 + 1
                    }
                    None => 0,
                }
            };

            table
                .insert((key, score, seq), text)
                .map_err(|e| anyhow!("Failed to insert history entry: {}", e))?;
        }
        write_txn
            .commit()
            .map_err(|e| anyhow!("Failed to commit: {}", e))?;

        debug!("Appended history entry {}:{}:{}", key, score, seq);
        Ok(seq)
    }

    /// Seed a conversation iff it has no entries yet, scoring lines 0,1,2,…
    /// in order. Existence check and inserts share one write transaction, so
    /// two racing first messages serialize and only one seeds.
    pub fn history_seed_if_absent(&self, key: &str, lines: &[String]) -> Result<bool> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let seeded;
        {
            let mut table = write_txn
                .open_table(HISTORY)
                .map_err(|e| anyhow!("Failed to open history table: {}", e))?;

            let exists = {
                let mut iter = table
                    .range((key, i64::MIN, u64::MIN)..=(key, i64::MAX, u64::MAX))
                    .map_err(|e| anyhow!("Failed to range history: {}", e))?;
                iter.next().is_some()
            };

            seeded = !exists;
            if seeded {
                for (i, line) in lines.iter().enumerate() {
                    table
                        .insert((key, i as i64, i as u64), line.as_str())
                        .map_err(|e| anyhow!("Failed to insert seed line: {}", e))?;
                }
            }
        }
        write_txn
            .commit()
            .map_err(|e| anyhow!("Failed to commit seed: {}", e))?;

        if seeded {
            debug!("Seeded {} entries under {}", lines.len(), key);
        }
        Ok(seeded)
    }

    /// All entries for a conversation key, score order, ties in insertion
    /// order.
    pub fn history_range(&self, key: &str) -> Result<Vec<HistoryEntry>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn
            .open_table(HISTORY)
            .map_err(|e| anyhow!("Failed to open history table: {}", e))?;

        let mut results = Vec::new();
        let iter = table
            .range((key, i64::MIN, u64::MIN)..=(key, i64::MAX, u64::MAX))
            .map_err(|e| anyhow!("Failed to range history: {}", e))?;
        for entry in iter {
            let (k, v) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
            let (_, score, seq) = k.value();
            results.push(HistoryEntry {
                score,
                seq,
                text: v.value().to_string(),
            });
        }
        Ok(results)
    }

    /// Distinct conversation keys with their entry counts.
    pub fn conversation_keys(&self) -> Result<Vec<(String, usize)>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn
            .open_table(HISTORY)
            .map_err(|e| anyhow!("Failed to open history table: {}", e))?;

        let mut results: Vec<(String, usize)> = Vec::new();
        let iter = table
            .range::<(&str, i64, u64)>(..)
            .map_err(|e| anyhow!("Failed to iterate history: {}", e))?;
        for entry in iter {
            let (k, _) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
            let (key, _, _) = k.value();
            match results.last_mut() {
                Some((last, count)) if last == key => *count += 1,
                _ => results.push((key.to_string(), 1)),
            }
        }
        Ok(results)
    }

    // ========================================================================
    // Rate Window Operations
    // ========================================================================

    /// Transactional increment-and-compare for one admission attempt.
    ///
    /// Two-bucket sliding window: the previous fixed window's count is
    /// weighted by how much of it still falls inside the trailing window and
    /// added to the current count. The whole read-modify-write runs in a
    /// single write transaction, so concurrent attempts for one subject
    /// serialize and never both take the last slot.
    pub fn rate_hit(
        &self,
        subject: &str,
        now_ms: i64,
        window_ms: i64,
        quota: u32,
    ) -> Result<RateOutcome> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let outcome;
        {
            let mut table = write_txn
                .open_table(RATE)
                .map_err(|e| anyhow!("Failed to open rate table: {}", e))?;

            let record: RateWindowRecord = match table
                .get(subject)
                .map_err(|e| anyhow!("Failed to get rate record: {}", e))?
            {
                Some(value) => bincode::deserialize(value.value())
                    .map_err(|e| anyhow!("Failed to deserialize rate record: {}", e))?,
                None => RateWindowRecord::default(),
            };

            let window_id = now_ms.div_euclid(window_ms);
            let (previous, current) = if record.window_id == window_id {
                (record.previous, record.current)
            } else if record.window_id == window_id - 1 {
                (record.current, 0)
            } else {
                (0, 0)
            };

            let elapsed_ms = now_ms.rem_euclid(window_ms);
            let previous_weight = (window_ms - elapsed_ms) as f64 / window_ms as f64;
            let weighted = previous as f64 * previous_weight + current as f64;
            let allowed = weighted < quota as f64;

            let current = if allowed { current + 1 } else { current };
            let updated = RateWindowRecord {
                window_id,
                current,
                previous,
            };
            let value = bincode::serialize(&updated)
                .map_err(|e| anyhow!("Failed to serialize rate record: {}", e))?;
            table
                .insert(subject, value.as_slice())
                .map_err(|e| anyhow!("Failed to insert rate record: {}", e))?;

            let used = weighted.ceil() as u32 + u32::from(allowed);
            outcome = RateOutcome {
                allowed,
                used,
                window_remaining_ms: (window_id + 1) * window_ms - now_ms,
            };
        }
        write_txn
            .commit()
            .map_err(|e| anyhow!("Failed to commit rate hit: {}", e))?;

        Ok(outcome)
    }

    /// Current window record for a subject, if any.
    pub fn rate_snapshot(&self, subject: &str) -> Result<Option<RateWindowRecord>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn
            .open_table(RATE)
            .map_err(|e| anyhow!("Failed to open rate table: {}", e))?;

        match table
            .get(subject)
            .map_err(|e| anyhow!("Failed to get rate record: {}", e))?
        {
            Some(value) => {
                let record: RateWindowRecord = bincode::deserialize(value.value())
                    .map_err(|e| anyhow!("Failed to deserialize rate record: {}", e))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// All tracked subjects with their window records.
    pub fn rate_subjects(&self) -> Result<Vec<(String, RateWindowRecord)>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn
            .open_table(RATE)
            .map_err(|e| anyhow!("Failed to open rate table: {}", e))?;

        let mut results = Vec::new();
        let iter = table
            .range::<&str>(..)
            .map_err(|e| anyhow!("Failed to iterate rate table: {}", e))?;
        for entry in iter {
            let (key, value) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
            let record: RateWindowRecord = bincode::deserialize(value.value())
                .map_err(|e| anyhow!("Failed to deserialize rate record: {}", e))?;
            results.push((key.value().to_string(), record));
        }
        Ok(results)
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    pub fn stats(&self) -> Result<DbStats> {
        let conversations = self.conversation_keys()?;
        let total_entries = conversations.iter().map(|(_, n)| n).sum();
        let rate_subjects = self.rate_subjects()?.len();

        Ok(DbStats {
            total_conversations: conversations.len(),
            total_entries,
            rate_subjects,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use std::sync::Arc;

    /// Open a throwaway database under the system temp dir.
    pub fn temp_db() -> Arc<CompanionDb> {
        let path = std::env::temp_dir().join(format!("companion-test-{}.redb", uuid::Uuid::new_v4()));
        Arc::new(CompanionDb::open(Some(path.to_str().unwrap())).unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_assigns_increasing_seq() {
        let db = test_util::temp_db();
        assert_eq!(db.history_append("k", 100, "a").unwrap(), 0);
        assert_eq!(db.history_append("k", 100, "b").unwrap(), 1);
        assert_eq!(db.history_append("k", 200, "c").unwrap(), 2);

        let entries = db.history_range("k").unwrap();
        let texts: Vec<_> = entries.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_range_is_scoped_to_one_key() {
        let db = test_util::temp_db();
        db.history_append("alpha", 1, "one").unwrap();
        db.history_append("alpha-beta", 1, "other").unwrap();

        let entries = db.history_range("alpha").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text, "one");
    }

    #[test]
    fn test_seed_if_absent_only_once() {
        let db = test_util::temp_db();
        let lines = vec!["Human: hi".to_string(), "Doctor: hello".to_string()];

        assert!(db.history_seed_if_absent("k", &lines).unwrap());
        assert!(!db.history_seed_if_absent("k", &lines).unwrap());

        let entries = db.history_range("k").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].score, 0);
        assert_eq!(entries[1].score, 1);
    }

    #[test]
    fn test_rate_hit_quota_and_rollover() {
        let db = test_util::temp_db();
        let window = 60_000;
        let base = 600_000; // aligned to a window boundary

        for _ in 0..6 {
            assert!(db.rate_hit("user", base, window, 6).unwrap().allowed);
        }
        let denied = db.rate_hit("user", base, window, 6).unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.window_remaining_ms, window);

        // One full window later the previous bucket still carries full weight
        assert!(!db.rate_hit("user", base + window, window, 6).unwrap().allowed);

        // Two windows later the trailing window is clear
        assert!(db.rate_hit("user", base + 2 * window, window, 6).unwrap().allowed);
    }

    #[test]
    fn test_stats_counts() {
        let db = test_util::temp_db();
        db.history_append("a", 1, "x").unwrap();
        db.history_append("a", 2, "y").unwrap();
        db.history_append("b", 1, "z").unwrap();
        db.rate_hit("user", 0, 60_000, 6).unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.total_conversations, 2);
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.rate_subjects, 1);
    }
}
