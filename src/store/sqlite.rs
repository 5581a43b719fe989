//! SQLite-backed implementation of every collaborator trait.
//!
//! Timestamps are stored as milliseconds since the Unix epoch. Worker status
//! and run records are kept as JSON blobs next to the columns that are queried.
//! Several processes may share one database file; status updates and pass
//! leases are single statements or immediate transactions.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use crate::domain::{
    GenerationHint, GenerationRun, Item, ItemId, ItemKind, LearningPreferences, PerformanceHistory, PriorityScore,
    SubjectId, SubjectProfile, TopicKey, TopicPerformance, WorkerStatus,
};
use crate::error::{DrillrError, Result};
use crate::store::traits::{
    GenerationHintStore, ItemCatalog, ItemSink, PerformanceSource, PreferenceSource, RunHistoryStore, ScoreStore,
    SettingsStore, WorkerStatusStore,
};

/// How long a statement waits on another process's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn to_ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

type ItemRow = (i64, String, String, String, Option<String>, String);

fn item_from_row(row: ItemRow) -> Option<Item> {
    let (id, language, level, kind, topic, content) = row;
    let Some(kind) = ItemKind::parse(&kind) else {
        tracing::warn!(item_id = id, kind = %kind, "Skipping item with unknown kind");
        return None;
    };
    Some(Item {
        id: ItemId(id),
        language,
        level,
        kind,
        topic,
        content: serde_json::from_str(&content).unwrap_or(serde_json::Value::Null),
    })
}

/// SQLite store behind a mutex; `rusqlite::Connection` is not `Sync`.
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Connection::open(path)?;
        db.busy_timeout(BUSY_TIMEOUT)?;
        Self::init_schema(&db)?;
        Ok(Self { db: Mutex::new(db) })
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        Self::init_schema(&db)?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn init_schema(db: &Connection) -> Result<()> {
        db.execute_batch(
            r#"
            PRAGMA foreign_keys = OFF;

            CREATE TABLE IF NOT EXISTS subjects (
                id INTEGER PRIMARY KEY,
                language TEXT NOT NULL,
                level TEXT NOT NULL,
                provider TEXT,
                generation_enabled INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subject_id INTEGER,
                language TEXT NOT NULL,
                level TEXT NOT NULL,
                kind TEXT NOT NULL,
                topic TEXT,
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_items_bucket ON items(language, level, kind);
            CREATE INDEX IF NOT EXISTS idx_items_subject ON items(subject_id);

            CREATE TABLE IF NOT EXISTS performance (
                subject_id INTEGER NOT NULL,
                item_id INTEGER NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                correct INTEGER NOT NULL DEFAULT 0,
                last_seen INTEGER,
                marked_known INTEGER NOT NULL DEFAULT 0,
                marked_known_at INTEGER,
                PRIMARY KEY (subject_id, item_id)
            );

            CREATE TABLE IF NOT EXISTS preferences (
                subject_id INTEGER PRIMARY KEY,
                focus_on_weak_areas INTEGER NOT NULL,
                fresh_question_ratio REAL NOT NULL,
                known_item_penalty REAL NOT NULL,
                review_interval_days INTEGER NOT NULL,
                weak_area_boost REAL NOT NULL
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS priority_scores (
                subject_id INTEGER NOT NULL,
                item_id INTEGER NOT NULL,
                score REAL NOT NULL,
                last_calculated_at INTEGER NOT NULL,
                PRIMARY KEY (subject_id, item_id)
            );

            CREATE INDEX IF NOT EXISTS idx_scores_calculated ON priority_scores(last_calculated_at);

            CREATE TABLE IF NOT EXISTS worker_status (
                instance_id TEXT PRIMARY KEY,
                updated_at INTEGER NOT NULL,
                json_data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS generation_runs (
                run_id TEXT PRIMARY KEY,
                instance_id TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                json_data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_runs_instance ON generation_runs(instance_id, started_at);

            CREATE TABLE IF NOT EXISTS pass_leases (
                instance_id TEXT PRIMARY KEY,
                holder TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS generation_hints (
                subject_id INTEGER NOT NULL,
                language TEXT NOT NULL,
                level TEXT NOT NULL,
                kind TEXT NOT NULL,
                priority_weight INTEGER NOT NULL DEFAULT 1,
                expires_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (subject_id, language, level, kind)
            );
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|e| DrillrError::Storage(e.to_string()))
    }

    // Host-side helpers. The scheduler core never calls these; the CLI and
    // the tests use them to seed data.

    /// Register or update a subject.
    pub fn add_subject(&self, profile: &SubjectProfile) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT INTO subjects (id, language, level, provider, generation_enabled)
            VALUES (?1, ?2, ?3, ?4, 1)
            ON CONFLICT(id) DO UPDATE SET
                language = excluded.language,
                level = excluded.level,
                provider = excluded.provider
            "#,
            params![profile.subject_id.0, profile.language, profile.level, profile.provider],
        )?;
        Ok(())
    }

    pub fn set_generation_enabled(&self, subject_id: SubjectId, enabled: bool) -> Result<()> {
        let updated = self.conn()?.execute(
            "UPDATE subjects SET generation_enabled = ?1 WHERE id = ?2",
            params![enabled, subject_id.0],
        )?;
        if updated == 0 {
            return Err(DrillrError::NotFound(format!("subject {}", subject_id)));
        }
        Ok(())
    }

    /// Insert an item; `owner` of `None` makes it visible to every subject.
    pub fn add_item(&self, item: &Item, owner: Option<SubjectId>) -> Result<ItemId> {
        let db = self.conn()?;
        insert_item(&db, item, owner)
    }

    /// Record one answer from `subject_id` to `item_id`.
    pub fn record_attempt(&self, subject_id: SubjectId, item_id: ItemId, correct: bool, at: DateTime<Utc>) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT INTO performance (subject_id, item_id, attempts, correct, last_seen)
            VALUES (?1, ?2, 1, ?3, ?4)
            ON CONFLICT(subject_id, item_id) DO UPDATE SET
                attempts = attempts + 1,
                correct = correct + excluded.correct,
                last_seen = excluded.last_seen
            "#,
            params![subject_id.0, item_id.0, correct as i64, to_ms(at)],
        )?;
        Ok(())
    }

    /// Set or clear the "known" mark on an item.
    pub fn mark_known(&self, subject_id: SubjectId, item_id: ItemId, known: bool, at: DateTime<Utc>) -> Result<()> {
        let marked_at = known.then(|| to_ms(at));
        self.conn()?.execute(
            r#"
            INSERT INTO performance (subject_id, item_id, marked_known, marked_known_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(subject_id, item_id) DO UPDATE SET
                marked_known = excluded.marked_known,
                marked_known_at = excluded.marked_known_at
            "#,
            params![subject_id.0, item_id.0, known, marked_at],
        )?;
        Ok(())
    }

    pub fn set_preferences(&self, subject_id: SubjectId, prefs: &LearningPreferences) -> Result<()> {
        prefs.validate()?;
        self.conn()?.execute(
            r#"
            INSERT OR REPLACE INTO preferences
            (subject_id, focus_on_weak_areas, fresh_question_ratio, known_item_penalty, review_interval_days, weak_area_boost)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                subject_id.0,
                prefs.focus_on_weak_areas,
                prefs.fresh_question_ratio,
                prefs.known_item_penalty,
                prefs.review_interval_days,
                prefs.weak_area_boost,
            ],
        )?;
        Ok(())
    }

    /// Number of items stored for a subject, shared items excluded.
    pub fn count_items_for(&self, subject_id: SubjectId) -> Result<usize> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM items WHERE subject_id = ?1",
            params![subject_id.0],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

fn insert_item(db: &Connection, item: &Item, owner: Option<SubjectId>) -> Result<ItemId> {
    let content = serde_json::to_string(&item.content)?;
    if item.id.is_assigned() {
        db.execute(
            r#"
            INSERT OR REPLACE INTO items (id, subject_id, language, level, kind, topic, content, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                item.id.0,
                owner.map(|s| s.0),
                item.language,
                item.level,
                item.kind.as_str(),
                item.topic,
                content,
                to_ms(Utc::now()),
            ],
        )?;
        return Ok(item.id);
    }
    db.execute(
        r#"
        INSERT INTO items (subject_id, language, level, kind, topic, content, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
        params![
            owner.map(|s| s.0),
            item.language,
            item.level,
            item.kind.as_str(),
            item.topic,
            content,
            to_ms(Utc::now()),
        ],
    )?;
    Ok(ItemId(db.last_insert_rowid()))
}

fn read_worker_status(db: &Connection, instance_id: &str) -> Result<Option<WorkerStatus>> {
    let json: Option<String> = db
        .query_row(
            "SELECT json_data FROM worker_status WHERE instance_id = ?1",
            params![instance_id],
            |row| row.get(0),
        )
        .optional()?;
    match json {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

fn write_worker_status(db: &Connection, status: &WorkerStatus) -> Result<()> {
    let json = serde_json::to_string(status)?;
    db.execute(
        r#"
        INSERT INTO worker_status (instance_id, updated_at, json_data)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(instance_id) DO UPDATE SET
            updated_at = excluded.updated_at,
            json_data = excluded.json_data
        "#,
        params![status.instance_id, to_ms(status.updated_at), json],
    )?;
    Ok(())
}

impl ScoreStore for SqliteStore {
    fn upsert_score(&self, score: &PriorityScore) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT INTO priority_scores (subject_id, item_id, score, last_calculated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(subject_id, item_id) DO UPDATE SET
                score = excluded.score,
                last_calculated_at = excluded.last_calculated_at
            "#,
            params![
                score.subject_id.0,
                score.item_id.0,
                score.score,
                to_ms(score.last_calculated_at)
            ],
        )?;
        Ok(())
    }

    fn get_score(&self, subject_id: SubjectId, item_id: ItemId) -> Result<Option<PriorityScore>> {
        let row = self
            .conn()?
            .query_row(
                r#"
                SELECT score, last_calculated_at FROM priority_scores
                WHERE subject_id = ?1 AND item_id = ?2
                "#,
                params![subject_id.0, item_id.0],
                |row| Ok((row.get::<_, f64>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        Ok(row.map(|(score, at)| PriorityScore {
            subject_id,
            item_id,
            score,
            last_calculated_at: from_ms(at),
        }))
    }

    fn scores_for_subject(&self, subject_id: SubjectId) -> Result<Vec<PriorityScore>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            r#"
            SELECT subject_id, item_id, score, last_calculated_at FROM priority_scores
            WHERE subject_id = ?1
            ORDER BY score DESC, item_id ASC
            "#,
        )?;
        let rows = stmt
            .query_map(params![subject_id.0], |row| {
                Ok(PriorityScore {
                    subject_id: SubjectId(row.get(0)?),
                    item_id: ItemId(row.get(1)?),
                    score: row.get(2)?,
                    last_calculated_at: from_ms(row.get(3)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn all_scores(&self) -> Result<Vec<PriorityScore>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            r#"
            SELECT subject_id, item_id, score, last_calculated_at FROM priority_scores
            ORDER BY score DESC, subject_id ASC, item_id ASC
            "#,
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(PriorityScore {
                    subject_id: SubjectId(row.get(0)?),
                    item_id: ItemId(row.get(1)?),
                    score: row.get(2)?,
                    last_calculated_at: from_ms(row.get(3)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn clear_subject(&self, subject_id: SubjectId) -> Result<usize> {
        let deleted = self
            .conn()?
            .execute("DELETE FROM priority_scores WHERE subject_id = ?1", params![subject_id.0])?;
        Ok(deleted)
    }
}

impl PerformanceSource for SqliteStore {
    fn performance_history(&self, subject_id: SubjectId, item_id: ItemId) -> Result<Option<PerformanceHistory>> {
        let history = self
            .conn()?
            .query_row(
                r#"
                SELECT attempts, correct, last_seen, marked_known, marked_known_at FROM performance
                WHERE subject_id = ?1 AND item_id = ?2
                "#,
                params![subject_id.0, item_id.0],
                |row| {
                    Ok(PerformanceHistory {
                        attempts: row.get(0)?,
                        correct: row.get(1)?,
                        last_seen: row.get::<_, Option<i64>>(2)?.map(from_ms),
                        marked_known: row.get(3)?,
                        marked_known_at: row.get::<_, Option<i64>>(4)?.map(from_ms),
                    })
                },
            )
            .optional()?;
        Ok(history)
    }

    fn topic_performance(&self, subject_id: SubjectId) -> Result<Vec<TopicPerformance>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            r#"
            SELECT i.topic, SUM(p.attempts), SUM(p.correct)
            FROM performance p
            JOIN items i ON i.id = p.item_id
            WHERE p.subject_id = ?1 AND i.topic IS NOT NULL AND p.attempts > 0
            GROUP BY i.topic
            ORDER BY i.topic
            "#,
        )?;
        let rows = stmt
            .query_map(params![subject_id.0], |row| {
                Ok(TopicPerformance {
                    topic: row.get(0)?,
                    attempts: row.get(1)?,
                    correct: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl PreferenceSource for SqliteStore {
    fn preferences(&self, subject_id: SubjectId) -> Result<Option<LearningPreferences>> {
        let prefs = self
            .conn()?
            .query_row(
                r#"
                SELECT focus_on_weak_areas, fresh_question_ratio, known_item_penalty, review_interval_days, weak_area_boost
                FROM preferences WHERE subject_id = ?1
                "#,
                params![subject_id.0],
                |row| {
                    Ok(LearningPreferences {
                        focus_on_weak_areas: row.get(0)?,
                        fresh_question_ratio: row.get(1)?,
                        known_item_penalty: row.get(2)?,
                        review_interval_days: row.get(3)?,
                        weak_area_boost: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(prefs)
    }

    fn all_preferences(&self) -> Result<Vec<(SubjectId, LearningPreferences)>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            r#"
            SELECT subject_id, focus_on_weak_areas, fresh_question_ratio, known_item_penalty, review_interval_days, weak_area_boost
            FROM preferences ORDER BY subject_id
            "#,
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    SubjectId(row.get(0)?),
                    LearningPreferences {
                        focus_on_weak_areas: row.get(1)?,
                        fresh_question_ratio: row.get(2)?,
                        known_item_penalty: row.get(3)?,
                        review_interval_days: row.get(4)?,
                        weak_area_boost: row.get(5)?,
                    },
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl ItemCatalog for SqliteStore {
    fn active_subjects(&self) -> Result<Vec<SubjectProfile>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            r#"
            SELECT id, language, level, provider FROM subjects
            WHERE generation_enabled = 1
            ORDER BY id
            "#,
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(SubjectProfile {
                    subject_id: SubjectId(row.get(0)?),
                    language: row.get(1)?,
                    level: row.get(2)?,
                    provider: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn subject_profile(&self, subject_id: SubjectId) -> Result<Option<SubjectProfile>> {
        let profile = self
            .conn()?
            .query_row(
                "SELECT id, language, level, provider FROM subjects WHERE id = ?1",
                params![subject_id.0],
                |row| {
                    Ok(SubjectProfile {
                        subject_id: SubjectId(row.get(0)?),
                        language: row.get(1)?,
                        level: row.get(2)?,
                        provider: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(profile)
    }

    fn items_in_bucket(&self, subject_id: SubjectId, key: &TopicKey) -> Result<Vec<Item>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            r#"
            SELECT id, language, level, kind, topic, content FROM items
            WHERE (subject_id = ?1 OR subject_id IS NULL)
              AND language = ?2 AND level = ?3 AND kind = ?4
            ORDER BY id
            "#,
        )?;
        let rows = stmt
            .query_map(params![subject_id.0, key.language, key.level, key.kind.as_str()], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
            })?
            .collect::<std::result::Result<Vec<ItemRow>, _>>()?;
        Ok(rows.into_iter().filter_map(item_from_row).collect())
    }

    fn item(&self, item_id: ItemId) -> Result<Option<Item>> {
        let row = self
            .conn()?
            .query_row(
                "SELECT id, language, level, kind, topic, content FROM items WHERE id = ?1",
                params![item_id.0],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?)),
            )
            .optional()?;
        Ok(row.and_then(item_from_row))
    }
}

impl ItemSink for SqliteStore {
    fn save_generated_items(&self, items: &[Item], subject_id: SubjectId) -> Result<usize> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        for item in items {
            let unsaved = Item {
                id: ItemId::UNASSIGNED,
                ..item.clone()
            };
            insert_item(&tx, &unsaved, Some(subject_id))?;
        }
        tx.commit()?;
        Ok(items.len())
    }
}

impl SettingsStore for SqliteStore {
    fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()?
            .query_row("SELECT value FROM settings WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }
}

impl WorkerStatusStore for SqliteStore {
    fn get_worker_status(&self, instance_id: &str) -> Result<Option<WorkerStatus>> {
        let db = self.conn()?;
        read_worker_status(&db, instance_id)
    }

    fn upsert_worker_status(&self, status: &WorkerStatus) -> Result<()> {
        let db = self.conn()?;
        write_worker_status(&db, status)
    }

    fn update_worker_status(
        &self,
        instance_id: &str,
        apply: &mut dyn FnMut(&mut WorkerStatus),
    ) -> Result<WorkerStatus> {
        let mut db = self.conn()?;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut status = read_worker_status(&tx, instance_id)?.unwrap_or_else(|| WorkerStatus::new(instance_id));
        apply(&mut status);
        status.updated_at = Utc::now();
        write_worker_status(&tx, &status)?;
        tx.commit()?;
        Ok(status)
    }

    fn heartbeat(&self, instance_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut db = self.conn()?;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut status = read_worker_status(&tx, instance_id)?.unwrap_or_else(|| WorkerStatus::new(instance_id));
        status.last_heartbeat = Some(at);
        status.updated_at = at;
        write_worker_status(&tx, &status)?;
        tx.commit()?;
        Ok(())
    }

    fn list_worker_statuses(&self) -> Result<Vec<WorkerStatus>> {
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT json_data FROM worker_status ORDER BY instance_id")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(DrillrError::from))
            .collect()
    }

    fn try_acquire_pass(
        &self,
        instance_id: &str,
        holder: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let changed = self.conn()?.execute(
            r#"
            INSERT INTO pass_leases (instance_id, holder, expires_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(instance_id) DO UPDATE SET
                holder = excluded.holder,
                expires_at = excluded.expires_at
            WHERE pass_leases.holder = excluded.holder OR pass_leases.expires_at <= ?4
            "#,
            params![instance_id, holder, to_ms(expires_at), to_ms(now)],
        )?;
        Ok(changed > 0)
    }

    fn renew_pass(&self, instance_id: &str, holder: &str, expires_at: DateTime<Utc>) -> Result<bool> {
        let changed = self.conn()?.execute(
            "UPDATE pass_leases SET expires_at = ?3 WHERE instance_id = ?1 AND holder = ?2",
            params![instance_id, holder, to_ms(expires_at)],
        )?;
        Ok(changed > 0)
    }

    fn release_pass(&self, instance_id: &str, holder: &str) -> Result<()> {
        self.conn()?.execute(
            "DELETE FROM pass_leases WHERE instance_id = ?1 AND holder = ?2",
            params![instance_id, holder],
        )?;
        Ok(())
    }
}

impl GenerationHintStore for SqliteStore {
    fn upsert_hint(&self, subject_id: SubjectId, key: &TopicKey, expires_at: DateTime<Utc>) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT INTO generation_hints (subject_id, language, level, kind, priority_weight, expires_at, created_at)
            VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6)
            ON CONFLICT(subject_id, language, level, kind) DO UPDATE SET
                priority_weight = generation_hints.priority_weight + 1,
                expires_at = excluded.expires_at
            "#,
            params![
                subject_id.0,
                key.language,
                key.level,
                key.kind.as_str(),
                to_ms(expires_at),
                to_ms(Utc::now()),
            ],
        )?;
        Ok(())
    }

    fn active_hints(&self, subject_id: SubjectId, now: DateTime<Utc>) -> Result<Vec<GenerationHint>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            r#"
            SELECT language, level, kind, priority_weight, expires_at, created_at FROM generation_hints
            WHERE subject_id = ?1 AND expires_at > ?2
            ORDER BY created_at ASC, rowid ASC
            "#,
        )?;
        let rows = stmt
            .query_map(params![subject_id.0, to_ms(now)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u32>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|(language, level, kind, priority_weight, expires_at, created_at)| {
                let Some(kind) = ItemKind::parse(&kind) else {
                    tracing::warn!(subject = %subject_id, kind = %kind, "Skipping hint with unknown kind");
                    return None;
                };
                Some(GenerationHint {
                    subject_id,
                    key: TopicKey::new(language, level, kind),
                    priority_weight,
                    expires_at: from_ms(expires_at),
                    created_at: from_ms(created_at),
                })
            })
            .collect())
    }

    fn clear_hint(&self, subject_id: SubjectId, key: &TopicKey) -> Result<()> {
        self.conn()?.execute(
            r#"
            DELETE FROM generation_hints
            WHERE subject_id = ?1 AND language = ?2 AND level = ?3 AND kind = ?4
            "#,
            params![subject_id.0, key.language, key.level, key.kind.as_str()],
        )?;
        Ok(())
    }
}

impl RunHistoryStore for SqliteStore {
    fn append_run(&self, run: &GenerationRun, max_history: usize) -> Result<()> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        tx.execute(
            r#"
            INSERT OR REPLACE INTO generation_runs (run_id, instance_id, started_at, json_data)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![run.run_id, run.instance_id, to_ms(run.started_at), serde_json::to_string(run)?],
        )?;
        tx.execute(
            r#"
            DELETE FROM generation_runs
            WHERE instance_id = ?1 AND run_id NOT IN (
                SELECT run_id FROM generation_runs
                WHERE instance_id = ?1
                ORDER BY started_at DESC, rowid DESC
                LIMIT ?2
            )
            "#,
            params![run.instance_id, max_history as i64],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn recent_runs(&self, instance_id: &str, limit: usize) -> Result<Vec<GenerationRun>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            r#"
            SELECT json_data FROM generation_runs
            WHERE instance_id = ?1
            ORDER BY started_at DESC, rowid DESC
            LIMIT ?2
            "#,
        )?;
        let rows = stmt
            .query_map(params![instance_id, limit as i64], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(DrillrError::from))
            .collect()
    }

    fn latest_runs(&self, limit: usize) -> Result<Vec<GenerationRun>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            r#"
            SELECT json_data FROM generation_runs
            ORDER BY started_at DESC, rowid DESC
            LIMIT ?1
            "#,
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(DrillrError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RunOutcome;
    use chrono::Duration;
    use tempfile::TempDir;

    fn create_temp_store() -> (SqliteStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteStore::open(&temp_dir.path().join("data").join("drillr.db")).unwrap();
        (store, temp_dir)
    }

    fn vocab_key() -> TopicKey {
        TopicKey::new("italian", "A1", ItemKind::Vocabulary)
    }

    fn sample_run(instance: &str, n: i64) -> GenerationRun {
        let started = from_ms(1_700_000_000_000 + n * 1000);
        GenerationRun {
            run_id: format!("run-{}", n),
            instance_id: instance.to_string(),
            started_at: started,
            finished_at: started,
            duration_ms: 0,
            outcome: RunOutcome::Success,
            subjects_scored: 0,
            scores_updated: 0,
            gaps_found: 0,
            items_requested: 0,
            items_generated: 0,
            calls_attempted: 0,
            calls_succeeded: 0,
            calls_failed: 0,
            gaps_skipped_paused: 0,
            gaps_skipped_backoff: 0,
            rate_limited: false,
            details: vec![],
        }
    }

    #[test]
    fn test_open_creates_database_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("drillr.db");
        let _store = SqliteStore::open(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_score_upsert_keeps_one_row() {
        let (store, _temp) = create_temp_store();
        let now = Utc::now();
        let mut score = PriorityScore {
            subject_id: SubjectId(1),
            item_id: ItemId(10),
            score: 120.0,
            last_calculated_at: now,
        };
        store.upsert_score(&score).unwrap();
        score.score = 300.0;
        store.upsert_score(&score).unwrap();

        let all = store.all_scores().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].score, 300.0);
        let fetched = store.get_score(SubjectId(1), ItemId(10)).unwrap().unwrap();
        assert_eq!(fetched.last_calculated_at.timestamp_millis(), now.timestamp_millis());
    }

    #[test]
    fn test_clear_subject_only_touches_that_subject() {
        let store = SqliteStore::open_in_memory().unwrap();
        for (subject, item) in [(1, 1), (1, 2), (2, 1)] {
            store
                .upsert_score(&PriorityScore {
                    subject_id: SubjectId(subject),
                    item_id: ItemId(item),
                    score: 100.0,
                    last_calculated_at: Utc::now(),
                })
                .unwrap();
        }
        assert_eq!(store.clear_subject(SubjectId(1)).unwrap(), 2);
        assert_eq!(store.all_scores().unwrap().len(), 1);
    }

    #[test]
    fn test_items_in_bucket_includes_shared_items() {
        let store = SqliteStore::open_in_memory().unwrap();
        let key = vocab_key();
        store.add_item(&Item::unsaved(&key, None, serde_json::json!({})), None).unwrap();
        store
            .add_item(&Item::unsaved(&key, None, serde_json::json!({})), Some(SubjectId(1)))
            .unwrap();
        store
            .add_item(&Item::unsaved(&key, None, serde_json::json!({})), Some(SubjectId(2)))
            .unwrap();

        assert_eq!(store.items_in_bucket(SubjectId(1), &key).unwrap().len(), 2);
        let other = TopicKey::new("italian", "A2", ItemKind::Vocabulary);
        assert!(store.items_in_bucket(SubjectId(1), &other).unwrap().is_empty());
    }

    #[test]
    fn test_record_attempt_accumulates() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store
            .add_item(&Item::unsaved(&vocab_key(), Some("food".to_string()), serde_json::json!({})), None)
            .unwrap();
        let now = Utc::now();
        store.record_attempt(SubjectId(1), id, true, now - Duration::days(2)).unwrap();
        store.record_attempt(SubjectId(1), id, false, now).unwrap();

        let history = store.performance_history(SubjectId(1), id).unwrap().unwrap();
        assert_eq!(history.attempts, 2);
        assert_eq!(history.correct, 1);
        assert_eq!(history.last_seen.map(|t| t.timestamp_millis()), Some(now.timestamp_millis()));

        let topics = store.topic_performance(SubjectId(1)).unwrap();
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].topic, "food");
        assert_eq!(topics[0].attempts, 2);
    }

    #[test]
    fn test_mark_known_without_attempts() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = Utc::now();
        store.mark_known(SubjectId(3), ItemId(9), true, now).unwrap();
        let history = store.performance_history(SubjectId(3), ItemId(9)).unwrap().unwrap();
        assert!(history.marked_known);
        assert_eq!(history.attempts, 0);
        assert!(history.marked_known_at.is_some());
    }

    #[test]
    fn test_preferences_roundtrip_and_validation() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.preferences(SubjectId(1)).unwrap().is_none());

        let prefs = LearningPreferences {
            fresh_question_ratio: 0.5,
            ..Default::default()
        };
        store.set_preferences(SubjectId(1), &prefs).unwrap();
        assert_eq!(store.preferences(SubjectId(1)).unwrap(), Some(prefs));

        let bad = LearningPreferences {
            known_item_penalty: 2.0,
            ..Default::default()
        };
        assert!(store.set_preferences(SubjectId(2), &bad).is_err());
        assert_eq!(store.all_preferences().unwrap().len(), 1);
    }

    #[test]
    fn test_active_subjects_respects_enabled_flag() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.add_subject(&SubjectProfile::new(SubjectId(1), "italian", "A1")).unwrap();
        store
            .add_subject(&SubjectProfile::new(SubjectId(2), "spanish", "B1").with_provider("gemini"))
            .unwrap();
        store.set_generation_enabled(SubjectId(1), false).unwrap();

        let active = store.active_subjects().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].provider.as_deref(), Some("gemini"));
        assert!(store.set_generation_enabled(SubjectId(99), true).is_err());
    }

    #[test]
    fn test_save_generated_items_assigns_owner() {
        let store = SqliteStore::open_in_memory().unwrap();
        let key = vocab_key();
        let items = vec![
            Item::unsaved(&key, None, serde_json::json!({"word": "casa"})),
            Item::unsaved(&key, None, serde_json::json!({"word": "gatto"})),
        ];
        assert_eq!(store.save_generated_items(&items, SubjectId(4)).unwrap(), 2);
        assert_eq!(store.count_items_for(SubjectId(4)).unwrap(), 2);
        let saved = store.items_in_bucket(SubjectId(4), &key).unwrap();
        assert!(saved.iter().all(|i| i.id.is_assigned()));
        assert_eq!(saved[0].content["word"], "casa");
    }

    #[test]
    fn test_settings_flags() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(!store.flag("global_pause").unwrap());
        store.set_flag("global_pause", true).unwrap();
        assert!(store.flag("global_pause").unwrap());
        store.set_setting("global_pause", "0").unwrap();
        assert!(!store.flag("global_pause").unwrap());
    }

    #[test]
    fn test_heartbeat_creates_and_updates_status() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = Utc::now();
        store.heartbeat("w1", now).unwrap();
        let status = store.get_worker_status("w1").unwrap().unwrap();
        assert_eq!(status.last_heartbeat.map(|t| t.timestamp_millis()), Some(now.timestamp_millis()));

        let mut status = status;
        status.total_runs = 5;
        store.upsert_worker_status(&status).unwrap();
        store.heartbeat("w1", now + Duration::seconds(30)).unwrap();
        let status = store.get_worker_status("w1").unwrap().unwrap();
        assert_eq!(status.total_runs, 5);
        assert_eq!(store.list_worker_statuses().unwrap().len(), 1);
    }

    #[test]
    fn test_run_history_is_capped() {
        let store = SqliteStore::open_in_memory().unwrap();
        for n in 0..5 {
            store.append_run(&sample_run("w1", n), 3).unwrap();
        }
        store.append_run(&sample_run("w2", 0), 3).unwrap();

        let runs = store.recent_runs("w1", 10).unwrap();
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0].run_id, "run-4");
        assert_eq!(runs[2].run_id, "run-2");
        assert_eq!(store.recent_runs("w2", 10).unwrap().len(), 1);

        let latest = store.latest_runs(2).unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].run_id, "run-4");
    }

    #[test]
    fn test_update_worker_status_is_read_modify_write() {
        let store = SqliteStore::open_in_memory().unwrap();
        let created = store.update_worker_status("w1", &mut |s: &mut WorkerStatus| s.total_runs += 1).unwrap();
        assert_eq!(created.total_runs, 1);
        store.update_worker_status("w1", &mut |s: &mut WorkerStatus| s.is_paused = true).unwrap();
        let status = store.update_worker_status("w1", &mut |s: &mut WorkerStatus| s.total_runs += 1).unwrap();
        assert_eq!(status.total_runs, 2);
        assert!(status.is_paused);
    }

    #[test]
    fn test_pass_lease_is_exclusive_across_connections() {
        let (first, temp) = create_temp_store();
        let second = SqliteStore::open(&temp.path().join("data").join("drillr.db")).unwrap();
        let now = Utc::now();
        let until = now + Duration::seconds(60);

        assert!(first.try_acquire_pass("w1", "holder-a", now, until).unwrap());
        assert!(!second.try_acquire_pass("w1", "holder-b", now, until).unwrap());
        // Renewal by the owner and other instances are unaffected
        assert!(first.try_acquire_pass("w1", "holder-a", now, until).unwrap());
        assert!(second.try_acquire_pass("w2", "holder-b", now, until).unwrap());

        // Only the owner can release
        second.release_pass("w1", "holder-b").unwrap();
        assert!(!second.try_acquire_pass("w1", "holder-b", now, until).unwrap());
        first.release_pass("w1", "holder-a").unwrap();
        assert!(second.try_acquire_pass("w1", "holder-b", now, until).unwrap());
    }

    #[test]
    fn test_expired_pass_lease_can_be_taken_over() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = Utc::now();
        assert!(store.try_acquire_pass("w1", "crashed", now, now + Duration::seconds(10)).unwrap());
        let later = now + Duration::seconds(11);
        assert!(store.try_acquire_pass("w1", "fresh", later, later + Duration::seconds(10)).unwrap());
        assert!(!store.try_acquire_pass("w1", "crashed", later, later + Duration::seconds(10)).unwrap());
    }

    #[test]
    fn test_renew_only_extends_own_lease() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = Utc::now();
        assert!(!store.renew_pass("w1", "a", now + Duration::seconds(10)).unwrap());

        assert!(store.try_acquire_pass("w1", "a", now, now + Duration::seconds(10)).unwrap());
        assert!(store.renew_pass("w1", "a", now + Duration::seconds(60)).unwrap());
        assert!(!store.renew_pass("w1", "b", now + Duration::seconds(60)).unwrap());
        // Renewed past the original expiry, so b cannot take over at +30s
        let later = now + Duration::seconds(30);
        assert!(!store.try_acquire_pass("w1", "b", later, later + Duration::seconds(10)).unwrap());

        store.release_pass("w1", "a").unwrap();
        assert!(!store.renew_pass("w1", "a", now + Duration::seconds(90)).unwrap());
    }

    #[test]
    fn test_hints_expire_bump_and_clear() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = Utc::now();
        let key = vocab_key();
        let reading = TopicKey::new("italian", "A1", ItemKind::QuestionAnswer);

        store.upsert_hint(SubjectId(1), &key, now + Duration::minutes(30)).unwrap();
        store.upsert_hint(SubjectId(1), &key, now + Duration::minutes(60)).unwrap();
        store.upsert_hint(SubjectId(1), &reading, now - Duration::minutes(1)).unwrap();
        store.upsert_hint(SubjectId(2), &reading, now + Duration::minutes(30)).unwrap();

        let hints = store.active_hints(SubjectId(1), now).unwrap();
        assert_eq!(hints.len(), 1);
        assert_eq!(hints[0].key, key);
        assert_eq!(hints[0].priority_weight, 2);

        store.clear_hint(SubjectId(1), &key).unwrap();
        assert!(store.active_hints(SubjectId(1), now).unwrap().is_empty());
        assert_eq!(store.active_hints(SubjectId(2), now).unwrap().len(), 1);
    }
}
