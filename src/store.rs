use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use chrono::DateTime;
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, SyncError};
use crate::event::{EventKind, EventPayload, HistoryEvent, MetadataValue};

/// Version stamped into `PRAGMA user_version` on creation. Opening a store
/// written by any other version fails with [`SyncError::Schema`].
pub const SCHEMA_VERSION: i64 = 1;

/// Rows fetched per round trip by [`EventIter`].
const ITER_PAGE_SIZE: usize = 512;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS tag_events (
    id INTEGER PRIMARY KEY,
    source_case_id TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    item_guid TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    actor TEXT NOT NULL,
    synthetic INTEGER NOT NULL,
    tag TEXT NOT NULL,
    added INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_tag_events_key
    ON tag_events (source_case_id, sequence, item_guid, tag);

CREATE TABLE IF NOT EXISTS custom_metadata_events (
    id INTEGER PRIMARY KEY,
    source_case_id TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    item_guid TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    actor TEXT NOT NULL,
    synthetic INTEGER NOT NULL,
    field_name TEXT NOT NULL,
    value_json TEXT,
    added INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_custom_metadata_events_key
    ON custom_metadata_events (source_case_id, sequence, item_guid, field_name);

CREATE TABLE IF NOT EXISTS item_set_events (
    id INTEGER PRIMARY KEY,
    source_case_id TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    item_guid TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    actor TEXT NOT NULL,
    synthetic INTEGER NOT NULL,
    set_name TEXT NOT NULL,
    batch TEXT,
    description TEXT,
    settings_json TEXT,
    added INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_item_set_events_key
    ON item_set_events (source_case_id, sequence, item_guid, set_name);

CREATE TABLE IF NOT EXISTS exclusion_events (
    id INTEGER PRIMARY KEY,
    source_case_id TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    item_guid TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    actor TEXT NOT NULL,
    synthetic INTEGER NOT NULL,
    exclusion TEXT,
    excluded INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_exclusion_events_key
    ON exclusion_events (source_case_id, sequence, item_guid, ifnull(exclusion, ''));

CREATE TABLE IF NOT EXISTS custodian_events (
    id INTEGER PRIMARY KEY,
    source_case_id TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    item_guid TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    actor TEXT NOT NULL,
    synthetic INTEGER NOT NULL,
    custodian TEXT,
    assigned INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_custodian_events_key
    ON custodian_events (source_case_id, sequence, item_guid, ifnull(custodian, ''));

CREATE TABLE IF NOT EXISTS production_set_events (
    id INTEGER PRIMARY KEY,
    source_case_id TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    item_guid TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    actor TEXT NOT NULL,
    synthetic INTEGER NOT NULL,
    set_name TEXT NOT NULL,
    settings_json TEXT,
    added INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_production_set_events_key
    ON production_set_events (source_case_id, sequence, item_guid, set_name);

CREATE TABLE IF NOT EXISTS cursors (
    source_case_id TEXT PRIMARY KEY,
    last_sequence INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS store_info (
    name TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

/// Result of committing one page of events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageCommit {
    /// Events newly written by this commit
    pub inserted: u64,
    /// Events whose dedup key was already present (no-op appends)
    pub duplicates: u64,
}

/// Durable, append-only, idempotent store for history events plus a
/// per-source sync cursor, backed by a single SQLite file.
///
/// The file is exclusively owned by one open instance at a time: the lock is
/// acquired eagerly at open, so a second concurrent open fails fast with
/// [`SyncError::StoreLocked`] instead of interleaving writes. Events are only
/// ever inserted; a failed sync never rolls back previously committed pages.
#[derive(Debug)]
pub struct EventStore {
    conn: Option<Connection>,
}

impl EventStore {
    /// Opens (creating and initializing if necessary) the store file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<EventStore> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_millis(0))?;
        conn.execute_batch("PRAGMA locking_mode = EXCLUSIVE; PRAGMA synchronous = OFF;")?;

        // Exclusive locking mode retains the lock once taken, so grabbing it
        // here makes a second open fail at open() rather than at first write.
        conn.execute_batch("BEGIN EXCLUSIVE; COMMIT;")
            .map_err(busy_to_locked)?;

        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .map_err(busy_to_locked)?;
        if version == 0 {
            info!("initializing new annotation store at {}", path.display());
            conn.execute_batch(SCHEMA_SQL)?;
            conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))?;
        } else if version != SCHEMA_VERSION {
            return Err(SyncError::Schema {
                found: version,
                expected: SCHEMA_VERSION,
            });
        }

        Ok(EventStore { conn: Some(conn) })
    }

    /// Releases the file lock. Idempotent; every other operation on a closed
    /// store fails with [`SyncError::Closed`].
    pub fn close(&mut self) {
        if self.conn.take().is_some() {
            debug!("annotation store closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    fn conn(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or(SyncError::Closed)
    }

    /// Appends one event. Returns `false` when the event's dedup key
    /// `(source_case_id, sequence, item_guid, payload key)` is already
    /// stored, making re-capture of the same logical event a safe no-op.
    pub fn append(&self, event: &HistoryEvent) -> Result<bool> {
        insert_event(self.conn()?, event)
    }

    /// Appends a page of events and advances the cursor in one transaction.
    /// This commit is the resumability boundary: a crash mid-sync loses at
    /// most one uncommitted page.
    pub fn commit_page(
        &self,
        source_case_id: &str,
        events: &[HistoryEvent],
        cursor_sequence: u64,
    ) -> Result<PageCommit> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let mut commit = PageCommit::default();
        for event in events {
            if insert_event(&tx, event)? {
                commit.inserted += 1;
            } else {
                commit.duplicates += 1;
            }
        }
        set_cursor_in(&tx, source_case_id, cursor_sequence)?;
        tx.commit()?;
        Ok(commit)
    }

    /// Writes a snapshot baseline: the synthetic events, the per-case
    /// snapshot marker and a cursor advance to the host log's current end,
    /// all in one transaction. Fails with [`SyncError::InvariantViolation`]
    /// if a baseline was already recorded for this case.
    pub fn commit_snapshot(
        &self,
        source_case_id: &str,
        events: &[HistoryEvent],
        cursor_sequence: u64,
    ) -> Result<PageCommit> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let marker = snapshot_marker(source_case_id);
        if info_in(&tx, &marker)?.is_some() {
            return Err(SyncError::InvariantViolation(format!(
                "snapshot baseline already recorded for case '{source_case_id}'"
            )));
        }
        let mut commit = PageCommit::default();
        for event in events {
            if insert_event(&tx, event)? {
                commit.inserted += 1;
            } else {
                commit.duplicates += 1;
            }
        }
        set_info_in(&tx, &marker, &chrono::Utc::now().to_rfc3339())?;
        set_cursor_in(&tx, source_case_id, cursor_sequence)?;
        tx.commit()?;
        Ok(commit)
    }

    /// Whether a snapshot baseline has been recorded for the case.
    pub fn snapshot_recorded(&self, source_case_id: &str) -> Result<bool> {
        Ok(self.info(&snapshot_marker(source_case_id))?.is_some())
    }

    /// The highest fully captured sequence for the case, 0 when the case has
    /// never been synced into this store.
    pub fn cursor(&self, source_case_id: &str) -> Result<u64> {
        let seq: Option<i64> = self
            .conn()?
            .query_row(
                "SELECT last_sequence FROM cursors WHERE source_case_id = ?1",
                params![source_case_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(seq.unwrap_or(0) as u64)
    }

    /// Advances the cursor. Moving backward is a programming error and fails
    /// with [`SyncError::InvariantViolation`].
    pub fn set_cursor(&self, source_case_id: &str, sequence: u64) -> Result<()> {
        set_cursor_in(self.conn()?, source_case_id, sequence)
    }

    /// Lazy, restartable iteration over one category, ascending by sequence,
    /// starting at `from_sequence` inclusive. Rows are fetched in keyset
    /// pages, so arbitrarily large stores iterate in bounded memory.
    pub fn events_after(&self, kind: EventKind, from_sequence: u64) -> Result<EventIter<'_>> {
        Ok(EventIter {
            conn: self.conn()?,
            kind,
            next_sequence: from_sequence as i64,
            next_rowid: -1,
            buf: VecDeque::new(),
            done: false,
        })
    }

    /// Number of stored events in one category.
    pub fn count(&self, kind: EventKind) -> Result<u64> {
        let n: i64 = self.conn()?.query_row(
            &format!("SELECT COUNT(*) FROM {}", table_name(kind)),
            [],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    /// Total number of stored events across all categories.
    pub fn total_events(&self) -> Result<u64> {
        let mut total = 0;
        for kind in EventKind::ALL {
            total += self.count(kind)?;
        }
        Ok(total)
    }

    /// Reads a named value from the store-info table.
    pub fn info(&self, name: &str) -> Result<Option<String>> {
        info_in(self.conn()?, name)
    }

    /// Writes a named value to the store-info table (upsert).
    pub fn set_info(&self, name: &str, value: &str) -> Result<()> {
        set_info_in(self.conn()?, name, value)
    }

    /// Writes a named value only if it is not already present. Used to pin
    /// source-case identity at first sync.
    pub(crate) fn set_info_if_absent(&self, name: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO store_info (name, value) VALUES (?1, ?2)",
            params![name, value],
        )?;
        Ok(())
    }
}

/// Lazy ordered cursor over one category's events.
///
/// Yields `Result<HistoryEvent>` ascending by `(sequence, insertion order)`.
/// Because the store is append-only and new events always carry sequences at
/// or above the cursor, re-iterating from the same starting point yields the
/// same prefix.
pub struct EventIter<'a> {
    conn: &'a Connection,
    kind: EventKind,
    next_sequence: i64,
    next_rowid: i64,
    buf: VecDeque<HistoryEvent>,
    done: bool,
}

impl EventIter<'_> {
    fn refill(&mut self) -> Result<()> {
        let sql = format!(
            "SELECT id, source_case_id, sequence, item_guid, timestamp, actor, synthetic{} \
             FROM {} \
             WHERE sequence > ?1 OR (sequence = ?1 AND id > ?2) \
             ORDER BY sequence ASC, id ASC LIMIT ?3",
            payload_columns(self.kind),
            table_name(self.kind),
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let kind = self.kind;
        let rows = stmt.query_map(
            params![self.next_sequence, self.next_rowid, ITER_PAGE_SIZE as i64],
            move |row| event_from_row(kind, row),
        )?;

        let mut fetched = 0;
        for row in rows {
            let (rowid, sequence, event) = row?;
            self.next_rowid = rowid;
            self.next_sequence = sequence;
            self.buf.push_back(event);
            fetched += 1;
        }
        if fetched < ITER_PAGE_SIZE {
            self.done = true;
        }
        Ok(())
    }
}

impl Iterator for EventIter<'_> {
    type Item = Result<HistoryEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.is_empty() && !self.done {
            if let Err(e) = self.refill() {
                self.done = true;
                return Some(Err(e));
            }
        }
        self.buf.pop_front().map(Ok)
    }
}

fn table_name(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Tag => "tag_events",
        EventKind::CustomMetadata => "custom_metadata_events",
        EventKind::ItemSet => "item_set_events",
        EventKind::Exclusion => "exclusion_events",
        EventKind::Custodian => "custodian_events",
        EventKind::ProductionSet => "production_set_events",
    }
}

fn payload_columns(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Tag => ", tag, added",
        EventKind::CustomMetadata => ", field_name, value_json, added",
        EventKind::ItemSet => ", set_name, batch, description, settings_json, added",
        EventKind::Exclusion => ", exclusion, excluded",
        EventKind::Custodian => ", custodian, assigned",
        EventKind::ProductionSet => ", set_name, settings_json, added",
    }
}

fn snapshot_marker(source_case_id: &str) -> String {
    format!("snapshot-taken:{source_case_id}")
}

fn busy_to_locked(e: rusqlite::Error) -> SyncError {
    match &e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::DatabaseBusy
                || f.code == rusqlite::ErrorCode::DatabaseLocked =>
        {
            SyncError::StoreLocked
        }
        _ => SyncError::Store(e),
    }
}

fn insert_event(conn: &Connection, event: &HistoryEvent) -> Result<bool> {
    let seq = event.sequence as i64;
    let ts = event.timestamp.timestamp_millis();
    let changed = match &event.payload {
        EventPayload::Tag { tag, added } => conn.execute(
            "INSERT OR IGNORE INTO tag_events \
             (source_case_id, sequence, item_guid, timestamp, actor, synthetic, tag, added) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                event.source_case_id,
                seq,
                event.item_guid,
                ts,
                event.actor,
                event.synthetic,
                tag,
                added
            ],
        )?,
        EventPayload::CustomMetadata {
            field_name,
            value,
            added,
        } => {
            let value_json = value
                .as_ref()
                .map(|v| {
                    serde_json::to_string(v).map_err(|e| {
                        SyncError::InvariantViolation(format!(
                            "unserializable metadata value: {e}"
                        ))
                    })
                })
                .transpose()?;
            conn.execute(
                "INSERT OR IGNORE INTO custom_metadata_events \
                 (source_case_id, sequence, item_guid, timestamp, actor, synthetic, \
                  field_name, value_json, added) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    event.source_case_id,
                    seq,
                    event.item_guid,
                    ts,
                    event.actor,
                    event.synthetic,
                    field_name,
                    value_json,
                    added
                ],
            )?
        }
        EventPayload::ItemSet {
            set_name,
            batch,
            description,
            settings_json,
            added,
        } => conn.execute(
            "INSERT OR IGNORE INTO item_set_events \
             (source_case_id, sequence, item_guid, timestamp, actor, synthetic, \
              set_name, batch, description, settings_json, added) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                event.source_case_id,
                seq,
                event.item_guid,
                ts,
                event.actor,
                event.synthetic,
                set_name,
                batch,
                description,
                settings_json,
                added
            ],
        )?,
        EventPayload::Exclusion {
            exclusion,
            excluded,
        } => conn.execute(
            "INSERT OR IGNORE INTO exclusion_events \
             (source_case_id, sequence, item_guid, timestamp, actor, synthetic, \
              exclusion, excluded) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                event.source_case_id,
                seq,
                event.item_guid,
                ts,
                event.actor,
                event.synthetic,
                exclusion,
                excluded
            ],
        )?,
        EventPayload::Custodian {
            custodian,
            assigned,
        } => conn.execute(
            "INSERT OR IGNORE INTO custodian_events \
             (source_case_id, sequence, item_guid, timestamp, actor, synthetic, \
              custodian, assigned) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                event.source_case_id,
                seq,
                event.item_guid,
                ts,
                event.actor,
                event.synthetic,
                custodian,
                assigned
            ],
        )?,
        EventPayload::ProductionSet {
            set_name,
            settings_json,
            added,
        } => conn.execute(
            "INSERT OR IGNORE INTO production_set_events \
             (source_case_id, sequence, item_guid, timestamp, actor, synthetic, \
              set_name, settings_json, added) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                event.source_case_id,
                seq,
                event.item_guid,
                ts,
                event.actor,
                event.synthetic,
                set_name,
                settings_json,
                added
            ],
        )?,
    };
    Ok(changed > 0)
}

fn event_from_row(
    kind: EventKind,
    row: &rusqlite::Row<'_>,
) -> rusqlite::Result<(i64, i64, HistoryEvent)> {
    let rowid: i64 = row.get(0)?;
    let source_case_id: String = row.get(1)?;
    let sequence: i64 = row.get(2)?;
    let item_guid: String = row.get(3)?;
    let ts_millis: i64 = row.get(4)?;
    let actor: String = row.get(5)?;
    let synthetic: bool = row.get(6)?;

    let payload = match kind {
        EventKind::Tag => EventPayload::Tag {
            tag: row.get(7)?,
            added: row.get(8)?,
        },
        EventKind::CustomMetadata => {
            let value_json: Option<String> = row.get(8)?;
            let value = value_json
                .map(|json| {
                    serde_json::from_str::<MetadataValue>(&json).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            8,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })
                })
                .transpose()?;
            EventPayload::CustomMetadata {
                field_name: row.get(7)?,
                value,
                added: row.get(9)?,
            }
        }
        EventKind::ItemSet => EventPayload::ItemSet {
            set_name: row.get(7)?,
            batch: row.get(8)?,
            description: row.get(9)?,
            settings_json: row.get(10)?,
            added: row.get(11)?,
        },
        EventKind::Exclusion => EventPayload::Exclusion {
            exclusion: row.get(7)?,
            excluded: row.get(8)?,
        },
        EventKind::Custodian => EventPayload::Custodian {
            custodian: row.get(7)?,
            assigned: row.get(8)?,
        },
        EventKind::ProductionSet => EventPayload::ProductionSet {
            set_name: row.get(7)?,
            settings_json: row.get(8)?,
            added: row.get(9)?,
        },
    };

    let event = HistoryEvent {
        source_case_id,
        sequence: sequence as u64,
        timestamp: DateTime::from_timestamp_millis(ts_millis).unwrap_or_default(),
        actor,
        item_guid,
        synthetic,
        payload,
    };
    Ok((rowid, sequence, event))
}

fn set_cursor_in(conn: &Connection, source_case_id: &str, sequence: u64) -> Result<()> {
    let current: Option<i64> = conn
        .query_row(
            "SELECT last_sequence FROM cursors WHERE source_case_id = ?1",
            params![source_case_id],
            |row| row.get(0),
        )
        .optional()?;
    let current = current.unwrap_or(0) as u64;
    if sequence < current {
        return Err(SyncError::InvariantViolation(format!(
            "cursor for case '{source_case_id}' cannot move backward ({current} -> {sequence})"
        )));
    }
    conn.execute(
        "INSERT INTO cursors (source_case_id, last_sequence) VALUES (?1, ?2) \
         ON CONFLICT(source_case_id) DO UPDATE SET last_sequence = excluded.last_sequence",
        params![source_case_id, sequence as i64],
    )?;
    Ok(())
}

fn info_in(conn: &Connection, name: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT value FROM store_info WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?)
}

fn set_info_in(conn: &Connection, name: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO store_info (name, value) VALUES (?1, ?2) \
         ON CONFLICT(name) DO UPDATE SET value = excluded.value",
        params![name, value],
    )?;
    Ok(())
}
