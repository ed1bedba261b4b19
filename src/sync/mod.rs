mod capture;
mod snapshot;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::info;

use crate::case::CaseCollaborator;
use crate::error::{Result, SyncError};
use crate::event::{EventKind, HistoryEvent};
use crate::replay::{self, ItemResolver, ReplayReport};
use crate::settings::SyncSettings;
use crate::store::{EventIter, EventStore};
use crate::summary::SyncSummary;

use capture::HistoryCapture;

/// Cooperative cancellation flag for long-running syncs and replays.
///
/// Cloneable and thread-safe; hand a clone to another thread and call
/// [`cancel`](CancelToken::cancel) to stop the engine at the next page
/// boundary (capture) or event boundary (replay). The cursor only ever
/// reflects fully committed pages, so a cancelled sync resumes cleanly.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Outcome counts of one `sync_history` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Synthetic baseline events written by a snapshot-first sync
    pub snapshot_events: u64,
    /// New events written from the history log
    pub events_appended: u64,
    /// Events already present (safe re-capture)
    pub duplicate_events: u64,
    /// Raw history entries read from the host
    pub entries_seen: u64,
    /// Entries excluded by category settings
    pub entries_filtered: u64,
    /// Entries that did not map to any tracked category
    pub entries_skipped: u64,
    /// Pages committed (each one a resumability boundary)
    pub pages_committed: u64,
}

impl SyncReport {
    /// One-line summary for logs and the message callback.
    pub fn summary_line(&self) -> String {
        format!(
            "sync complete: {} appended, {} duplicate, {} filtered, {} skipped, {} snapshot, {} pages",
            self.events_appended,
            self.duplicate_events,
            self.entries_filtered,
            self.entries_skipped,
            self.snapshot_events,
            self.pages_committed
        )
    }
}

type MessageSink = Box<dyn FnMut(&str)>;
type ProgressSink = Box<dyn FnMut(u64, u64)>;

/// Annotation history repository: a portable store of a case's annotation
/// mutation history, capable of capturing from a source case and replaying
/// onto a target case.
///
/// Single-threaded and blocking throughout; `sync_history` and `replay_all`
/// are long-running but spawn no workers, and one open instance exclusively
/// owns its store file.
pub struct Repository {
    store: EventStore,
    snapshot_first_sync: bool,
    cancel: CancelToken,
    message_sink: Option<MessageSink>,
    progress_sink: Option<ProgressSink>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("snapshot_first_sync", &self.snapshot_first_sync)
            .finish_non_exhaustive()
    }
}

impl Repository {
    /// Opens (creating if necessary) the store file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Repository> {
        Ok(Repository {
            store: EventStore::open(path)?,
            snapshot_first_sync: true,
            cancel: CancelToken::new(),
            message_sink: None,
            progress_sink: None,
        })
    }

    /// Repository-level switch for snapshot-first sync. Defaults to true;
    /// setting it false vetoes the same flag in [`SyncSettings`], which is
    /// convenient when one settings value is shared across repositories.
    pub fn set_snapshot_first_sync(&mut self, enabled: bool) {
        self.snapshot_first_sync = enabled;
    }

    pub fn snapshot_first_sync(&self) -> bool {
        self.snapshot_first_sync
    }

    /// Registers a sink for human-readable status lines, invoked
    /// synchronously on the caller's thread at page and phase boundaries.
    pub fn on_message<F: FnMut(&str) + 'static>(&mut self, callback: F) {
        self.message_sink = Some(Box::new(callback));
    }

    /// Registers a progress sink invoked as `(current, total_known_so_far)`.
    pub fn on_progress<F: FnMut(u64, u64) + 'static>(&mut self, callback: F) {
        self.progress_sink = Some(Box::new(callback));
    }

    /// Token that cancels in-flight sync or replay work on this repository.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Direct access to the underlying store.
    pub fn store(&self) -> &EventStore {
        &self.store
    }

    /// Captures the case's annotation history into the store.
    ///
    /// On the first sync of a case (cursor 0) with snapshot-first enabled,
    /// seeds the store with a synthetic baseline of current case state and
    /// fast-forwards the cursor past the existing log. Every later (or
    /// non-snapshot) sync streams history pages past the cursor, appending
    /// the events `settings` enables; each page commits together with its
    /// cursor advance, so a failed or cancelled call reruns cleanly and a
    /// rerun with no new host activity appends nothing.
    pub fn sync_history(
        &mut self,
        case: &dyn CaseCollaborator,
        settings: &SyncSettings,
    ) -> Result<SyncReport> {
        let case_id = case.id().to_string();
        info!("syncing history of case '{}' ({})", case.name(), case_id);
        info!("settings:\n{}", settings.describe());

        let mut report = SyncReport::default();
        let mut cursor = self.store.cursor(&case_id)?;

        // Pin source-case identity on first contact
        self.store.set_info_if_absent("source-case-name", case.name())?;
        self.store
            .set_info_if_absent("source-case-location", case.location())?;

        if settings.snapshot_first_sync
            && self.snapshot_first_sync
            && cursor == 0
            && !self.store.snapshot_recorded(&case_id)?
        {
            let baseline = snapshot::baseline_events(case, settings)?;
            let log_end = case.last_history_sequence()?;
            let commit = self.store.commit_snapshot(&case_id, &baseline, log_end)?;
            report.snapshot_events = commit.inserted;
            cursor = log_end;
            self.emit_message(&format!(
                "recorded snapshot baseline: {} events, cursor at {}",
                commit.inserted, log_end
            ));
        }

        let mut capture = HistoryCapture::new(case, cursor);
        let mut processed = 0u64;
        loop {
            if self.cancel.is_cancelled() {
                self.emit_message("sync cancelled; committed pages retained");
                return Err(SyncError::Cancelled);
            }
            let Some(page) = capture.next_page()? else { break };

            let mut events = Vec::new();
            for entry in &page.entries {
                if !settings.enabled(entry.payload.kind()) {
                    report.entries_filtered += 1;
                    continue;
                }
                for guid in &entry.guids {
                    events.push(HistoryEvent {
                        source_case_id: case_id.clone(),
                        sequence: entry.sequence,
                        timestamp: entry.timestamp,
                        actor: entry.actor.clone(),
                        item_guid: guid.clone(),
                        synthetic: false,
                        payload: entry.payload.clone(),
                    });
                }
            }

            let commit = self
                .store
                .commit_page(&case_id, &events, page.last_sequence)?;
            report.events_appended += commit.inserted;
            report.duplicate_events += commit.duplicates;
            report.entries_seen += page.raw_count as u64;
            report.entries_skipped += page.skipped as u64;
            report.pages_committed += 1;
            processed += page.raw_count as u64;

            self.emit_progress(processed, processed);
            self.emit_message(&format!(
                "committed page {}: {} new events, cursor at {}",
                report.pages_committed, commit.inserted, page.last_sequence
            ));
        }

        info!("{}", report.summary_line());
        self.emit_message(&report.summary_line());
        Ok(report)
    }

    /// Lazy iteration over one recorded category, ascending by sequence,
    /// from `from_sequence` inclusive.
    pub fn recorded_events(
        &self,
        kind: EventKind,
        from_sequence: u64,
    ) -> Result<EventIter<'_>> {
        self.store.events_after(kind, from_sequence)
    }

    /// Per-category counts of the store's current contents.
    pub fn build_summary(&self) -> Result<SyncSummary> {
        SyncSummary::from_store(&self.store)
    }

    /// Replays every recorded event onto `target` in ascending sequence
    /// order across all categories. Items missing from the target are
    /// tolerated and reported; see [`ReplayReport`].
    pub fn replay_all(
        &mut self,
        target: &dyn CaseCollaborator,
        resolver: &dyn ItemResolver,
    ) -> Result<ReplayReport> {
        let total = self.store.total_events()?;
        self.emit_message(&format!("replaying {total} recorded events"));

        let store = &self.store;
        let progress_sink = &mut self.progress_sink;
        let report =
            replay::replay_ordered(store, target, resolver, &self.cancel, &mut |current| {
                if let Some(sink) = progress_sink.as_mut() {
                    sink(current, total);
                }
            })?;

        self.emit_message(&format!(
            "replay complete: {} applied, {} items not found in target",
            report.applied,
            report.misses.len()
        ));
        Ok(report)
    }

    /// Releases the store file lock. Idempotent; later operations fail with
    /// [`SyncError::Closed`].
    pub fn close(&mut self) {
        self.store.close();
    }

    pub fn is_open(&self) -> bool {
        self.store.is_open()
    }

    fn emit_message(&mut self, message: &str) {
        if let Some(sink) = self.message_sink.as_mut() {
            sink(message);
        }
    }

    fn emit_progress(&mut self, current: u64, total_known: u64) {
        if let Some(sink) = self.progress_sink.as_mut() {
            sink(current, total_known);
        }
    }
}
