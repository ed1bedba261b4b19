//! # annotation-sync
//!
//! A library for capturing a case's annotation mutation history (tags,
//! custom metadata, item-set membership, exclusions, custodian assignment,
//! production-set membership) into a durable, independently-portable store,
//! and replaying that history, in original order, onto the same or a
//! different case copy.
//!
//! ## Overview
//!
//! The host case platform keeps an append-only history log of every
//! annotation change. This engine mirrors a curated subset of that log into a
//! single-file SQLite store, page by page, with a per-case cursor marking how
//! far capture has progressed. The store can then travel to another
//! environment, where each event is resolved against a target case by item
//! GUID and its mutation re-applied, reconstructing equivalent annotation
//! state.
//!
//! ## Key properties
//!
//! - **Idempotent capture**: re-syncing an unchanged case appends nothing;
//!   re-appending an already-stored event is a no-op.
//! - **Resumable**: each page of events commits together with its cursor
//!   advance, so an interrupted sync resumes from the last committed page by
//!   simply rerunning it.
//! - **Ordered replay**: events are stored and replayed in ascending
//!   sequence order, so the final target state equals the net effect of the
//!   history (an add-then-remove nets to absent).
//! - **Tolerant replay**: items missing from the target corpus are counted
//!   and reported, never fatal to a bulk replay.
//! - **Snapshot-first sync**: a new store can be seeded with synthetic
//!   baseline events describing current case state, avoiding a full history
//!   walk back to case creation.
//!
//! ## Architecture
//!
//! - Event model and host capability surface ([`event`], [`case`])
//! - Durable store and cursor ([`store`])
//! - Capture orchestration and settings ([`sync`], [`settings`])
//! - Replay onto a target case ([`replay`])
//! - Reporting and diagnostics ([`summary`], [`logger`], [`error`])

/// Host case capability surface consumed by the engine.
///
/// Models only what this engine calls on the host platform: history-log
/// paging, GUID lookup, per-category current-state queries and per-category
/// mutators. Implemented by the host integration in production and by an
/// in-memory fake in tests.
pub mod case;

/// Typed error taxonomy for store, schema, host-API, lifecycle and
/// cancellation failures.
pub mod error;

/// Event model: the six tracked categories, their payloads, and the
/// [`event::HistoryEvent`] unit of record.
pub mod event;

/// Console logging setup built on `env_logger`, controlled via `RUST_LOG`.
pub mod logger;

/// Replay of recorded events onto a target case.
///
/// Resolves each stored item reference through a pluggable
/// [`replay::ItemResolver`] (GUID match is the baseline) and re-applies the
/// event's mutation through the case collaborator. Missing items are
/// tolerated per event and reported in aggregate.
pub mod replay;

/// Capture/replay selection: which categories participate, and whether a new
/// store is seeded with a snapshot baseline.
pub mod settings;

/// The durable event store: a single SQLite file holding one table per event
/// category plus the per-case sync cursor. Append-only, idempotent,
/// exclusively locked while open.
pub mod store;

/// Per-category counts of a store's contents, derived on demand.
pub mod summary;

/// The repository and sync controller: orchestrates snapshot-vs-incremental
/// capture, drives the history reader, advances the cursor, and emits
/// progress and status messages.
pub mod sync;

pub use case::{
    CaseCollaborator, CaseItem, CustomMetadataState, ItemSetState, MembershipState,
    ProductionSetState, RawHistoryEntry,
};
pub use error::{Result, SyncError};
pub use event::{EventKind, EventPayload, HistoryEvent, MetadataValue};
pub use replay::{GuidResolver, ItemResolver, ReplayMiss, ReplayOutcome, ReplayReport};
pub use settings::SyncSettings;
pub use store::{EventIter, EventStore, PageCommit, SCHEMA_VERSION};
pub use summary::SyncSummary;
pub use sync::{CancelToken, Repository, SyncReport};
