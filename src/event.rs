use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::case::CaseCollaborator;
use crate::error::Result;
use crate::replay::{self, ItemResolver, ReplayOutcome};

/// Category of annotation history event.
///
/// Each category is persisted in its own table and can be individually
/// enabled or disabled for capture via [`crate::settings::SyncSettings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    /// Tag added to or removed from an item
    Tag,
    /// Custom metadata field set on or removed from an item
    CustomMetadata,
    /// Item-set membership change
    ItemSet,
    /// Item excluded or re-included
    Exclusion,
    /// Custodian assigned or unassigned
    Custodian,
    /// Production-set membership change
    ProductionSet,
}

impl EventKind {
    /// All categories, in the fixed order used for cross-category merges.
    pub const ALL: [EventKind; 6] = [
        EventKind::Tag,
        EventKind::CustomMetadata,
        EventKind::ItemSet,
        EventKind::Exclusion,
        EventKind::Custodian,
        EventKind::ProductionSet,
    ];

    /// Returns a human-readable string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Tag => "tag",
            EventKind::CustomMetadata => "custom-metadata",
            EventKind::ItemSet => "item-set",
            EventKind::Exclusion => "exclusion",
            EventKind::Custodian => "custodian",
            EventKind::ProductionSet => "production-set",
        }
    }
}

/// A typed custom-metadata value.
///
/// Events store the absolute target value rather than a delta so that
/// replaying the same event twice converges to the same field state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
pub enum MetadataValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    DateTime(DateTime<Utc>),
}

impl MetadataValue {
    /// Renders the value the way it would appear in a report line.
    pub fn display_string(&self) -> String {
        match self {
            MetadataValue::Text(s) => s.clone(),
            MetadataValue::Integer(i) => i.to_string(),
            MetadataValue::Float(f) => f.to_string(),
            MetadataValue::Boolean(b) => b.to_string(),
            MetadataValue::DateTime(dt) => dt.to_rfc3339(),
        }
    }
}

/// Category-specific fields of a history event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventPayload {
    Tag {
        tag: String,
        added: bool,
    },
    CustomMetadata {
        field_name: String,
        /// Present for set events, absent for removals.
        value: Option<MetadataValue>,
        added: bool,
    },
    ItemSet {
        set_name: String,
        batch: Option<String>,
        description: Option<String>,
        /// Item-set creation settings, serialized JSON. Used to recreate the
        /// set on a target case that does not have it yet.
        settings_json: Option<String>,
        added: bool,
    },
    Exclusion {
        /// Exclusion reason. Absent on re-include events, where the host log
        /// does not name the exclusion being cleared.
        exclusion: Option<String>,
        excluded: bool,
    },
    Custodian {
        /// `None` means the custodian was unassigned.
        custodian: Option<String>,
        assigned: bool,
    },
    ProductionSet {
        set_name: String,
        settings_json: Option<String>,
        added: bool,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Tag { .. } => EventKind::Tag,
            EventPayload::CustomMetadata { .. } => EventKind::CustomMetadata,
            EventPayload::ItemSet { .. } => EventKind::ItemSet,
            EventPayload::Exclusion { .. } => EventKind::Exclusion,
            EventPayload::Custodian { .. } => EventKind::Custodian,
            EventPayload::ProductionSet { .. } => EventKind::ProductionSet,
        }
    }

    /// The category-specific name field (tag, field name, set name, ...).
    ///
    /// Together with `(source_case_id, sequence, item_guid)` this forms the
    /// store's dedup key: one host log entry fans out to one event per
    /// affected item, and snapshot baselines share sequence 0, so sequence
    /// alone cannot identify a row.
    pub fn key(&self) -> &str {
        match self {
            EventPayload::Tag { tag, .. } => tag,
            EventPayload::CustomMetadata { field_name, .. } => field_name,
            EventPayload::ItemSet { set_name, .. } => set_name,
            EventPayload::Exclusion { exclusion, .. } => exclusion.as_deref().unwrap_or(""),
            EventPayload::Custodian { custodian, .. } => custodian.as_deref().unwrap_or(""),
            EventPayload::ProductionSet { set_name, .. } => set_name,
        }
    }
}

/// The unit of record: one annotation change to one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    /// Identifier of the case the event was captured from
    pub source_case_id: String,

    /// Position in the source case's history log. Monotonic per source case;
    /// synthetic baseline events sit at 0, before any real event.
    pub sequence: u64,

    /// When the change was made in the source case
    pub timestamp: DateTime<Utc>,

    /// User or process that made the change
    pub actor: String,

    /// Stable cross-case identifier of the affected item
    pub item_guid: String,

    /// True only for baseline events produced by snapshot-first sync
    pub synthetic: bool,

    /// Category-specific fields
    pub payload: EventPayload,
}

impl HistoryEvent {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Re-applies this event's mutation onto `target`.
    ///
    /// The item is resolved through `resolver` ([`crate::replay::GuidResolver`]
    /// is the baseline). An unresolved item yields
    /// [`ReplayOutcome::TargetNotFound`] rather than an error, so a bulk
    /// replay can tolerate items missing from the target corpus.
    pub fn replay(
        &self,
        target: &dyn CaseCollaborator,
        resolver: &dyn ItemResolver,
    ) -> Result<ReplayOutcome> {
        replay::apply_event(self, target, resolver)
    }

    /// One-line description used for message callbacks and logs.
    pub fn describe(&self) -> String {
        let verb = match &self.payload {
            EventPayload::Tag { added: true, .. } => "add tag",
            EventPayload::Tag { added: false, .. } => "remove tag",
            EventPayload::CustomMetadata { added: true, .. } => "set field",
            EventPayload::CustomMetadata { added: false, .. } => "remove field",
            EventPayload::ItemSet { added: true, .. } => "add to item set",
            EventPayload::ItemSet { added: false, .. } => "remove from item set",
            EventPayload::Exclusion { excluded: true, .. } => "exclude as",
            EventPayload::Exclusion { excluded: false, .. } => "include",
            EventPayload::Custodian { assigned: true, .. } => "assign custodian",
            EventPayload::Custodian { assigned: false, .. } => "unassign custodian",
            EventPayload::ProductionSet { added: true, .. } => "add to production set",
            EventPayload::ProductionSet { added: false, .. } => "remove from production set",
        };
        format!(
            "[{}@{}] {} '{}' on item {}",
            self.kind().as_str(),
            self.sequence,
            verb,
            self.payload.key(),
            self.item_guid
        )
    }
}
