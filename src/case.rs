use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::event::MetadataValue;

/// A raw entry from the host's history log, before classification.
///
/// `details` carries the host's loosely-typed detail map; which keys are
/// present determines the event category (see `sync::capture`). A single
/// entry may affect many items, hence `affected_guids`.
#[derive(Debug, Clone)]
pub struct RawHistoryEntry {
    /// Position in the host log, monotonic per case
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    /// User or process that made the change
    pub actor: String,
    /// Host-provided detail map (e.g. `tag`, `fieldName`, `item-set`, ...)
    pub details: Map<String, Value>,
    /// GUIDs of the items the entry applies to
    pub affected_guids: Vec<String>,
}

/// Handle to an item resolved in a case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseItem {
    pub guid: String,
}

/// Items currently carrying one named annotation (a tag, a custodian, an
/// exclusion reason). Used by snapshot-first sync.
#[derive(Debug, Clone)]
pub struct MembershipState {
    pub name: String,
    pub item_guids: Vec<String>,
}

/// Current membership and creation settings of one item set.
#[derive(Debug, Clone)]
pub struct ItemSetState {
    pub name: String,
    pub description: Option<String>,
    pub settings_json: Option<String>,
    pub item_guids: Vec<String>,
}

/// Current membership and creation settings of one production set.
#[derive(Debug, Clone)]
pub struct ProductionSetState {
    pub name: String,
    pub settings_json: Option<String>,
    pub item_guids: Vec<String>,
}

/// Current value of one custom-metadata field on one item.
#[derive(Debug, Clone)]
pub struct CustomMetadataState {
    pub item_guid: String,
    pub field_name: String,
    pub value: MetadataValue,
}

/// Narrow capability surface of a host case.
///
/// Only the operations this engine actually calls are modeled: history
/// access, GUID lookup, per-category current-state queries (for
/// snapshot-first sync) and per-category mutators (for replay). The host's
/// full API is irrelevant here, and a fake implementation backed by in-memory
/// maps is all the tests need.
///
/// Implementations report host-side failures as
/// [`crate::SyncError::HostApi`]. The case object may be shared with
/// unrelated callers; this engine performs no locking on it.
pub trait CaseCollaborator {
    /// Stable identifier of the case
    fn id(&self) -> &str;

    /// Display name of the case
    fn name(&self) -> &str;

    /// Filesystem location or URI of the case
    fn location(&self) -> &str;

    /// Sequence of the newest entry currently in the history log, 0 when the
    /// log is empty.
    fn last_history_sequence(&self) -> Result<u64>;

    /// Returns up to `limit` history entries with sequence strictly greater
    /// than `after_sequence`, in ascending sequence order. An empty page
    /// means the log is exhausted.
    fn history_page(&self, after_sequence: u64, limit: usize) -> Result<Vec<RawHistoryEntry>>;

    /// Exact-GUID item lookup.
    fn find_item_by_guid(&self, guid: &str) -> Result<Option<CaseItem>>;

    // -- current-state queries, consumed by snapshot-first sync --

    fn current_tags(&self) -> Result<Vec<MembershipState>>;
    fn current_custodians(&self) -> Result<Vec<MembershipState>>;
    fn current_exclusions(&self) -> Result<Vec<MembershipState>>;
    fn current_item_sets(&self) -> Result<Vec<ItemSetState>>;
    fn current_production_sets(&self) -> Result<Vec<ProductionSetState>>;
    fn current_custom_metadata(&self) -> Result<Vec<CustomMetadataState>>;

    // -- mutation surface, consumed by replay --

    fn add_tag(&self, guid: &str, tag: &str) -> Result<()>;
    fn remove_tag(&self, guid: &str, tag: &str) -> Result<()>;

    fn put_custom_metadata(&self, guid: &str, field: &str, value: &MetadataValue) -> Result<()>;
    fn remove_custom_metadata(&self, guid: &str, field: &str) -> Result<()>;

    /// Creates the item set if it does not exist yet; no-op otherwise.
    fn ensure_item_set(
        &self,
        name: &str,
        description: Option<&str>,
        settings_json: Option<&str>,
    ) -> Result<()>;
    fn add_to_item_set(&self, set_name: &str, guid: &str, batch: Option<&str>) -> Result<()>;
    fn remove_from_item_set(&self, set_name: &str, guid: &str) -> Result<()>;

    fn set_exclusion(&self, guid: &str, exclusion: &str) -> Result<()>;
    fn clear_exclusion(&self, guid: &str) -> Result<()>;

    fn assign_custodian(&self, guid: &str, custodian: &str) -> Result<()>;
    fn unassign_custodian(&self, guid: &str) -> Result<()>;

    /// Creates the production set if it does not exist yet; no-op otherwise.
    fn ensure_production_set(&self, name: &str, settings_json: Option<&str>) -> Result<()>;
    fn add_to_production_set(&self, set_name: &str, guid: &str) -> Result<()>;
    fn remove_from_production_set(&self, set_name: &str, guid: &str) -> Result<()>;
}
