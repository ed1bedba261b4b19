use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::event::EventKind;
use crate::store::EventStore;

/// Per-category event counts for a store, derived by scanning the store at
/// call time. Never persisted; always consistent with current contents and
/// cheap relative to capture or replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub tag_events: u64,
    pub custom_metadata_events: u64,
    pub item_set_events: u64,
    pub exclusion_events: u64,
    pub custodian_events: u64,
    pub production_set_events: u64,
    pub total_events: u64,
}

impl SyncSummary {
    pub(crate) fn from_store(store: &EventStore) -> Result<SyncSummary> {
        let mut summary = SyncSummary::default();
        for kind in EventKind::ALL {
            let count = store.count(kind)?;
            *summary.slot_mut(kind) = count;
            summary.total_events += count;
        }
        Ok(summary)
    }

    /// Count for one category.
    pub fn count(&self, kind: EventKind) -> u64 {
        match kind {
            EventKind::Tag => self.tag_events,
            EventKind::CustomMetadata => self.custom_metadata_events,
            EventKind::ItemSet => self.item_set_events,
            EventKind::Exclusion => self.exclusion_events,
            EventKind::Custodian => self.custodian_events,
            EventKind::ProductionSet => self.production_set_events,
        }
    }

    fn slot_mut(&mut self, kind: EventKind) -> &mut u64 {
        match kind {
            EventKind::Tag => &mut self.tag_events,
            EventKind::CustomMetadata => &mut self.custom_metadata_events,
            EventKind::ItemSet => &mut self.item_set_events,
            EventKind::Exclusion => &mut self.exclusion_events,
            EventKind::Custodian => &mut self.custodian_events,
            EventKind::ProductionSet => &mut self.production_set_events,
        }
    }
}

impl fmt::Display for SyncSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for kind in EventKind::ALL {
            writeln!(f, "{} events: {}", kind.as_str(), self.count(kind))?;
        }
        write!(f, "total events: {}", self.total_events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_accessor_matches_fields() {
        let summary = SyncSummary {
            tag_events: 3,
            exclusion_events: 2,
            total_events: 5,
            ..Default::default()
        };
        assert_eq!(summary.count(EventKind::Tag), 3);
        assert_eq!(summary.count(EventKind::Exclusion), 2);
        assert_eq!(summary.count(EventKind::Custodian), 0);
    }

    #[test]
    fn test_display_lists_every_category_and_total() {
        let summary = SyncSummary {
            tag_events: 1,
            total_events: 1,
            ..Default::default()
        };
        let rendered = summary.to_string();
        for kind in EventKind::ALL {
            assert!(rendered.contains(kind.as_str()));
        }
        assert!(rendered.ends_with("total events: 1"));
    }
}
