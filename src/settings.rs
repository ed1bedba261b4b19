use serde::{Deserialize, Serialize};

use crate::event::EventKind;

/// Selects which event categories participate in capture and whether a new
/// store is seeded with a snapshot of current case state.
///
/// Defaults enable everything, matching the common "mirror the whole case"
/// use. The struct is passed by reference into sync calls and never mutated
/// by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_true")]
    pub sync_tag_events: bool,
    #[serde(default = "default_true")]
    pub sync_custom_metadata_events: bool,
    #[serde(default = "default_true")]
    pub sync_item_set_events: bool,
    #[serde(default = "default_true")]
    pub sync_exclusion_events: bool,
    #[serde(default = "default_true")]
    pub sync_custodian_events: bool,
    #[serde(default = "default_true")]
    pub sync_production_set_events: bool,

    /// When true and the store has no events yet for the case, seed the store
    /// with synthetic baseline events describing current case state instead
    /// of walking history back to case creation.
    #[serde(default = "default_true")]
    pub snapshot_first_sync: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            sync_tag_events: true,
            sync_custom_metadata_events: true,
            sync_item_set_events: true,
            sync_exclusion_events: true,
            sync_custodian_events: true,
            sync_production_set_events: true,
            snapshot_first_sync: true,
        }
    }
}

impl SyncSettings {
    /// Whether the given category is enabled for capture.
    pub fn enabled(&self, kind: EventKind) -> bool {
        match kind {
            EventKind::Tag => self.sync_tag_events,
            EventKind::CustomMetadata => self.sync_custom_metadata_events,
            EventKind::ItemSet => self.sync_item_set_events,
            EventKind::Exclusion => self.sync_exclusion_events,
            EventKind::Custodian => self.sync_custodian_events,
            EventKind::ProductionSet => self.sync_production_set_events,
        }
    }

    /// Multi-line summary of the settings, for log output at sync start.
    pub fn describe(&self) -> String {
        let mut lines = Vec::new();
        for kind in EventKind::ALL {
            lines.push(format!(
                "  sync {} events: {}",
                kind.as_str(),
                self.enabled(kind)
            ));
        }
        lines.push(format!("  snapshot first sync: {}", self.snapshot_first_sync));
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_enable_everything() {
        let settings = SyncSettings::default();
        for kind in EventKind::ALL {
            assert!(settings.enabled(kind), "{} should default on", kind.as_str());
        }
        assert!(settings.snapshot_first_sync);
    }

    #[test]
    fn test_enabled_respects_per_category_flags() {
        let settings = SyncSettings {
            sync_tag_events: false,
            sync_custodian_events: false,
            ..Default::default()
        };
        assert!(!settings.enabled(EventKind::Tag));
        assert!(!settings.enabled(EventKind::Custodian));
        assert!(settings.enabled(EventKind::Exclusion));
    }

    #[test]
    fn test_serde_defaults_missing_fields_to_true() {
        let settings: SyncSettings =
            serde_json::from_str(r#"{"sync_tag_events": false}"#).unwrap();
        assert!(!settings.sync_tag_events);
        assert!(settings.sync_item_set_events);
        assert!(settings.snapshot_first_sync);
    }

    #[test]
    fn test_describe_lists_all_categories() {
        let summary = SyncSettings::default().describe();
        for kind in EventKind::ALL {
            assert!(summary.contains(kind.as_str()));
        }
    }
}
