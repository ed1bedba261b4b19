use chrono::Utc;
use log::info;

use crate::case::CaseCollaborator;
use crate::error::Result;
use crate::event::{EventPayload, HistoryEvent};
use crate::settings::SyncSettings;

/// Actor recorded on synthetic baseline events.
const BASELINE_ACTOR: &str = "baseline-snapshot";

/// Builds the synthetic baseline for a snapshot-first sync: one event per
/// distinct (item, field) of current case state, all at sequence 0 so they
/// sort before any real captured event. Only categories enabled in
/// `settings` are queried.
pub(crate) fn baseline_events(
    case: &dyn CaseCollaborator,
    settings: &SyncSettings,
) -> Result<Vec<HistoryEvent>> {
    let mut events = Vec::new();
    let timestamp = Utc::now();
    let make = |item_guid: &str, payload: EventPayload| HistoryEvent {
        source_case_id: case.id().to_string(),
        sequence: 0,
        timestamp,
        actor: BASELINE_ACTOR.to_string(),
        item_guid: item_guid.to_string(),
        synthetic: true,
        payload,
    };

    if settings.sync_tag_events {
        for state in case.current_tags()? {
            info!(
                "snapshot: tag '{}' on {} items",
                state.name,
                state.item_guids.len()
            );
            for guid in &state.item_guids {
                events.push(make(
                    guid,
                    EventPayload::Tag {
                        tag: state.name.clone(),
                        added: true,
                    },
                ));
            }
        }
    }

    if settings.sync_custom_metadata_events {
        for state in case.current_custom_metadata()? {
            events.push(make(
                &state.item_guid,
                EventPayload::CustomMetadata {
                    field_name: state.field_name,
                    value: Some(state.value),
                    added: true,
                },
            ));
        }
    }

    if settings.sync_item_set_events {
        for state in case.current_item_sets()? {
            info!(
                "snapshot: item set '{}' with {} members",
                state.name,
                state.item_guids.len()
            );
            for guid in &state.item_guids {
                events.push(make(
                    guid,
                    EventPayload::ItemSet {
                        set_name: state.name.clone(),
                        batch: None,
                        description: state.description.clone(),
                        settings_json: state.settings_json.clone(),
                        added: true,
                    },
                ));
            }
        }
    }

    if settings.sync_exclusion_events {
        for state in case.current_exclusions()? {
            for guid in &state.item_guids {
                events.push(make(
                    guid,
                    EventPayload::Exclusion {
                        exclusion: Some(state.name.clone()),
                        excluded: true,
                    },
                ));
            }
        }
    }

    if settings.sync_custodian_events {
        for state in case.current_custodians()? {
            info!(
                "snapshot: custodian '{}' on {} items",
                state.name,
                state.item_guids.len()
            );
            for guid in &state.item_guids {
                events.push(make(
                    guid,
                    EventPayload::Custodian {
                        custodian: Some(state.name.clone()),
                        assigned: true,
                    },
                ));
            }
        }
    }

    if settings.sync_production_set_events {
        for state in case.current_production_sets()? {
            for guid in &state.item_guids {
                events.push(make(
                    guid,
                    EventPayload::ProductionSet {
                        set_name: state.name.clone(),
                        settings_json: state.settings_json.clone(),
                        added: true,
                    },
                ));
            }
        }
    }

    Ok(events)
}
