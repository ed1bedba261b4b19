use log::warn;

use crate::case::{CaseCollaborator, CaseItem};
use crate::error::{Result, SyncError};
use crate::event::{EventKind, EventPayload, HistoryEvent};
use crate::store::EventStore;
use crate::sync::CancelToken;

/// Resolves a stored item reference against a target case.
///
/// [`GuidResolver`] is the baseline method (exact identifier match); other
/// matching strategies plug in through this trait. An unresolved item is
/// reported as `None` and the event becomes a tolerated miss, never an error.
pub trait ItemResolver {
    fn resolve(&self, case: &dyn CaseCollaborator, guid: &str) -> Result<Option<CaseItem>>;
}

/// Baseline matching method: exact GUID lookup in the target case.
#[derive(Debug, Clone, Copy, Default)]
pub struct GuidResolver;

impl ItemResolver for GuidResolver {
    fn resolve(&self, case: &dyn CaseCollaborator, guid: &str) -> Result<Option<CaseItem>> {
        case.find_item_by_guid(guid)
    }
}

/// Result of replaying a single event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// The event's mutation was applied to the target case
    Applied,
    /// The item could not be resolved in the target case
    TargetNotFound,
}

/// One event whose item was missing from the target case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayMiss {
    pub kind: EventKind,
    pub sequence: u64,
    pub item_guid: String,
}

/// Aggregate outcome of a bulk replay. Misses are collected rather than
/// aborting: a full corpus is rarely guaranteed to exist on both sides.
#[derive(Debug, Clone, Default)]
pub struct ReplayReport {
    pub applied: u64,
    pub misses: Vec<ReplayMiss>,
}

impl ReplayReport {
    pub fn is_complete(&self) -> bool {
        self.misses.is_empty()
    }
}

/// Replays an already-ordered stream of events onto `target`.
///
/// Events for the same (item, field) must arrive in ascending sequence order
/// for the final state to equal the net effect of the history;
/// [`crate::store::EventIter`] streams and [`replay_ordered`] merges satisfy
/// this. Misses are tolerated per event; store and host errors abort.
pub fn replay_stream<I>(
    events: I,
    target: &dyn CaseCollaborator,
    resolver: &dyn ItemResolver,
) -> Result<ReplayReport>
where
    I: IntoIterator<Item = Result<HistoryEvent>>,
{
    let mut report = ReplayReport::default();
    for event in events {
        let event = event?;
        record_outcome(&mut report, &event, apply_event(&event, target, resolver)?);
    }
    Ok(report)
}

/// Replays the whole store onto `target`, merging all six category streams
/// into one ascending-sequence order. Checks `cancel` between events.
pub(crate) fn replay_ordered(
    store: &EventStore,
    target: &dyn CaseCollaborator,
    resolver: &dyn ItemResolver,
    cancel: &CancelToken,
    progress: &mut dyn FnMut(u64),
) -> Result<ReplayReport> {
    let mut streams = Vec::with_capacity(EventKind::ALL.len());
    for kind in EventKind::ALL {
        streams.push(store.events_after(kind, 0)?.peekable());
    }

    let mut report = ReplayReport::default();
    let mut current = 0u64;
    loop {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        // Front of the merge: the stream with the lowest pending sequence.
        // A pending error wins immediately so it surfaces right away.
        let mut best: Option<usize> = None;
        let mut best_sequence = u64::MAX;
        for (i, stream) in streams.iter_mut().enumerate() {
            match stream.peek() {
                None => {}
                Some(Err(_)) => {
                    best = Some(i);
                    break;
                }
                Some(Ok(event)) => {
                    if event.sequence < best_sequence {
                        best_sequence = event.sequence;
                        best = Some(i);
                    }
                }
            }
        }
        let Some(i) = best else { break };
        let Some(next) = streams[i].next() else { break };
        let event = next?;

        current += 1;
        progress(current);
        record_outcome(&mut report, &event, apply_event(&event, target, resolver)?);
    }
    Ok(report)
}

fn record_outcome(report: &mut ReplayReport, event: &HistoryEvent, outcome: ReplayOutcome) {
    match outcome {
        ReplayOutcome::Applied => report.applied += 1,
        ReplayOutcome::TargetNotFound => {
            warn!("replay target not found: {}", event.describe());
            report.misses.push(ReplayMiss {
                kind: event.kind(),
                sequence: event.sequence,
                item_guid: event.item_guid.clone(),
            });
        }
    }
}

/// Applies one event's mutation to the target case, resolving the item first.
pub(crate) fn apply_event(
    event: &HistoryEvent,
    target: &dyn CaseCollaborator,
    resolver: &dyn ItemResolver,
) -> Result<ReplayOutcome> {
    let Some(item) = resolver.resolve(target, &event.item_guid)? else {
        return Ok(ReplayOutcome::TargetNotFound);
    };

    match &event.payload {
        EventPayload::Tag { tag, added } => {
            if *added {
                target.add_tag(&item.guid, tag)?;
            } else {
                target.remove_tag(&item.guid, tag)?;
            }
        }
        EventPayload::CustomMetadata {
            field_name,
            value,
            added,
        } => match value {
            Some(value) if *added => target.put_custom_metadata(&item.guid, field_name, value)?,
            _ => target.remove_custom_metadata(&item.guid, field_name)?,
        },
        EventPayload::ItemSet {
            set_name,
            batch,
            description,
            settings_json,
            added,
        } => {
            if *added {
                target.ensure_item_set(set_name, description.as_deref(), settings_json.as_deref())?;
                target.add_to_item_set(set_name, &item.guid, batch.as_deref())?;
            } else {
                target.remove_from_item_set(set_name, &item.guid)?;
            }
        }
        EventPayload::Exclusion {
            exclusion,
            excluded,
        } => {
            if *excluded {
                target.set_exclusion(&item.guid, exclusion.as_deref().unwrap_or(""))?;
            } else {
                target.clear_exclusion(&item.guid)?;
            }
        }
        EventPayload::Custodian {
            custodian,
            assigned,
        } => match custodian {
            Some(custodian) if *assigned => target.assign_custodian(&item.guid, custodian)?,
            _ => target.unassign_custodian(&item.guid)?,
        },
        EventPayload::ProductionSet {
            set_name,
            settings_json,
            added,
        } => {
            if *added {
                target.ensure_production_set(set_name, settings_json.as_deref())?;
                target.add_to_production_set(set_name, &item.guid)?;
            } else {
                target.remove_from_production_set(set_name, &item.guid)?;
            }
        }
    }
    Ok(ReplayOutcome::Applied)
}
