use chrono::{DateTime, Utc};
use log::trace;
use serde_json::{Map, Value};

use crate::case::CaseCollaborator;
use crate::error::Result;
use crate::event::{EventPayload, MetadataValue};

/// History-log entries pulled from the host per round trip. Internal bound on
/// memory, not part of any contract.
pub(crate) const PAGE_SIZE: usize = 250;

/// One raw log entry classified into a tracked category, ready to fan out
/// into one event per affected item.
pub(crate) struct ClassifiedEntry {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub payload: EventPayload,
    pub guids: Vec<String>,
}

/// One page of capture output.
pub(crate) struct CapturedPage {
    /// Highest raw sequence seen in the page, including skipped entries.
    /// The cursor advances to this after the page commits.
    pub last_sequence: u64,
    pub entries: Vec<ClassifiedEntry>,
    /// Raw entries in the page, mapped or not
    pub raw_count: usize,
    /// Entries that did not map to a tracked category
    pub skipped: usize,
}

/// Forward-only, paged reader of the host history log.
///
/// Pulls raw entries past a starting sequence, classifies each into one of
/// the six tracked categories or skips it. Classification is total: an entry
/// either maps cleanly or is discarded, never half-captured.
pub(crate) struct HistoryCapture<'a> {
    case: &'a dyn CaseCollaborator,
    after_sequence: u64,
    exhausted: bool,
}

impl<'a> HistoryCapture<'a> {
    pub fn new(case: &'a dyn CaseCollaborator, from_sequence: u64) -> Self {
        HistoryCapture {
            case,
            after_sequence: from_sequence,
            exhausted: false,
        }
    }

    /// Next page of classified entries, or `None` when the log is exhausted.
    pub fn next_page(&mut self) -> Result<Option<CapturedPage>> {
        if self.exhausted {
            return Ok(None);
        }
        let raw = self.case.history_page(self.after_sequence, PAGE_SIZE)?;
        if raw.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }

        let mut page = CapturedPage {
            last_sequence: self.after_sequence,
            entries: Vec::with_capacity(raw.len()),
            raw_count: raw.len(),
            skipped: 0,
        };
        for entry in raw {
            page.last_sequence = page.last_sequence.max(entry.sequence);
            match classify(&entry.details) {
                Some(payload) => page.entries.push(ClassifiedEntry {
                    sequence: entry.sequence,
                    timestamp: entry.timestamp,
                    actor: entry.actor,
                    payload,
                    guids: entry.affected_guids,
                }),
                None => {
                    trace!("skipping unmapped history entry at sequence {}", entry.sequence);
                    page.skipped += 1;
                }
            }
        }
        self.after_sequence = page.last_sequence;
        Ok(Some(page))
    }
}

/// Maps a host detail map to a tracked category, or `None` for entries this
/// engine does not mirror. The discriminating keys follow the host log:
/// `tag`, `fieldName`, `item-set`, `excluded`, `assigned`, `productionSet`.
pub(crate) fn classify(details: &Map<String, Value>) -> Option<EventPayload> {
    if details.contains_key("tag") {
        return Some(EventPayload::Tag {
            tag: str_field(details, "tag")?,
            added: bool_field(details, "added")?,
        });
    }
    if details.contains_key("fieldName") {
        return classify_custom_metadata(details);
    }
    if details.contains_key("item-set")
        && (details.contains_key("items-assigned-count")
            || details.contains_key("items-unassigned-count"))
    {
        return Some(EventPayload::ItemSet {
            set_name: str_field(details, "item-set")?,
            batch: str_field(details, "batch"),
            description: str_field(details, "description"),
            settings_json: json_field(details, "settings"),
            added: details.contains_key("items-assigned-count"),
        });
    }
    if details.contains_key("excluded") {
        let excluded = bool_field(details, "excluded")?;
        let exclusion = str_field(details, "exclusion");
        if excluded && exclusion.is_none() {
            return None;
        }
        return Some(EventPayload::Exclusion {
            exclusion,
            excluded,
        });
    }
    if details.contains_key("assigned") {
        let assigned = bool_field(details, "assigned")?;
        let custodian = str_field(details, "custodian");
        if assigned && custodian.is_none() {
            return None;
        }
        return Some(EventPayload::Custodian {
            custodian,
            assigned,
        });
    }
    if details.contains_key("productionSet") {
        return Some(EventPayload::ProductionSet {
            set_name: str_field(details, "productionSet")?,
            settings_json: json_field(details, "settings"),
            added: bool_field(details, "added")?,
        });
    }
    None
}

fn classify_custom_metadata(details: &Map<String, Value>) -> Option<EventPayload> {
    let field_name = str_field(details, "fieldName")?;
    // A `type` key marks a set event; its absence marks a removal.
    let Some(value_type) = str_field(details, "type") else {
        return Some(EventPayload::CustomMetadata {
            field_name,
            value: None,
            added: false,
        });
    };
    let raw = details.get("value")?;
    let value = match value_type.as_str() {
        "integer" | "long" => MetadataValue::Integer(raw.as_i64()?),
        "float" => MetadataValue::Float(raw.as_f64()?),
        "boolean" => MetadataValue::Boolean(raw.as_bool()?),
        "date-time" => {
            let parsed = DateTime::parse_from_rfc3339(raw.as_str()?).ok()?;
            MetadataValue::DateTime(parsed.with_timezone(&Utc))
        }
        _ => MetadataValue::Text(raw.as_str()?.to_string()),
    };
    Some(EventPayload::CustomMetadata {
        field_name,
        value: Some(value),
        added: true,
    })
}

fn str_field(details: &Map<String, Value>, key: &str) -> Option<String> {
    details.get(key).and_then(Value::as_str).map(str::to_string)
}

fn bool_field(details: &Map<String, Value>, key: &str) -> Option<bool> {
    details.get(key).and_then(Value::as_bool)
}

/// Structured settings objects are kept as serialized JSON so they can be
/// stored and handed back to the host verbatim on replay.
fn json_field(details: &Map<String, Value>, key: &str) -> Option<String> {
    details.get(key).map(|v| v.to_string())
}
