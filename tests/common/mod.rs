//! In-memory fake of the host case platform, shared by the integration
//! tests. Carries a scripted history log plus mutable annotation state, so
//! the same type serves as capture source and replay target.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use annotation_sync::{
    CaseCollaborator, CaseItem, CustomMetadataState, ItemSetState, MembershipState, MetadataValue,
    ProductionSetState, RawHistoryEntry, Result, SyncError,
};
use chrono::{Duration, TimeZone, Utc};
use serde_json::{json, Value};

#[derive(Debug, Clone, Default)]
struct SetState {
    description: Option<String>,
    settings_json: Option<String>,
    members: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct CaseState {
    items: BTreeSet<String>,
    history: Vec<RawHistoryEntry>,
    /// guid -> tags
    tags: BTreeMap<String, BTreeSet<String>>,
    /// (guid, field) -> value
    metadata: BTreeMap<(String, String), MetadataValue>,
    item_sets: BTreeMap<String, SetState>,
    /// guid -> exclusion reason
    exclusions: BTreeMap<String, String>,
    /// guid -> custodian
    custodians: BTreeMap<String, String>,
    production_sets: BTreeMap<String, SetState>,
    /// Fail `history_page` once this many pages have been served
    fail_after_pages: Option<usize>,
    pages_served: usize,
}

pub struct FakeCase {
    id: String,
    name: String,
    location: String,
    state: RefCell<CaseState>,
}

#[allow(dead_code)]
impl FakeCase {
    pub fn new(id: &str) -> Self {
        FakeCase {
            id: id.to_string(),
            name: format!("Fake Case {id}"),
            location: format!("/cases/{id}"),
            state: RefCell::new(CaseState::default()),
        }
    }

    pub fn add_item(&self, guid: &str) {
        self.state.borrow_mut().items.insert(guid.to_string());
    }

    /// Appends a raw history entry; `sequence` doubles as a second offset on
    /// the synthetic timestamp so entries stay chronologically ordered.
    pub fn push_entry(&self, sequence: u64, details: Value, guids: &[&str]) {
        let timestamp = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
            + Duration::seconds(sequence as i64);
        self.state.borrow_mut().history.push(RawHistoryEntry {
            sequence,
            timestamp,
            actor: "reviewer".to_string(),
            details: details.as_object().expect("details must be an object").clone(),
            affected_guids: guids.iter().map(|g| g.to_string()).collect(),
        });
    }

    pub fn push_tag_entry(&self, sequence: u64, tag: &str, added: bool, guids: &[&str]) {
        self.push_entry(sequence, json!({ "tag": tag, "added": added }), guids);
    }

    pub fn push_exclusion_entry(&self, sequence: u64, exclusion: &str, guids: &[&str]) {
        self.push_entry(
            sequence,
            json!({ "excluded": true, "exclusion": exclusion }),
            guids,
        );
    }

    pub fn push_custodian_entry(&self, sequence: u64, custodian: &str, guids: &[&str]) {
        self.push_entry(
            sequence,
            json!({ "assigned": true, "custodian": custodian }),
            guids,
        );
    }

    /// Serve this many history pages, then fail with a host error.
    pub fn fail_after_pages(&self, pages: usize) {
        let mut state = self.state.borrow_mut();
        state.fail_after_pages = Some(pages);
        state.pages_served = 0;
    }

    pub fn clear_failure(&self) {
        let mut state = self.state.borrow_mut();
        state.fail_after_pages = None;
        state.pages_served = 0;
    }

    // -- direct state setup and inspection --

    pub fn tag_item(&self, guid: &str, tag: &str) {
        self.state
            .borrow_mut()
            .tags
            .entry(guid.to_string())
            .or_default()
            .insert(tag.to_string());
    }

    pub fn tags_of(&self, guid: &str) -> Vec<String> {
        self.state
            .borrow()
            .tags
            .get(guid)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn metadata_of(&self, guid: &str, field: &str) -> Option<MetadataValue> {
        self.state
            .borrow()
            .metadata
            .get(&(guid.to_string(), field.to_string()))
            .cloned()
    }

    pub fn exclusion_of(&self, guid: &str) -> Option<String> {
        self.state.borrow().exclusions.get(guid).cloned()
    }

    pub fn custodian_of(&self, guid: &str) -> Option<String> {
        self.state.borrow().custodians.get(guid).cloned()
    }

    pub fn has_item_set(&self, name: &str) -> bool {
        self.state.borrow().item_sets.contains_key(name)
    }

    pub fn item_set_members(&self, name: &str) -> Vec<String> {
        self.state
            .borrow()
            .item_sets
            .get(name)
            .map(|s| s.members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn production_set_members(&self, name: &str) -> Vec<String> {
        self.state
            .borrow()
            .production_sets
            .get(name)
            .map(|s| s.members.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl CaseCollaborator for FakeCase {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn location(&self) -> &str {
        &self.location
    }

    fn last_history_sequence(&self) -> Result<u64> {
        Ok(self
            .state
            .borrow()
            .history
            .iter()
            .map(|e| e.sequence)
            .max()
            .unwrap_or(0))
    }

    fn history_page(&self, after_sequence: u64, limit: usize) -> Result<Vec<RawHistoryEntry>> {
        let mut state = self.state.borrow_mut();
        if let Some(pages) = state.fail_after_pages {
            if state.pages_served >= pages {
                return Err(SyncError::host("history log unavailable"));
            }
        }
        let mut page: Vec<RawHistoryEntry> = state
            .history
            .iter()
            .filter(|e| e.sequence > after_sequence)
            .cloned()
            .collect();
        page.sort_by_key(|e| e.sequence);
        page.truncate(limit);
        if !page.is_empty() {
            state.pages_served += 1;
        }
        Ok(page)
    }

    fn find_item_by_guid(&self, guid: &str) -> Result<Option<CaseItem>> {
        Ok(self.state.borrow().items.get(guid).map(|g| CaseItem {
            guid: g.clone(),
        }))
    }

    fn current_tags(&self) -> Result<Vec<MembershipState>> {
        let state = self.state.borrow();
        let mut by_tag: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (guid, tags) in &state.tags {
            for tag in tags {
                by_tag.entry(tag.clone()).or_default().push(guid.clone());
            }
        }
        Ok(by_tag
            .into_iter()
            .map(|(name, item_guids)| MembershipState { name, item_guids })
            .collect())
    }

    fn current_custodians(&self) -> Result<Vec<MembershipState>> {
        let state = self.state.borrow();
        let mut by_name: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (guid, custodian) in &state.custodians {
            by_name.entry(custodian.clone()).or_default().push(guid.clone());
        }
        Ok(by_name
            .into_iter()
            .map(|(name, item_guids)| MembershipState { name, item_guids })
            .collect())
    }

    fn current_exclusions(&self) -> Result<Vec<MembershipState>> {
        let state = self.state.borrow();
        let mut by_name: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (guid, exclusion) in &state.exclusions {
            by_name.entry(exclusion.clone()).or_default().push(guid.clone());
        }
        Ok(by_name
            .into_iter()
            .map(|(name, item_guids)| MembershipState { name, item_guids })
            .collect())
    }

    fn current_item_sets(&self) -> Result<Vec<ItemSetState>> {
        let state = self.state.borrow();
        Ok(state
            .item_sets
            .iter()
            .map(|(name, set)| ItemSetState {
                name: name.clone(),
                description: set.description.clone(),
                settings_json: set.settings_json.clone(),
                item_guids: set.members.iter().cloned().collect(),
            })
            .collect())
    }

    fn current_production_sets(&self) -> Result<Vec<ProductionSetState>> {
        let state = self.state.borrow();
        Ok(state
            .production_sets
            .iter()
            .map(|(name, set)| ProductionSetState {
                name: name.clone(),
                settings_json: set.settings_json.clone(),
                item_guids: set.members.iter().cloned().collect(),
            })
            .collect())
    }

    fn current_custom_metadata(&self) -> Result<Vec<CustomMetadataState>> {
        let state = self.state.borrow();
        Ok(state
            .metadata
            .iter()
            .map(|((guid, field), value)| CustomMetadataState {
                item_guid: guid.clone(),
                field_name: field.clone(),
                value: value.clone(),
            })
            .collect())
    }

    fn add_tag(&self, guid: &str, tag: &str) -> Result<()> {
        self.tag_item(guid, tag);
        Ok(())
    }

    fn remove_tag(&self, guid: &str, tag: &str) -> Result<()> {
        if let Some(tags) = self.state.borrow_mut().tags.get_mut(guid) {
            tags.remove(tag);
        }
        Ok(())
    }

    fn put_custom_metadata(&self, guid: &str, field: &str, value: &MetadataValue) -> Result<()> {
        self.state
            .borrow_mut()
            .metadata
            .insert((guid.to_string(), field.to_string()), value.clone());
        Ok(())
    }

    fn remove_custom_metadata(&self, guid: &str, field: &str) -> Result<()> {
        self.state
            .borrow_mut()
            .metadata
            .remove(&(guid.to_string(), field.to_string()));
        Ok(())
    }

    fn ensure_item_set(
        &self,
        name: &str,
        description: Option<&str>,
        settings_json: Option<&str>,
    ) -> Result<()> {
        self.state
            .borrow_mut()
            .item_sets
            .entry(name.to_string())
            .or_insert_with(|| SetState {
                description: description.map(str::to_string),
                settings_json: settings_json.map(str::to_string),
                members: BTreeSet::new(),
            });
        Ok(())
    }

    fn add_to_item_set(&self, set_name: &str, guid: &str, _batch: Option<&str>) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let set = state
            .item_sets
            .get_mut(set_name)
            .ok_or_else(|| SyncError::host(format!("no item set '{set_name}'")))?;
        set.members.insert(guid.to_string());
        Ok(())
    }

    fn remove_from_item_set(&self, set_name: &str, guid: &str) -> Result<()> {
        if let Some(set) = self.state.borrow_mut().item_sets.get_mut(set_name) {
            set.members.remove(guid);
        }
        Ok(())
    }

    fn set_exclusion(&self, guid: &str, exclusion: &str) -> Result<()> {
        self.state
            .borrow_mut()
            .exclusions
            .insert(guid.to_string(), exclusion.to_string());
        Ok(())
    }

    fn clear_exclusion(&self, guid: &str) -> Result<()> {
        self.state.borrow_mut().exclusions.remove(guid);
        Ok(())
    }

    fn assign_custodian(&self, guid: &str, custodian: &str) -> Result<()> {
        self.state
            .borrow_mut()
            .custodians
            .insert(guid.to_string(), custodian.to_string());
        Ok(())
    }

    fn unassign_custodian(&self, guid: &str) -> Result<()> {
        self.state.borrow_mut().custodians.remove(guid);
        Ok(())
    }

    fn ensure_production_set(&self, name: &str, settings_json: Option<&str>) -> Result<()> {
        self.state
            .borrow_mut()
            .production_sets
            .entry(name.to_string())
            .or_insert_with(|| SetState {
                description: None,
                settings_json: settings_json.map(str::to_string),
                members: BTreeSet::new(),
            });
        Ok(())
    }

    fn add_to_production_set(&self, set_name: &str, guid: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let set = state
            .production_sets
            .get_mut(set_name)
            .ok_or_else(|| SyncError::host(format!("no production set '{set_name}'")))?;
        set.members.insert(guid.to_string());
        Ok(())
    }

    fn remove_from_production_set(&self, set_name: &str, guid: &str) -> Result<()> {
        if let Some(set) = self.state.borrow_mut().production_sets.get_mut(set_name) {
            set.members.remove(guid);
        }
        Ok(())
    }
}
