//! Client-side conversation cache with optimistic updates.
//!
//! The sidebar list is kept as an ordered index keyed by conversation id:
//! `positions` maps an id to its sort key and `ordered` holds the records
//! by that key, so replacing or removing a record never scans the list.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Utc;

use parlance_shared::{Conversation, ConversationPatch, ConversationWithMessages};

/// The state of one conversation before an optimistic change.
///
/// Rolling back restores only that conversation, so mutations that
/// finished in the meantime stay applied.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheSnapshot {
    id: String,
    record: Option<(i64, Conversation)>,
    detail: Option<ConversationWithMessages>,
}

impl CacheSnapshot {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The list record as it was, `None` when it was not listed.
    pub fn record(&self) -> Option<&Conversation> {
        self.record.as_ref().map(|(_, record)| record)
    }
}

#[derive(Debug, Default)]
pub struct ConversationCache {
    positions: HashMap<String, i64>,
    ordered: BTreeMap<i64, Conversation>,
    details: HashMap<String, ConversationWithMessages>,
    /// Temporary ids whose create call has not answered yet.
    pending: HashSet<String>,
    front: i64,
    back: i64,
}

impl ConversationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self) -> Vec<Conversation> {
        self.ordered.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.positions.get(id).and_then(|key| self.ordered.get(key))
    }

    pub fn detail(&self, id: &str) -> Option<&ConversationWithMessages> {
        self.details.get(id)
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains(id)
    }

    /// Capture `id` as it is now.
    pub fn snapshot(&self, id: &str) -> CacheSnapshot {
        CacheSnapshot {
            id: id.to_string(),
            record: self
                .positions
                .get(id)
                .and_then(|key| self.ordered.get(key).map(|record| (*key, record.clone()))),
            detail: self.details.get(id).cloned(),
        }
    }

    /// Replace the list with the server's. Temporary records still waiting
    /// on their create call stay at the head.
    pub fn set_list(&mut self, conversations: Vec<Conversation>) {
        let pending: Vec<Conversation> = self
            .ordered
            .values()
            .filter(|c| self.pending.contains(&c.id))
            .cloned()
            .collect();

        self.positions.clear();
        self.ordered.clear();
        for conversation in pending.into_iter().chain(conversations) {
            let orphaned = conversation.is_temporary() && !self.pending.contains(&conversation.id);
            if orphaned || self.contains(&conversation.id) {
                continue;
            }
            self.push_back(conversation);
        }
    }

    /// Insert `record` at the head of the list. A temporary record counts
    /// as pending until `replace_temp` or `rollback` settles it.
    pub fn add_optimistic(&mut self, record: Conversation) -> CacheSnapshot {
        let snapshot = self.snapshot(&record.id);
        if record.is_temporary() {
            self.pending.insert(record.id.clone());
        }
        self.remove_entry(&record.id);
        self.push_front(record);
        snapshot
    }

    /// Swap the temporary record for the confirmed one in place. If the
    /// confirmed record is already listed (a refresh raced the create), the
    /// older copy is dropped so the id appears once.
    pub fn replace_temp(&mut self, temp_id: &str, record: Conversation) -> bool {
        self.pending.remove(temp_id);
        let Some(key) = self.positions.remove(temp_id) else {
            self.remove_entry(&record.id);
            self.push_front(record);
            return false;
        };

        self.ordered.remove(&key);
        self.remove_entry(&record.id);
        if let Some(mut detail) = self.details.remove(temp_id) {
            detail.conversation = record.clone();
            self.details.insert(record.id.clone(), detail);
        }
        self.positions.insert(record.id.clone(), key);
        self.ordered.insert(key, record);
        true
    }

    /// Put the snapshot's conversation back the way it was. Other
    /// conversations are left alone.
    pub fn rollback(&mut self, snapshot: CacheSnapshot) {
        let CacheSnapshot { id, record, detail } = snapshot;
        self.pending.remove(&id);
        self.remove_entry(&id);

        match record {
            Some((_, record)) if record.is_temporary() => {}
            Some((key, record)) if !self.ordered.contains_key(&key) => {
                self.positions.insert(id.clone(), key);
                self.ordered.insert(key, record);
            }
            Some((_, record)) => self.push_front(record),
            None => {}
        }

        match detail {
            Some(detail) => {
                self.details.insert(id, detail);
            }
            None => {
                self.details.remove(&id);
            }
        }
    }

    /// Seed an empty detail entry so opening a new conversation shows no
    /// loading state. An existing entry is left as is.
    pub fn precache_detail(&mut self, record: Conversation) {
        self.details
            .entry(record.id.clone())
            .or_insert_with(|| ConversationWithMessages::empty(record));
    }

    pub fn store_detail(&mut self, detail: ConversationWithMessages) {
        let id = detail.conversation.id.clone();
        if let Some(key) = self.positions.get(&id) {
            self.ordered.insert(*key, detail.conversation.clone());
        }
        self.details.insert(id, detail);
    }

    pub fn remove_optimistic(&mut self, id: &str) -> CacheSnapshot {
        let snapshot = self.snapshot(id);
        self.remove_entry(id);
        self.details.remove(id);
        snapshot
    }

    /// Apply `patch` to the list record and the detail entry. Returns the
    /// prior state when `id` was cached.
    pub fn update_optimistic(&mut self, id: &str, patch: &ConversationPatch) -> Option<CacheSnapshot> {
        if !self.contains(id) && !self.details.contains_key(id) {
            return None;
        }

        let snapshot = self.snapshot(id);
        self.modify(id, |conversation| {
            patch.apply_to(conversation);
            conversation.updated_at = Utc::now();
        });
        Some(snapshot)
    }

    /// Record a server-confirmed version of a conversation.
    pub fn upsert(&mut self, record: Conversation) {
        let id = record.id.clone();
        if let Some(detail) = self.details.get_mut(&id) {
            detail.conversation = record.clone();
        }
        match self.positions.get(&id) {
            Some(key) => {
                self.ordered.insert(*key, record);
            }
            None => self.push_front(record),
        }
    }

    pub fn apply_title(&mut self, id: &str, title: &str) {
        self.modify(id, |conversation| conversation.title = title.to_string());
    }

    fn modify(&mut self, id: &str, f: impl Fn(&mut Conversation)) {
        if let Some(conversation) = self
            .positions
            .get(id)
            .and_then(|key| self.ordered.get_mut(key))
        {
            f(conversation);
        }
        if let Some(detail) = self.details.get_mut(id) {
            f(&mut detail.conversation);
        }
    }

    fn remove_entry(&mut self, id: &str) {
        if let Some(key) = self.positions.remove(id) {
            self.ordered.remove(&key);
        }
    }

    // Keys are never handed out twice, so a rolled-back record can return
    // to its old slot.
    fn push_front(&mut self, record: Conversation) {
        self.front -= 1;
        self.positions.insert(record.id.clone(), self.front);
        self.ordered.insert(self.front, record);
    }

    fn push_back(&mut self, record: Conversation) {
        self.positions.insert(record.id.clone(), self.back);
        self.ordered.insert(self.back, record);
        self.back += 1;
    }
}
