//! Tag index: tag name to the set of cache keys carrying it.
//!
//! Each tag is an ordinary store entry at [`TAG_PREFIX`]` + tag` whose value
//! is the JSON array of its member keys. Records never expire and are
//! removed as soon as their member set becomes empty.
//!
//! # Consistency
//!
//! The store has no transactions, so every update is read-modify-write:
//! load the record, change the set, write it back in one batch. Two
//! writers touching the same tag concurrently can both read the old set and
//! the later write wins, dropping the other's change. Tag membership is an
//! index over the cached data, not the data itself, and is treated as
//! best-effort and eventually consistent. There is no client-side locking.
//!
//! Every load and batch write goes through the [`Guard`] on its own. A tag
//! whose record cannot be loaded is left untouched for that call.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use tracing::debug;

use crate::backend::{StoreResult, StoreSession};
use crate::constants::TAG_PREFIX;
use crate::error::{Error, Operation, StoreError};
use crate::guard::Guard;

/// Store key of the index record for `tag`.
pub fn record_key(tag: &str) -> String {
    format!("{TAG_PREFIX}{tag}")
}

fn encode(members: &BTreeSet<String>) -> Vec<u8> {
    // a set of strings always serializes
    serde_json::to_vec(members).unwrap_or_default()
}

fn decode(record_key: &str, raw: &[u8]) -> StoreResult<BTreeSet<String>> {
    serde_json::from_slice(raw).map_err(|e| StoreError::malformed(record_key, e.to_string()))
}

/// A loaded tag record and what happened to it during one call.
struct TagRecord {
    members: BTreeSet<String>,
    existed: bool,
    changed: bool,
}

/// Tag maintenance over one session, for the duration of one call.
pub struct TagIndex<'a> {
    session: &'a dyn StoreSession,
    guard: &'a Guard,
}

impl<'a> TagIndex<'a> {
    pub fn new(session: &'a dyn StoreSession, guard: &'a Guard) -> Self {
        Self { session, guard }
    }

    /// Load the record at `record_key`.
    ///
    /// `None` when the backend call failed. A malformed record is reported
    /// and read as empty so the next write repairs it.
    fn load(&self, record_key: &str) -> Option<TagRecord> {
        let raw = self.guard.call(Operation::Get, None, || {
            self.session.get(record_key).map(Some)
        })?;

        let Some(raw) = raw else {
            return Some(TagRecord {
                members: BTreeSet::new(),
                existed: false,
                changed: false,
            });
        };

        let members = match decode(record_key, &raw) {
            Ok(members) => members,
            Err(source) => {
                self.guard.fault(Error::operation(Operation::TagDecode, source));
                BTreeSet::new()
            },
        };
        Some(TagRecord {
            members,
            existed: true,
            changed: false,
        })
    }

    /// Load every distinct record for `tags`, keyed by record key.
    fn load_all<'t>(&self, tags: impl IntoIterator<Item = &'t String>) -> BTreeMap<String, TagRecord> {
        let mut records = BTreeMap::new();
        let mut failed = HashSet::new();
        for tag in tags {
            let key = record_key(tag);
            if records.contains_key(&key) || failed.contains(&key) {
                continue;
            }
            match self.load(&key) {
                Some(record) => {
                    records.insert(key, record);
                },
                None => {
                    failed.insert(key);
                },
            }
        }
        records
    }

    /// Add every key in `keys` to every tag in `tags`.
    ///
    /// Only records that actually changed are written back, in one batch.
    /// Returns false if that write failed.
    pub fn attach(&self, keys: &[String], tags: &[String]) -> bool {
        if tags.is_empty() || keys.is_empty() {
            return true;
        }

        let mut records = self.load_all(tags);
        for record in records.values_mut() {
            for key in keys {
                if record.members.insert(key.clone()) {
                    record.changed = true;
                }
            }
        }

        let updates: HashMap<String, Vec<u8>> = records
            .iter()
            .filter(|(_, record)| record.changed)
            .map(|(key, record)| (key.clone(), encode(&record.members)))
            .collect();
        if updates.is_empty() {
            return true;
        }

        debug!(tags = updates.len(), keys = keys.len(), "writing tag records");
        self.guard.call(Operation::MultiSet, false, || {
            self.session.multi_set(updates, None).map(|()| true)
        })
    }

    /// Remove each key from the tags listed for it.
    ///
    /// Records left with members are rewritten in one batch; records left
    /// empty are deleted in another. Returns false if either batch failed.
    pub fn detach(&self, key_tags: &HashMap<String, Vec<String>>) -> bool {
        let mut records = self.load_all(key_tags.values().flatten());
        for (key, tags) in key_tags {
            for tag in tags {
                if let Some(record) = records.get_mut(&record_key(tag))
                    && record.members.remove(key)
                {
                    record.changed = true;
                }
            }
        }

        let mut updates = HashMap::new();
        let mut removals = Vec::new();
        for (key, record) in records {
            if record.members.is_empty() {
                if record.existed {
                    removals.push(key);
                }
            } else if record.changed {
                updates.insert(key, encode(&record.members));
            }
        }

        let mut ok = true;
        if !updates.is_empty() {
            ok &= self.guard.call(Operation::MultiSet, false, || {
                self.session.multi_set(updates, None).map(|()| true)
            });
        }
        if !removals.is_empty() {
            debug!(tags = removals.len(), "removing empty tag records");
            ok &= self.guard.call(Operation::MultiDelete, false, || {
                self.session.multi_delete(&removals).map(|_| true)
            });
        }
        ok
    }

    /// Keys to delete when invalidating `tags`.
    ///
    /// Each tag's own record key is included whether or not it exists,
    /// followed by its member keys. A tag whose record could not be read
    /// contributes nothing, so its index survives to be invalidated later.
    /// Duplicates are dropped, first occurrence wins. Nothing is deleted
    /// here: the caller removes data and index records together in one
    /// batch.
    pub fn resolve_for_deletion(&self, tags: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for tag in tags {
            let key = record_key(tag);
            let Some(record) = self.load(&key) else {
                continue;
            };
            if seen.insert(key.clone()) {
                keys.push(key);
            }
            for member in record.members {
                if seen.insert(member.clone()) {
                    keys.push(member);
                }
            }
        }
        keys
    }

    /// Current members of `tag`, empty if the record is missing or could not
    /// be loaded.
    pub fn members(&self, tag: &str) -> BTreeSet<String> {
        self.load(&record_key(tag))
            .map(|record| record.members)
            .unwrap_or_default()
    }
}
