//! Set-membership reconciliation for a single live collection.
//!
//! The engine never compares field content: two items are the same entity
//! iff their ids match. A patch is always "removals, then insertions" so the
//! renderer can drop rows first and append new ones at the tail without
//! touching the rows in between.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Which live collection an item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Alert,
    Mail,
}

impl ItemKind {
    /// Every polled kind, in tick order.
    pub const ALL: [ItemKind; 2] = [ItemKind::Alert, ItemKind::Mail];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Alert => "alert",
            Self::Mail => "mail",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "alert" | "alerts" | "notification" | "notifications" => Some(Self::Alert),
            "mail" | "email" | "inbox" => Some(Self::Mail),
            _ => None,
        }
    }

    /// Placeholder text shown when the collection is empty.
    #[must_use]
    pub fn empty_message(self) -> &'static str {
        match self {
            Self::Alert => "No new alerts.",
            Self::Mail => "No new mail.",
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of a live collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListItem {
    pub id: String,
    pub kind: ItemKind,
    #[serde(default)]
    pub display_fields: BTreeMap<String, String>,
}

impl ListItem {
    pub fn new(kind: ItemKind, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            display_fields: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.display_fields.insert(key.into(), value.into());
        self
    }
}

/// Ordered add/remove patch for one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    /// Ids to drop from the panel.
    pub removals: Vec<String>,
    /// Items to append, in source order.
    pub insertions: Vec<ListItem>,
}

impl Patch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.insertions.is_empty()
    }
}

/// Compute the patch that turns `current` into the membership of `incoming`.
///
/// Duplicate ids in `incoming` are collapsed to their first occurrence.
pub fn diff(current: &[ListItem], incoming: &[ListItem]) -> Patch {
    let incoming_ids: HashSet<&str> = incoming.iter().map(|item| item.id.as_str()).collect();
    let current_ids: HashSet<&str> = current.iter().map(|item| item.id.as_str()).collect();

    let removals = current
        .iter()
        .filter(|item| !incoming_ids.contains(item.id.as_str()))
        .map(|item| item.id.clone())
        .collect();

    let mut seen = HashSet::new();
    let insertions = incoming
        .iter()
        .filter(|item| !current_ids.contains(item.id.as_str()))
        .filter(|item| seen.insert(item.id.as_str()))
        .cloned()
        .collect();

    Patch {
        removals,
        insertions,
    }
}

/// Badge / indicator visibility for a panel.
#[must_use]
pub fn badge_visible(incoming_len: usize, panel_open: bool) -> bool {
    incoming_len > 0 && !panel_open
}

/// Per-row state owned by the panel, kept across reconciles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interaction {
    /// A context menu is open on the row.
    ContextMenu,
    /// The row is expanded to show its detail.
    Expanded,
}

/// The rows currently rendered for one kind.
#[derive(Debug, Clone)]
pub struct DisplayedCollection {
    kind: ItemKind,
    items: Vec<ListItem>,
    interactions: HashMap<String, Interaction>,
    dirty: bool,
}

impl DisplayedCollection {
    pub fn new(kind: ItemKind) -> Self {
        Self {
            kind,
            items: Vec::new(),
            interactions: HashMap::new(),
            dirty: false,
        }
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    pub fn items(&self) -> &[ListItem] {
        &self.items
    }

    pub fn ids(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|item| item.id == id)
    }

    /// True between a local mutation and the next successfully applied patch.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn interaction(&self, id: &str) -> Option<Interaction> {
        self.interactions.get(id).copied()
    }

    /// Attach interaction state to a displayed row. Returns `false` for unknown ids.
    pub fn set_interaction(&mut self, id: &str, interaction: Option<Interaction>) -> bool {
        if !self.contains(id) {
            return false;
        }
        match interaction {
            Some(value) => {
                self.interactions.insert(id.to_owned(), value);
            }
            None => {
                self.interactions.remove(id);
            }
        }
        true
    }

    fn apply(&mut self, patch: &Patch) {
        if !patch.removals.is_empty() {
            let removed: HashSet<&str> = patch.removals.iter().map(String::as_str).collect();
            self.items.retain(|item| !removed.contains(item.id.as_str()));
            self.interactions
                .retain(|id, _| !removed.contains(id.as_str()));
        }
        self.items.extend(patch.insertions.iter().cloned());
        self.dirty = false;
    }

    fn remove(&mut self, id: &str) -> Option<ListItem> {
        let index = self.items.iter().position(|item| item.id == id)?;
        self.interactions.remove(id);
        self.dirty = true;
        Some(self.items.remove(index))
    }
}

/// Owns the displayed collection for one kind and the ids the user dismissed.
#[derive(Debug, Clone)]
pub struct ReconciliationEngine {
    collection: DisplayedCollection,
    /// Ids removed locally that the source may still report.
    dismissed: HashSet<String>,
}

impl ReconciliationEngine {
    pub fn new(kind: ItemKind) -> Self {
        Self {
            collection: DisplayedCollection::new(kind),
            dismissed: HashSet::new(),
        }
    }

    pub fn kind(&self) -> ItemKind {
        self.collection.kind()
    }

    pub fn collection(&self) -> &DisplayedCollection {
        &self.collection
    }

    pub fn collection_mut(&mut self) -> &mut DisplayedCollection {
        &mut self.collection
    }

    /// Drop ids the user dismissed and ids of a foreign kind.
    ///
    /// A tombstone is released once the source stops reporting its id.
    pub fn filter_incoming(&mut self, incoming: Vec<ListItem>) -> Vec<ListItem> {
        let kind = self.kind();
        let reported: HashSet<&str> = incoming.iter().map(|item| item.id.as_str()).collect();
        self.dismissed.retain(|id| reported.contains(id.as_str()));

        incoming
            .into_iter()
            .filter(|item| item.kind == kind)
            .filter(|item| !self.dismissed.contains(&item.id))
            .collect()
    }

    /// Number of `incoming` items that would be shown, without touching state.
    pub fn count_visible(&self, incoming: &[ListItem]) -> usize {
        let kind = self.kind();
        incoming
            .iter()
            .filter(|item| item.kind == kind && !self.dismissed.contains(&item.id))
            .map(|item| item.id.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Apply a successful fetch and return the patch that was applied.
    pub fn reconcile(&mut self, incoming: Vec<ListItem>) -> Patch {
        let visible = self.filter_incoming(incoming);
        let patch = diff(self.collection.items(), &visible);
        if !patch.is_empty() {
            debug!(
                kind = %self.kind(),
                removed = patch.removals.len(),
                inserted = patch.insertions.len(),
                "reconciled live collection"
            );
        }
        self.collection.apply(&patch);
        patch
    }

    /// Optimistically remove an item. Returns the removed item, or `None`
    /// when the id is not displayed.
    pub fn dismiss(&mut self, id: &str) -> Option<ListItem> {
        let removed = self.collection.remove(id)?;
        self.dismissed.insert(id.to_owned());
        Some(removed)
    }

    pub fn is_dismissed(&self, id: &str) -> bool {
        self.dismissed.contains(id)
    }
}
