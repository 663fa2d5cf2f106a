//! Per-Level Containers
//!
//! Ancestor distances ("levels") index everything in this system: a node's
//! ancestor chain and the denormalized descendant records cached on each
//! ancestor are both keyed by level. Level 1 is the direct parent; level k is
//! the ancestor k hops up.
//!
//! The containers here are slot-indexed (slot 0 permanently unused) rather
//! than string-keyed maps, so level arithmetic stays integer arithmetic and
//! an out-of-range level cannot alias a valid one. The persisted document
//! shape is still the sparse string-keyed map (`"1"`, `"2"`, ...); that
//! conversion lives entirely at the serde boundary.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::Error as DeError;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Distance from a node to one of its ancestors.
///
/// Always at least 1 (the direct parent). Level 0 does not exist; the
/// constructor rejects it.
///
/// # Examples
///
/// ```rust
/// use reftree_core::models::Level;
///
/// let grandparent = Level::new(2).unwrap();
/// assert_eq!(grandparent.get(), 2);
/// assert!(Level::new(0).is_none());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Level(u8);

impl Level {
    /// The direct parent, one hop up.
    pub const DIRECT_PARENT: Level = Level(1);

    /// Create a level from a raw distance. Returns `None` for 0.
    pub fn new(distance: u8) -> Option<Level> {
        if distance == 0 {
            None
        } else {
            Some(Level(distance))
        }
    }

    /// The raw distance.
    pub fn get(self) -> u8 {
        self.0
    }

    /// Slot index backing this level in the per-level containers.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// The level one hop closer to the node, if any.
    ///
    /// Used when deriving a child's ancestor chain from its parent's: the
    /// parent's level-(k-1) ancestor is the child's level-k ancestor.
    pub fn shallower(self) -> Option<Level> {
        Level::new(self.0 - 1)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A denormalized descendant record cached on an ancestor document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildEntry {
    /// Identifier of the descendant node.
    pub id: String,
    /// Copy of the descendant's payload at the time of the last fan-out.
    pub payload: String,
}

impl ChildEntry {
    pub fn new(id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
        }
    }
}

/// A node's ancestor chain, indexed by level.
///
/// Write-once: populated when the node is created, never mutated afterwards.
/// Roots have an empty chain. Entries are contiguous from level 1 up to
/// min(depth of the node, configured maximum), but the container itself does
/// not enforce the bound; the service deriving the chain does.
///
/// Serializes as a sparse string-keyed map (`{"1": "parent-id", ...}`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Ancestors {
    slots: Vec<Option<String>>,
}

impl Ancestors {
    /// An empty chain (root node).
    pub fn empty() -> Self {
        Self::default()
    }

    /// The ancestor id at the given level, if present.
    pub fn at(&self, level: Level) -> Option<&str> {
        self.slots.get(level.index()).and_then(|slot| slot.as_deref())
    }

    /// Record an ancestor at the given level, growing the slots as needed.
    pub fn set(&mut self, level: Level, id: impl Into<String>) {
        let index = level.index();
        if self.slots.len() <= index {
            self.slots.resize(index + 1, None);
        }
        self.slots[index] = Some(id.into());
    }

    /// Number of levels with an ancestor recorded.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// `true` when no ancestor is recorded at any level.
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Iterate over `(level, ancestor id)` pairs in ascending level order.
    pub fn iter(&self) -> impl Iterator<Item = (Level, &str)> {
        self.slots
            .iter()
            .enumerate()
            .skip(1)
            .filter_map(|(index, slot)| slot.as_deref().map(|id| (Level(index as u8), id)))
    }
}

impl Serialize for Ancestors {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (level, id) in self.iter() {
            map.serialize_entry(&level.to_string(), id)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Ancestors {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
        let mut ancestors = Ancestors::empty();
        for (key, id) in raw {
            let level = parse_level_key::<D::Error>(&key)?;
            ancestors.set(level, id);
        }
        Ok(ancestors)
    }
}

/// Denormalized descendant records, one append-ordered sequence per level.
///
/// Grows and shrinks only through fan-out from descendant operations; a
/// node's own operations never edit its own sequences. Sequences are
/// append-ordered and logically unique by descendant id (the store does not
/// deduplicate).
///
/// Serializes as a sparse string-keyed map of sequences; empty levels are
/// omitted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Children {
    slots: Vec<Vec<ChildEntry>>,
}

impl Children {
    /// No descendants recorded at any level.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The sequence at the given level; empty slice when the level is absent.
    pub fn at(&self, level: Level) -> &[ChildEntry] {
        self.slots
            .get(level.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Append an entry to the sequence at the given level.
    pub fn push(&mut self, level: Level, entry: ChildEntry) {
        let index = level.index();
        if self.slots.len() <= index {
            self.slots.resize_with(index + 1, Vec::new);
        }
        self.slots[index].push(entry);
    }

    /// Overwrite the payload of the entry matching `child_id` at `level`.
    ///
    /// Returns `false` when no matching entry exists (the sequence is left
    /// untouched).
    pub fn set_payload(&mut self, level: Level, child_id: &str, payload: &str) -> bool {
        match self
            .slots
            .get_mut(level.index())
            .and_then(|entries| entries.iter_mut().find(|entry| entry.id == child_id))
        {
            Some(entry) => {
                entry.payload = payload.to_string();
                true
            }
            None => false,
        }
    }

    /// Remove exactly the entry matching `child_id` at `level`.
    ///
    /// Other entries at the same level are not disturbed. Returns `false`
    /// when no matching entry exists.
    pub fn remove(&mut self, level: Level, child_id: &str) -> bool {
        match self.slots.get_mut(level.index()) {
            Some(entries) => match entries.iter().position(|entry| entry.id == child_id) {
                Some(position) => {
                    entries.remove(position);
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    /// `true` when every level is empty.
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Vec::is_empty)
    }

    /// Iterate over `(level, sequence)` pairs for non-empty levels.
    pub fn iter(&self) -> impl Iterator<Item = (Level, &[ChildEntry])> {
        self.slots
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(index, entries)| (Level(index as u8), entries.as_slice()))
    }
}

impl Serialize for Children {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.iter().count()))?;
        for (level, entries) in self.iter() {
            map.serialize_entry(&level.to_string(), entries)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Children {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, Vec<ChildEntry>>::deserialize(deserializer)?;
        let mut children = Children::empty();
        for (key, entries) in raw {
            let level = parse_level_key::<D::Error>(&key)?;
            for entry in entries {
                children.push(level, entry);
            }
        }
        Ok(children)
    }
}

fn parse_level_key<E: DeError>(key: &str) -> Result<Level, E> {
    let distance: u8 = key
        .parse()
        .map_err(|_| E::custom(format!("invalid level key: {:?}", key)))?;
    Level::new(distance).ok_or_else(|| E::custom("level keys start at 1"))
}
