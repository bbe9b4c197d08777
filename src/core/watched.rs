/// Watched memory — which named timelines have fully played in this save.
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Append-only set of timeline names that have been watched.
///
/// Storage is copy-on-write: `snapshot()` is cheap, and a mark made after
/// a snapshot replaces the shared set with a private copy instead of
/// mutating what the snapshot sees.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct WatchedSet {
    names: Arc<FxHashSet<String>>,
}

impl WatchedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `name` as watched. Returns true if it was not watched before.
    /// Empty names are ignored.
    pub fn mark(&mut self, name: &str) -> bool {
        if name.is_empty() || self.names.contains(name) {
            return false;
        }
        Arc::make_mut(&mut self.names).insert(name.to_string());
        info!(timeline = name, "timeline marked watched");
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// An independent copy for save slots and branching previews.
    pub fn snapshot(&self) -> WatchedSet {
        self.clone()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

impl PartialEq for WatchedSet {
    fn eq(&self, other: &Self) -> bool {
        self.names == other.names
    }
}

impl Eq for WatchedSet {}

impl From<Vec<String>> for WatchedSet {
    fn from(names: Vec<String>) -> Self {
        Self {
            names: Arc::new(names.into_iter().filter(|n| !n.is_empty()).collect()),
        }
    }
}

impl From<WatchedSet> for Vec<String> {
    fn from(set: WatchedSet) -> Self {
        let mut names: Vec<String> = set.names.iter().cloned().collect();
        names.sort();
        names
    }
}

impl<S: Into<String>> FromIterator<S> for WatchedSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::from(iter.into_iter().map(Into::into).collect::<Vec<String>>())
    }
}
