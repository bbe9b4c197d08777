/// Timelines — named step tables and the catalog they are loaded from.
use rustc_hash::FxHashMap;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::expr::evaluate_constant;

#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("timeline not found: {0}")]
    MissingSequence(String),
}

/// A step position in a timeline: finite and non-negative.
#[derive(Debug, Clone, Copy)]
pub struct StepKey(f64);

impl StepKey {
    pub fn new(value: f64) -> Option<Self> {
        // `+ 0.0` folds -0.0 into 0.0 so both land on the same key.
        (value.is_finite() && value >= 0.0).then_some(Self(value + 0.0))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl PartialEq for StepKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for StepKey {}

impl PartialOrd for StepKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StepKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named script: an ordered map from step key to a FIFO queue of
/// command lines. Keys whose queue empties are removed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timeline {
    name: String,
    steps: BTreeMap<StepKey, VecDeque<String>>,
}

impl Timeline {
    /// The unnamed, already-exhausted timeline.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            steps: BTreeMap::new(),
        }
    }

    /// Append commands at `step`. Invalid steps are ignored.
    pub fn with_step(mut self, step: f64, commands: &[&str]) -> Self {
        if let Some(key) = StepKey::new(step) {
            let queue = self.steps.entry(key).or_default();
            queue.extend(commands.iter().map(|c| c.to_string()));
            if queue.is_empty() {
                self.steps.remove(&key);
            }
        }
        self
    }

    /// Parse a timeline document.
    ///
    /// The document is a map from step key to a list of command lines.
    /// Keys may be numbers or strings holding a constant expression
    /// (`"10 + 2.5"`). Keys that do not evaluate to a finite,
    /// non-negative number are dropped; a repeated key replaces the
    /// earlier one.
    pub fn parse_ron(name: &str, input: &str) -> Result<Timeline, TimelineError> {
        let document: Document = ron::from_str(input)?;
        let mut timeline = Timeline::new(name);

        for (raw_key, commands) in document.0 {
            let Some(key) = raw_key.evaluate(name) else {
                continue;
            };
            if commands.is_empty() {
                timeline.steps.remove(&key);
                continue;
            }
            if timeline
                .steps
                .insert(key, commands.into_iter().collect())
                .is_some()
            {
                warn!(timeline = name, step = %key, "duplicate step key, later entry wins");
            }
        }

        Ok(timeline)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_named(&self) -> bool {
        !self.name.is_empty()
    }

    pub(crate) fn clear_name(&mut self) {
        self.name.clear();
    }

    /// True once every step has drained.
    pub fn is_exhausted(&self) -> bool {
        self.steps.is_empty()
    }

    /// Number of step keys still holding commands.
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn command_count(&self) -> usize {
        self.steps.values().map(VecDeque::len).sum()
    }

    /// Steps in ascending order.
    pub fn steps(&self) -> impl Iterator<Item = (f64, &VecDeque<String>)> {
        self.steps.iter().map(|(key, queue)| (key.value(), queue))
    }

    /// The earliest step that is due at `position`.
    pub fn first_due(&self, position: f64) -> Option<StepKey> {
        self.steps
            .keys()
            .next()
            .copied()
            .filter(|key| key.value() <= position)
    }

    /// Pop the next command at `key`, dropping the key once empty.
    pub fn pop_front(&mut self, key: StepKey) -> Option<String> {
        let queue = self.steps.get_mut(&key)?;
        let command = queue.pop_front();
        if queue.is_empty() {
            self.steps.remove(&key);
        }
        command
    }

    /// Remove and return whatever remains at `key`.
    pub fn take_step(&mut self, key: StepKey) -> VecDeque<String> {
        self.steps.remove(&key).unwrap_or_default()
    }

    /// Discard every step strictly before `target`. Returns the number of
    /// commands dropped.
    pub fn discard_before(&mut self, target: f64) -> usize {
        let Some(bound) = StepKey::new(target) else {
            return 0;
        };
        let kept = self.steps.split_off(&bound);
        let dropped = std::mem::replace(&mut self.steps, kept);
        dropped.values().map(VecDeque::len).sum()
    }
}

/// Step key as written in a document.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawKey {
    Int(i64),
    Float(f64),
    Text(String),
}

impl RawKey {
    fn evaluate(&self, timeline: &str) -> Option<StepKey> {
        let value = match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Text(text) => match evaluate_constant(text) {
                Ok(value) => value.as_f64(),
                Err(e) => {
                    warn!(timeline, key = %text, error = %e, "step key failed to evaluate, dropped");
                    return None;
                }
            },
        };
        let key = value.and_then(StepKey::new);
        if key.is_none() {
            warn!(timeline, key = ?self, "step key is not a non-negative number, dropped");
        }
        key
    }
}

/// Document entries in source order, so later duplicates can win.
struct Document(Vec<(RawKey, Vec<String>)>);

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DocumentVisitor;

        impl<'de> Visitor<'de> for DocumentVisitor {
            type Value = Document;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map from step key to a list of commands")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Document, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry()? {
                    entries.push(entry);
                }
                Ok(Document(entries))
            }
        }

        deserializer.deserialize_map(DocumentVisitor)
    }
}

/// Where timelines come from: a content directory and/or documents
/// registered in memory. In-memory documents shadow files of the same
/// name.
#[derive(Debug, Clone, Default)]
pub struct TimelineCatalog {
    dir: Option<PathBuf>,
    documents: FxHashMap<String, String>,
}

impl TimelineCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            documents: FxHashMap::default(),
        }
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Register a document in memory (for testing without files).
    pub fn with_document(mut self, name: &str, text: &str) -> Self {
        self.insert_document(name, text);
        self
    }

    pub fn insert_document(&mut self, name: &str, text: &str) {
        self.documents.insert(name.to_string(), text.to_string());
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// `<dir>/<name>.ron`, falling back to `<dir>/<name>`.
    fn path_for(&self, name: &str) -> Option<PathBuf> {
        let dir = self.dir.as_ref()?;
        let plain = Path::new(name)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if name.is_empty() || !plain {
            return None;
        }
        let with_ext = dir.join(format!("{}.ron", name));
        if with_ext.is_file() {
            return Some(with_ext);
        }
        let bare = dir.join(name);
        bare.is_file().then_some(bare)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.documents.contains_key(name) || self.path_for(name).is_some()
    }

    /// Load `name`, surfacing read and parse failures. `Ok(None)` when no
    /// source has it.
    pub fn try_load(&self, name: &str) -> Result<Option<Timeline>, TimelineError> {
        if let Some(text) = self.documents.get(name) {
            return Timeline::parse_ron(name, text).map(Some);
        }
        let Some(path) = self.path_for(name) else {
            return Ok(None);
        };
        debug!(timeline = name, path = %path.display(), "reading timeline");
        let contents = std::fs::read_to_string(&path)?;
        Timeline::parse_ron(name, &contents).map(Some)
    }

    /// Load `name`, or fail with `MissingSequence`.
    pub fn require(&self, name: &str) -> Result<Timeline, TimelineError> {
        self.try_load(name)?
            .ok_or_else(|| TimelineError::MissingSequence(name.to_string()))
    }

    /// Load `name`; anything that goes wrong yields the empty timeline.
    pub fn load(&self, name: &str) -> Timeline {
        if name.is_empty() {
            return Timeline::empty();
        }
        match self.try_load(name) {
            Ok(Some(timeline)) => timeline,
            Ok(None) => {
                warn!(timeline = name, "timeline not found, running empty");
                Timeline::empty()
            }
            Err(e) => {
                warn!(timeline = name, error = %e, "timeline failed to load, running empty");
                Timeline::empty()
            }
        }
    }

    /// Every loadable name, sorted.
    pub fn names(&self) -> Result<Vec<String>, TimelineError> {
        let mut names: Vec<String> = self.documents.keys().cloned().collect();
        if let Some(dir) = &self.dir {
            if dir.is_dir() {
                for entry in std::fs::read_dir(dir)? {
                    let path = entry?.path();
                    if !path.is_file() {
                        continue;
                    }
                    let file_name = path.file_name().and_then(|s| s.to_str());
                    let name = match path.extension().and_then(|s| s.to_str()) {
                        Some("ron") => path.file_stem().and_then(|s| s.to_str()),
                        None => file_name,
                        Some(_) => None,
                    };
                    if let Some(name) = name.filter(|n| !n.starts_with('.')) {
                        names.push(name.to_string());
                    }
                }
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }
}
