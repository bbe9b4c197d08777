/// The collaborator surface a game host exposes to the sequencer.
use thiserror::Error;

use super::value::Value;
use crate::core::registry::EntityHandle;
use crate::core::sequencer::SequencerError;

/// Returned by a host that refuses an attribute write.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HostError {
    #[error("unknown attribute '{0}'")]
    UnknownAttribute(String),
    #[error("attribute '{attr}' expects {expected}, got {found}")]
    TypeMismatch {
        attr: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("attribute '{0}' is read-only")]
    ReadOnly(String),
}

/// Anything a timeline can read, write and call into: the level itself
/// and every registered dynamic entity.
pub trait Scriptable {
    fn attribute(&self, name: &str) -> Option<Value>;

    fn set_attribute(&mut self, name: &str, value: Value) -> Result<(), HostError>;

    /// Call a method by name. `None` means the method does not exist.
    fn call(&mut self, method: &str, args: &[Value]) -> Option<Value>;
}

/// The room/level controller driving a `Sequencer`.
///
/// Dialog, music and error reporting are fire-and-forget requests; the
/// sequencer never waits on them.
pub trait Host {
    fn level(&self) -> &dyn Scriptable;

    fn level_mut(&mut self) -> &mut dyn Scriptable;

    /// Resolve a handle to a live entity. Stale handles must return `None`.
    fn entity(&self, handle: EntityHandle) -> Option<&dyn Scriptable>;

    fn entity_mut(&mut self, handle: EntityHandle) -> Option<&mut dyn Scriptable>;

    fn show_dialog(&mut self, portrait: Option<&str>, text: &str);

    fn play_music(&mut self, track: &str);

    fn report_error(&mut self, error: &SequencerError);
}
