//! Cutscene Engine — a scripted event sequencer for games.
//!
//! Drives in-level cutscenes and story progression from step-keyed
//! timelines: dialogue, music, attribute writes on the level and its
//! entities, branching on "already watched" memory and cutscene skips,
//! all paced by the simulation's own variable-rate clock.

pub mod core;
pub mod schema;
