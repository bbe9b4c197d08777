pub mod clock;
pub mod config;
pub mod expr;
pub mod registry;
pub mod sequencer;
pub mod timeline;
pub mod watched;
