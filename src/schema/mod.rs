pub mod command;
pub mod host;
pub mod save;
pub mod value;
