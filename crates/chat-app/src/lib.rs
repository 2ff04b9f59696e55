#![deny(unsafe_code)]

/// Terminal front end: bootstrap and the REPL loop.
pub mod app;
/// Session state machine and the types it hands out.
pub mod chat;
/// Settings persistence.
pub mod settings;
pub mod terminal;
