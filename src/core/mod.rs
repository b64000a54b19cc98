//! Core modules: the snapshot store and the primitives it is built from.

pub mod config;
pub mod db;
pub mod error;
pub mod integrity;
pub mod journal;
pub mod keys;
pub mod logging;
pub mod output;
pub mod schemas;
pub mod store;
pub mod table;
pub mod time;
