//! Collaborators of the store: the raw collector catalog and preprocessing.

pub mod catalog;
pub mod derive;
