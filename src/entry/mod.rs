//! Entries: the articles published by feeds.

mod repository;
mod types;

pub use repository::EntryRepository;
pub use types::{Entry, EntryStatus, NewEntry};
