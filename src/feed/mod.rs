//! Feed subscriptions and their icons.

mod repository;
mod types;

pub use repository::{FeedRepository, IconRepository};
pub use types::{Feed, FeedCreationRequest, FeedModificationRequest, Icon};
