//! Linked hubs: the per-hub collaborators (certificate authority and OAuth token cache) an
//! enrollment group provisions its devices against.

pub mod cache;
pub mod linked;

pub use cache::*;
pub use linked::*;
