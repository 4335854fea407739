//! Auth-domain identifiers, owner mapping, scope sets, claims, and tokens.

pub mod claims;
pub mod id;
pub mod owner;
pub mod scope;
pub mod token;

pub use claims::*;
pub use id::*;
pub use owner::*;
pub use scope::*;
pub use token::*;
