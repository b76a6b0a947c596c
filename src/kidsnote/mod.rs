//! kidsnote API: child enumeration and the paginated, streaming album lister.

pub mod error;
pub mod lister;
pub mod models;
#[cfg(test)]
pub(crate) mod test_support;

pub use self::error::ApiError;
pub use self::lister::Lister;
pub use self::models::{Album, Child, ChildSelector, Image, Video};
