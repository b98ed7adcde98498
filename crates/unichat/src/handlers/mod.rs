//! HTTP request handlers.

mod health;
mod index;
pub mod v1;
mod version;

pub use health::{livez, readyz};
pub use index::index;
pub use version::version;
