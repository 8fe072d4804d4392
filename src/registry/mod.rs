//! Connection and room registry
//!
//! In-memory bookkeeping of open connections, the rooms they joined and the
//! inverse index used to clean up on disconnect.

mod connection;
mod index;
mod snapshot;

pub use connection::*;
pub use index::*;
pub use snapshot::*;
