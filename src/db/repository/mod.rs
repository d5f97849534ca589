//! Repository layer: entity-scoped database operations.
//!
//! Plain functions over a borrowed `Connection`. The caller owns locking
//! and decides visibility; conditional writes report whether they matched.

mod audit;
mod dispute;
mod record;
mod user;

pub use audit::*;
pub use dispute::*;
pub use record::*;
pub use user::*;
