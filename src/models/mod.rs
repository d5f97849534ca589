pub mod audit;
pub mod dispute;
pub mod enums;
pub mod filters;
pub mod record;
pub mod user;

pub use audit::*;
pub use dispute::*;
pub use filters::*;
pub use record::*;
pub use user::*;
