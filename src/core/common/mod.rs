pub mod error;
pub mod types;

pub use error::{MkAppError, MkAppResult};
pub use types::{ObjectId, PageId};
