pub mod error;
pub mod keys;
pub mod types;

pub use error::{CommonError, Result};
pub use keys::{chronological_key, zero_pad, KEY_WIDTH, MAX_RECORD_ID};
pub use types::*;
