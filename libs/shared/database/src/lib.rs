pub mod backend;

pub use backend::{is_timeout, ApiStatusError, BackendClient};
