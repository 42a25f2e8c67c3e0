pub mod client;
pub mod error;
pub mod upload;

pub use client::{parse_current_session, ApiClient, Credentials};
pub use error::ApiError;
