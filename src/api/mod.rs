// REST backend client and user-facing notices

mod client;
mod notice;

pub use client::{ApiClient, ApiConfig, ApiError};
pub use notice::{Notice, Notices, Severity};
