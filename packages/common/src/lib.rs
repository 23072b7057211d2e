pub mod account;
pub mod config;
pub mod deferred;
pub mod permission;
pub mod resolver;
pub mod retry;
pub mod storage;
pub mod upload_state;

pub use account::{AccountScheme, UserType};
pub use deferred::{DeferredErrorCode, DeferredUploadStatus};
pub use permission::Permission;
pub use upload_state::UploadState;
