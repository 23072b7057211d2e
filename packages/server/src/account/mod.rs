//! Accounts and the cloud storage they own.

mod manager;
mod user;

pub use manager::{AccountError, AccountManager, StorageAccountManager, cloud_options};
pub use user::{NewUser, UserLookup, UserService};
