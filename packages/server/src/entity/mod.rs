pub mod deferred_upload;
pub mod file_index;
pub mod master_version;
pub mod sharing_group;
pub mod sharing_group_user;
pub mod sharing_invitation;
pub mod short_lock;
pub mod upload;
pub mod user;
