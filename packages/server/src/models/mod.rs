pub mod deferred;
pub mod shared;
pub mod sharing;
pub mod upload;
