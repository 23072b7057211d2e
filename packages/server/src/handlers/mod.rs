pub mod deferred;
pub mod invitation;
pub mod sharing;
pub mod upload;
