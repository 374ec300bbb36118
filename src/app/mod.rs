pub mod identity;
pub mod incidents;
pub mod media;
pub mod notifications;
pub mod policy;
pub mod users;
