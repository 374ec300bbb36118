pub mod incident;
pub mod notification;
pub mod user;
