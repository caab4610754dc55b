pub mod auth;
pub mod conversations;
pub mod groups;
pub mod messages;
pub mod users;
