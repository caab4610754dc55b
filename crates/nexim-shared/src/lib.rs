pub mod actor;
pub mod conv;
pub mod errcode;
pub mod platform;
pub mod proto;
