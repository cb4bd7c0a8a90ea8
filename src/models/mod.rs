//! Data models for intranet entities

mod user;

pub use user::*;
