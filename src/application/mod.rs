//! Application services layer.

pub mod admin;
pub mod collection;
pub mod error;
pub mod pagination;
pub mod repos;
