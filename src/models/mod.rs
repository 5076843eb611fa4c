//! Domain model module declarations.

pub mod notification;
pub mod session;
pub mod workspace;
