//! Session process supervision: liveness tracking, startup recovery,
//! launching, and notification fan-out.

pub mod health_check;
pub mod launcher;
pub mod notifications;
pub mod probe;
pub mod process_tracker;
pub mod recovery;
pub mod workspace_manager;
