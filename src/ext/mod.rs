//! Extensions of third-party crates.

pub mod broadcast;
pub mod mpsc;
