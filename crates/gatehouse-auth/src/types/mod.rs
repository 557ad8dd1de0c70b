//! Core domain types shared across the engine.

mod client;
mod directory;

pub use client::{Client, DeliveryMode, GrantType, SubjectType};
pub use directory::{ClientDirectory, DynClientDirectory, InMemoryClientDirectory};
