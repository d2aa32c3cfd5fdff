//! Queue transport implementations.
//!
//! This module contains concrete implementations of the `QueueTransport` and
//! `QueueResolver` traits.

pub mod memory;

pub use memory::InMemoryTransport;
