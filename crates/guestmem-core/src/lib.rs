//! Core guest memory types.
//!
//! This crate holds the vocabulary shared by the translation and
//! verification crates: address newtypes, access kinds and protection
//! flags, mask based bit-field helpers and the [`GuestMemory`] trait through
//! which guest physical memory is accessed.

pub mod bits;
mod core;
mod error;
mod memory;

pub use self::{
    core::{AccessKind, Ea, Protection, Ra},
    error::MemoryError,
    memory::{FlatMemory, GuestMemory},
};
