mod access;
mod address;
pub(crate) mod macros;

pub use self::{
    access::{AccessKind, Protection},
    address::{Ea, Ra},
};
