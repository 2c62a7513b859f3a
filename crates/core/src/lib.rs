//! Core types for Tessera
//!
//! This crate defines the types every other layer builds on:
//! - [`Key`]: the ordered key model
//! - [`codec`]: order-preserving key encoding ([`BitSequence`])
//! - [`Value`]: document values, [`Stored`] node slots, [`ObjectRef`]
//! - [`Error`]: the shared error taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod key;
pub mod value;

pub use codec::BitSequence;
pub use error::{Conflict, Error, Result};
pub use key::Key;
pub use value::{ObjectRef, Stored, Value};
