//! Concurrency layer for TesseraDB
//!
//! This crate provides the ordering primitive the engine is built on:
//! - [`SerialQueue`]: an async FIFO that runs one job at a time, optionally
//!   starting frozen until a dependency becomes ready
//!
//! Every transaction owns one queue, every open domain owns one (frozen until
//! its snapshot root is resolved), and the database owns one that serializes
//! all master reads and merges.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod queue;

pub use queue::SerialQueue;
