//! # l2bridge-common
//!
//! Shared types for the l2bridge network driver.
//!
//! This crate provides functionality used across all l2bridge crates:
//! - The classified driver error type
//! - Option label keys understood by the driver
//! - Identifier helpers

#![warn(missing_docs)]

pub mod error;
pub mod id;
pub mod label;

pub use error::{DriverError, DriverResult, ErrorKind};
