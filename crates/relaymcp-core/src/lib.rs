//! Core types for relaymcp.
//!
//! This crate provides the fundamental building blocks shared by every other
//! crate in the workspace:
//! - [`McpError`] / [`McpResult`] and the JSON-RPC error code table
//! - Logging targets on top of the `log` facade
//! - [`Items`], the per-message side channel filters use to pass data along
//! - [`Services`], the frozen type-keyed service registry
//!
//! # Design Principles
//!
//! - No runtime reflection
//! - All types are `Send + Sync`
//! - Shared state is exposed through narrow operations, never raw fields

#![forbid(unsafe_code)]

mod error;
mod items;
pub mod logging;
mod services;

pub use error::{McpError, McpErrorCode, McpResult};
pub use items::Items;
pub use services::{Services, ServicesBuilder};
