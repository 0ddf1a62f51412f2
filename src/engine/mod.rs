//! # Engine Module
//!
//! Internal storage engine implementation.
//!
//! This module contains the core building blocks:
//! - Type registry and layout
//! - Chunks, archetypes and the entity directory
//! - Enable-bit batching
//! - Query matching, caching and execution
//! - Structural changes and chunk-level components
//!
//! Public API exposure is controlled by `lib.rs`.

pub mod types;
pub mod error;
pub mod config;
pub mod component;
pub mod entity;
pub mod layout;
pub mod chunk;
pub mod batch;
pub mod archetype;
pub mod shared;
pub mod query;
pub mod store;
pub mod structural;
pub mod meta;
pub mod iteration;
pub mod validate;
