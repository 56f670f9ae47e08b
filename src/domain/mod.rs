//! Core domain types and logic.

pub mod config_validation;
pub mod error;
pub mod execution;
pub mod holding;
pub mod order;
pub mod portfolio;
pub mod query;
pub mod registration;
pub mod signal;
pub mod stats;
pub mod sweep;
pub mod valuation;
