//! Integration tests for movers-bot.
//!
//! These tests verify the interaction between components:
//! - Ticker stream lifecycle against a local venue mock
//! - Scan loop driving live feeds end to end

pub mod common;
