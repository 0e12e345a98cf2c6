//! Integration Tests
//!
//! Cross-crate tests organized by concern:
//! - Store: round-trip, id allocation, hidden ids, no-op writes, fan-out
//! - Indices: consistency under mutation, multi-key, paging, repair
//! - Locking: reentrancy and contention between independent instances
//! - Scenario: the users and posts walkthrough end to end

#[path = "../common/mod.rs"]
mod common;

mod indices;
mod locking;
mod store;
