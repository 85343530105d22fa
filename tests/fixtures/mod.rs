//! Reusable multi-peer setups.

mod two_node;

pub use two_node::{TwoNodeFixture, next_event, wait_for_state};
