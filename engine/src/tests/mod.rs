//! Integration tests for the scheduler daemon. Unit-level invariants live
//! inline next to the code they cover (`pool.rs`, `state.rs`, `database.rs`,
//! `messages.rs`, `context.rs`); the files here exercise properties that
//! span several modules, plus the end-to-end scenarios of §8.

mod harness;
mod pool_tests;
mod scenarios_tests;
mod state_tests;
