//! Integration tests for the three reconciliation lanes, organized one
//! module per scenario family, against the hand-rolled fakes in
//! [`fakes`]. Mirrors the operator's own `src/test.rs` + `src/test/*.rs`
//! split — one fixture/util module shared by several scenario files.

pub mod fakes;

mod memberships;
