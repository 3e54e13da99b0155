// tests/property/mod.rs

//! Property-based tests for the hash-range and interval-tree invariants.

mod hashrange_test;
mod interval_tree_test;
