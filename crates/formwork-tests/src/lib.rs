//! Integration test crate for formwork.
//!
//! This crate exists solely to hold cross-crate integration tests.
//! It depends on every formwork crate to verify they work together.

#[cfg(test)]
mod expression;

#[cfg(test)]
mod propagation;

#[cfg(test)]
mod scene;
