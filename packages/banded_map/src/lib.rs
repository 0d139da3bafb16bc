#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! An open-addressed hash map that probes across successively larger modulus bands.
//!
//! This crate provides [`BandedMap`], a map whose slots are organized as a stack of equally
//! sized generations. Each key is probed at one slot per band, where band `b` reduces the hash
//! modulo `b` generations' worth of slots. When every band is taken, the map doubles its number
//! of generations without moving existing entries.
//!
//! The map is intended for bookkeeping: mapping externally meaningful keys to indexes or
//! identifiers of storage managed elsewhere.
//!
//! # Example
//!
//! ```
//! use std::num::NonZero;
//!
//! use banded_map::BandedMap;
//!
//! let mut slots_by_name = BandedMap::new(NonZero::new(4).unwrap());
//!
//! for (index, name) in ["alpha", "beta", "gamma", "delta", "epsilon"].into_iter().enumerate() {
//!     slots_by_name.add(name, index);
//! }
//!
//! assert_eq!(slots_by_name["gamma"], 2);
//! assert_eq!(slots_by_name.len(), 5);
//! assert_eq!(slots_by_name.capacity() % 4, 0);
//! ```
//!
//! # Diagnostics
//!
//! Growth is reported through the [`tracing`] facade at debug level.

mod map;

pub use map::*;
