//! This crate provides an adaptive quantile sketch over data streams in a
//! moderate amount of memory.
//!
//! Order statistics is a rough business. Exact solutions are expensive in
//! terms of memory and computation, and the approximations in the literature
//! each pick their own tradeoff. The t-digest picks accuracy at the extremes:
//! it summarizes a distribution with a bounded collection of weighted
//! centroids, packed tightly near the tails and loosely in the middle, so
//! that quantile queries for q near 0 or 1 come back with part-per-million
//! error while the median still lands well under a percent.
//!
//! ```
//! use treedigest::TreeDigest;
//!
//! let mut digest = TreeDigest::with_seed(100.0, 42).unwrap();
//! for i in 0..10_000 {
//!     digest.add(f64::from(i), 1).unwrap();
//! }
//!
//! let median = digest.quantile(0.5).unwrap();
//! assert!((median - 5_000.0).abs() < 150.0);
//! assert!(digest.cdf(9_999.0) > 0.99);
//! ```

#![deny(missing_docs)]

mod error;
pub mod tdigest;

pub use self::error::Error;
pub use self::tdigest::{Centroid, TreeDigest};
