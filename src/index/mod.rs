//! Index construction and matching.
//!
//! - [`IndexBuilder`] partitions rows into leaves and quantizes residuals
//!   into a [`TreeAhIndex`]
//! - [`ApproximateMatcher`] answers queries from a built or loaded index
//! - [`ExactMatcher`] scans every row and serves as the ground truth

pub mod approximate;
pub mod builder;
pub mod exact;
pub mod traits;
pub mod tree_ah;

pub use approximate::ApproximateMatcher;
pub use builder::{build, IndexBuilder};
pub use exact::ExactMatcher;
pub use traits::{rank_order, Matcher, Neighbor};
pub use tree_ah::TreeAhIndex;
