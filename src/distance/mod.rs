//! Distance computation module.
//!
//! Item matching ranks by inner product over L2-normalized embeddings, which
//! is equivalent to cosine similarity. Squared Euclidean distance is used by
//! k-means when training leaf centroids and codebooks.

pub mod scalar;

pub use scalar::{dot_product, euclidean_distance_squared, squared_norm};
