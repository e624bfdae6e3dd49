//! Threat detection: signatures, entropy and the file classifier.
//!
//! - Signature store (byte patterns and content hashes, hot-reloadable snapshot)
//! - Shannon entropy over streamed content
//! - Streaming file classifier behind the [`Classifier`] trait

pub mod classifier;
pub mod entropy;
pub mod signature;

pub use classifier::{Classifier, FileClassifier, HeuristicSettings};
pub use entropy::{shannon_entropy, EntropyAccumulator};
pub use signature::{Signature, SignatureKind, SignatureRegistry, SignatureStore};
