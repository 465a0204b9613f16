//! Recursive observation of container trees.

mod deep;

pub use deep::{deep_observe, DeepChange, DeepObserver, Node};
