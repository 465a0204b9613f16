//! Memoized functions keyed by argument tuples.

mod computed_fn;
mod deep_map;
mod key;
mod transformer;

pub use computed_fn::ComputedFn;
pub use deep_map::DeepMap;
pub use key::{AsMemoKey, HandleKey, MemoArgList, MemoArgs, MemoKey, MemoKeys};
pub use transformer::{create_transformer, keep_alive, Transformer};
