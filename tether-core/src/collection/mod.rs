//! Derived collections and collection helpers.

mod group_map;
mod processor;
mod view_model;

pub use group_map::{GroupMapOptions, GroupedObservableMap};
pub use processor::{chunk_processor, queue_processor};
pub use view_model::ViewModel;
