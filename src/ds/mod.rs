pub mod ranked_list;
pub mod ranked_map;

pub use ranked_list::{Item, RankedList, RemoveOrdered};
pub use ranked_map::{MapItem, MapRemoveOrdered, RankedMap};
