pub use crate::ds::{Item, MapItem, RankedList, RankedMap};
pub use crate::error::{ConfigError, InvariantError};
pub use crate::rank::Rank;
pub use crate::ttl::{
    ExpiredDrain, ManualClock, SystemClock, TimeSource, Timestamp, TtlItem, TtlMap,
};
