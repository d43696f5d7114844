pub mod location;
pub mod query;

pub use location::{BatchOutcome, Location};
pub use query::{Point, Query, QueryOptions, QueryTarget};
