//! Service layer
//!
//! Read-side logic over the data layer: status reconstruction, thread
//! context, filter compilation and the live observation engine.

mod context;
pub mod filter;
mod observation;
mod queries;
mod reconstruct;

pub use context::ThreadContext;
pub use observation::{Observation, Query};
pub use queries::{
    AccountQuery, ActiveFiltersQuery, ContextQuery, ExpiredFiltersQuery, ListsQuery,
    TimelineQuery, TransientQuery,
};
