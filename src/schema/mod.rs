pub mod agent;
pub mod encounter;
pub mod event;
pub mod relationship;
