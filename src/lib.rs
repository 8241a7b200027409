pub mod authority;
pub mod config;
pub mod grid;
pub mod limits;
pub mod model;
pub mod observability;
pub mod poll;
pub mod queue;
pub mod session;
pub mod time;
