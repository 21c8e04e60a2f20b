pub mod application;
pub mod errors;
pub mod model;
pub mod pool;
pub mod snapshot;
pub mod store;
pub mod timeslice;
