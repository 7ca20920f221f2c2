//! SeaORM entity definitions

pub mod prelude;

pub mod client_session;
pub mod data_batch;
