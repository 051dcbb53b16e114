pub mod bus;
pub mod cache;
