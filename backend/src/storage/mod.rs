pub mod retention;
pub mod static_store;
