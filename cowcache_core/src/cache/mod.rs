pub mod cow_cache;
pub mod iter;

mod stable_store;
