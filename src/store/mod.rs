pub mod offheap_store;
pub mod loader;
pub mod purge;
pub mod proxy;
pub mod migration;
pub mod delegating;
