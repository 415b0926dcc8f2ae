// Adapters: concrete implementations of the domain ports (cluster API, load generator, run history)

pub mod http_cluster;
pub mod locust;
pub mod memory;
pub mod run_store;

pub use http_cluster::HttpClusterApi;
pub use locust::LocustClient;
pub use memory::InMemoryCluster;
pub use run_store::JsonlRunStore;
