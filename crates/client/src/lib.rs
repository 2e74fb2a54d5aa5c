//! Client side of larder.
//!
//! This crate provides the network layer, the offline cache worker
//! (lifecycle controller and fetch interceptor) and the push registry client
//! shared by the CLI.

pub mod fetch;
pub mod push;
pub mod worker;

pub use fetch::{FetchClient, FetchConfig, FetchRequest, FetchResponse, Network};
pub use push::RegistryClient;
pub use worker::{
    ActivationReport, ClientId, Clients, FetchInterceptor, LifecycleController, ResponseSource, Served, WorkerConfig,
    WorkerState,
};
