//! Thin asynchronous facade over the Kubernetes API (SPEC_FULL §4.3).

pub mod client;

pub use client::{ClusterApi, ClusterClient, PodList};
