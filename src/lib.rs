// lib.rs - cloudsweep
// Purpose: Unauthenticated discovery of Azure-hosted assets: subdomains,
//          storage containers and blobs, found by bounded-concurrency DNS
//          and HTTP probing and written into a per-case directory tree.

pub mod aggregator;
pub mod candidates;
pub mod case;
pub mod catalog;
pub mod classifier;
pub mod config;
pub mod csv_input;
pub mod dns_probe;
pub mod errors;
pub mod http_probe;
pub mod pipeline;
pub mod prober;
pub mod progress;
pub mod storage;
pub mod summary;
