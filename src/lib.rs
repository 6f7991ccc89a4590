//! Bucketgate - Edge Gateway for a Blob Bucket
//!
//! This crate implements an HTTP gateway that serves and stores objects in a
//! bucket on behalf of untrusted clients. Every object request passes an
//! admission filter and a two-tier fixed-window rate limiter backed by a shared
//! counter store. A janitor job sweeps stale objects and expired counters.

pub mod admission;
pub mod config;
pub mod error;
pub mod http;
pub mod janitor;
pub mod objects;
pub mod ratelimit;
pub mod store;
