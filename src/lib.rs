//! Cannect ingest - cannabis-industry firehose classification pipeline
//!
//! Consumes post commits from a social-network firehose, decides relevance with
//! a fast keyword heuristic and a rate-limited AI verifier for ambiguous posts,
//! and stores accepted posts idempotently for feed serving and model training.

pub mod classifier;
pub mod cli;
pub mod config;
pub mod error;
pub mod firehose;
pub mod ingest;
pub mod storage;
pub mod verifier;

pub use error::{IngestError, Result};
