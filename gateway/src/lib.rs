//! A storage proof gateway.
//!
//! Requests are [`gateway_vm`] programs. The [`service::Gateway`] evaluates
//! them against a recent commit of a [`rollup::Rollup`], proves every storage
//! location they touched with the commit's [`prover::Prover`], and returns
//! the outputs together with a witness the rollup's verifier accepts.
//! [`verify`] does what that verifier does, off-chain.

pub mod cache;
pub mod compat;
pub mod env;
pub mod provider;
pub mod prover;
pub mod rollup;
pub mod service;
pub mod tracing;
pub mod verify;

pub use service::{Gateway, GatewayConfig, GatewayResponse};
