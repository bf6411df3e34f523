//! Integration tests

mod common;
mod engine_flow;
mod execution_test;
mod properties;
mod reconcile_test;
mod scenarios;
