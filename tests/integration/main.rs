//! Integration tests entry point, following https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html

mod blk;
mod common;
mod tracing_utils;
mod unblk;
