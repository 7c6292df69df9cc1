// See <https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html>

pub mod builds;
pub mod dedup;
pub mod finished;
pub mod history;
pub mod migrations;
pub mod stats;
pub mod utils;

pub use utils::*;
