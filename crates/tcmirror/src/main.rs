//! tcmirror.
//!
//! tcmirror keeps a local, versioned mirror of the build history of remote CI servers. It
//! reindexes tracked suites, advances queued and running builds until they are finished, and
//! answers history and statistics queries out of the mirrored data.

#![warn(
    missing_docs,
    missing_debug_implementations,
    unused_crate_dependencies,
    clippy::all
)]

mod cli;
mod commands;
mod logging;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
