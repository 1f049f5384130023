//! Presently.
//!
//! Presently fetches source documents through a memoizing computation pipeline. Documents are
//! described by hashable futures, which are realized at most once per process and shared between
//! all requests for the same document.

#![warn(missing_debug_implementations, clippy::all)]

mod cli;
mod logging;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
