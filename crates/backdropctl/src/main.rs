//! Command line access to the backdrop cache.
//!
//! Looks up, prepares and maintains cached movie backdrops in the configured cache directory.

#![warn(missing_debug_implementations, clippy::all)]

use backdrop_cache::logging;

mod cli;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
