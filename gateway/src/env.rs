use std::io;

use dotenvy::dotenv;
use tracing::warn;

/// Loads a local `.env` into the environment, if there is one.
///
/// IO errors are taken to mean there is no such file.
pub fn load_dotenvy_vars_if_present() {
    match dotenv() {
        Ok(_) | Err(dotenvy::Error::Io(io::Error { .. })) => (),
        Err(e) => warn!("Found local `.env` file but was unable to parse it! (err: {e})"),
    }
}
