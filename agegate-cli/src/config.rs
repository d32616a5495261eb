//! Environment file loading
//!
//! Priority (highest first):
//! 1. Variables already set in the process environment
//! 2. `.env` in the current directory
//! 3. `~/.agegate/.env`

use std::path::PathBuf;

/// Load `.env` files without overwriting variables that are already set.
///
/// Returns the files that were loaded. Runs before tracing is initialised,
/// so the caller logs the result.
pub fn load_dotenv() -> Vec<PathBuf> {
    let mut loaded_from = Vec::new();

    if let Ok(path) = dotenvy::dotenv() {
        loaded_from.push(path);
    }

    if let Some(home_dir) = dirs::home_dir() {
        let env_file = home_dir.join(".agegate").join(".env");
        if env_file.exists() && dotenvy::from_path(&env_file).is_ok() {
            loaded_from.push(env_file);
        }
    }

    loaded_from
}
