//! Layered configuration.
//!
//! Tiers, lowest to highest, merged field-by-field:
//! 1. **Defaults** - compiled in
//! 2. **Project** - `$CWD/taskboard/config.yaml`
//! 3. **User** - `~/.taskboard/config.yaml`
//! 4. **Environment** - variables listed below
//!
//! Command-line flags are applied on top by the binary.
//!
//! ## Environment Variables
//! - `TASKBOARD_CONFIG_PATH` - Explicit config file (replaces the file tiers)
//! - `TASKBOARD_DB_PATH` - Database path
//! - `TASKBOARD_HOST`, `TASKBOARD_PORT` - Listen address
//! - `TASKBOARD_BASE_URL` - Public base URL
//! - `GOOGLE_CLIENT_ID`, `GOOGLE_CLIENT_SECRET`, `GOOGLE_REDIRECT_URI` - Google sign-in

mod loader;
mod merge;
mod types;

pub use loader::{ConfigLoader, ConfigPaths, ConfigTier};
pub use merge::{deep_merge, deep_merge_all};
pub use types::*;
