//! `update` (§6): runs a versioned secret-store migration profile.

use clap::Args;
use sapmon_core::error::Result;
use sapmon_core::migrate::run_migration;
use sapmon_core::secrets::SecretStore;

/// Runs the migration registered for `(fromVersion, toVersion)` against the
/// secret store, e.g. v1.5 -> v1.8 wraps a bare HANA instance secret into a
/// one-element list.
#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Version the secret store is currently in.
    #[arg(long = "fromVersion")]
    pub from_version: String,
    /// Version to migrate the secret store to.
    #[arg(long = "toVersion")]
    pub to_version: String,
}

/// Run the migration named by `args`.
pub fn run(store: &dyn SecretStore, args: &UpdateArgs) -> Result<()> {
    run_migration(store, &args.from_version, &args.to_version)
}
