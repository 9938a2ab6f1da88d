//! `sapmon`: the collector agent CLI (C10) — `onboard`, `provider
//! add`/`delete`, `monitor`, `update`, dispatched synchronously (§5: no
//! cooperative async anywhere in this process).

mod bootstrap;
mod commands;
mod logging;
mod secrets_setup;

use clap::{Parser, Subcommand};
use commands::provider::ProviderAction;
use commands::{monitor, onboard, provider, update};
use sapmon_core::error::SapmonError;
use sapmon_core::registry::ProviderRegistry;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "sapmon")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "SAP Monitor collector agent")]
struct Cli {
    /// Root directory holding `content/`, `trace/`, and `state/` (§6).
    #[arg(long, env = "SAPMON_ROOT", default_value = "/var/opt/microsoft/sapmon")]
    root: PathBuf,

    /// Emit debug-level trace output.
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Seed the `global` secret with sink credentials.
    Onboard(onboard::OnboardArgs),
    /// Register or remove a provider instance.
    Provider {
        #[command(subcommand)]
        action: ProviderAction,
    },
    /// Reload configuration and run every due check once.
    Monitor,
    /// Run a versioned secret-store migration profile.
    Update(update::UpdateArgs),
}

impl Commands {
    /// The operation name stamped into the metadata service's `User-Agent`.
    fn name(&self) -> &'static str {
        match self {
            Commands::Onboard(_) => "onboard",
            Commands::Provider { .. } => "provider",
            Commands::Monitor => "monitor",
            Commands::Update(_) => "update",
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let dirs = bootstrap::RootDirs::under(&cli.root);
    if let Err(err) = dirs.ensure_exist() {
        eprintln!("sapmon: {err}");
        std::process::exit(err.exit_code().unwrap_or(1));
    }

    let _guard = match logging::init(&dirs.trace, cli.verbose, Arc::new(logging::NoopMirror)) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("sapmon: could not initialize logging: {err}");
            std::process::exit(1);
        }
    };

    let mut registry = ProviderRegistry::new();
    sapmon_providers::register_all(&mut registry);

    let secrets = match secrets_setup::build(cli.command.name()) {
        Ok(secrets) => secrets,
        Err(err) => exit_with(&err, None),
    };

    // `provider add`/`provider delete` exit with a fixed code on any failure
    // (70 / 80 respectively), overriding whatever exit code the underlying
    // error would otherwise carry: the same `SecretWriteFailed` means exit 20
    // during `onboard` but exit 70 during `provider add` (§6).
    let (result, fixed_exit_code) = match cli.command {
        Commands::Onboard(args) => (onboard::run(secrets.store.as_ref(), &args), None),
        Commands::Provider { action } => match action {
            ProviderAction::Add(args) => (
                provider::add(secrets.store.as_ref(), secrets.resolver.as_ref(), &registry, &dirs.content, &args),
                Some(70),
            ),
            ProviderAction::Delete(args) => {
                let state_store = sapmon_core::state::StateStore::new(&dirs.state);
                (provider::delete(secrets.store.as_ref(), &state_store, &args.name), Some(80))
            }
        },
        Commands::Monitor => (
            monitor::run(secrets.store.as_ref(), secrets.resolver.as_ref(), &registry, &dirs.content, &dirs.state),
            None,
        ),
        Commands::Update(args) => (update::run(secrets.store.as_ref(), &args), None),
    };

    match result {
        Ok(()) => std::process::exit(0),
        Err(err) => exit_with(&err, fixed_exit_code),
    }
}

fn exit_with(err: &SapmonError, fixed_exit_code: Option<i32>) -> ! {
    tracing::error!(error = %err, "command failed");
    eprintln!("sapmon: {err}");
    let code = fixed_exit_code.unwrap_or_else(|| err.exit_code().unwrap_or(1));
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clap_parses_known_subcommands() {
        let cli = Cli::try_parse_from(["sapmon", "monitor"]).unwrap();
        assert!(matches!(cli.command, Commands::Monitor));

        let cli = Cli::try_parse_from([
            "sapmon",
            "onboard",
            "--logAnalyticsWorkspaceId",
            "ws",
            "--logAnalyticsSharedKey",
            "key",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Onboard(_)));

        let cli = Cli::try_parse_from([
            "sapmon",
            "provider",
            "add",
            "--name",
            "PRD",
            "--type",
            "SapHana",
            "--properties",
            "{}",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Provider { .. }));

        let cli = Cli::try_parse_from(["sapmon", "provider", "delete", "--name", "PRD"]).unwrap();
        assert!(matches!(cli.command, Commands::Provider { .. }));

        let cli = Cli::try_parse_from(["sapmon", "update", "--fromVersion", "1.5", "--toVersion", "1.8"]).unwrap();
        assert!(matches!(cli.command, Commands::Update(_)));
    }

    #[test]
    fn clap_enforces_required_args() {
        assert!(Cli::try_parse_from(["sapmon", "onboard"]).is_err());
        assert!(Cli::try_parse_from(["sapmon", "provider", "add", "--name", "PRD"]).is_err());
        assert!(Cli::try_parse_from(["sapmon", "update", "--fromVersion", "1.5"]).is_err());
        assert!(Cli::try_parse_from(["sapmon"]).is_err());
    }

    #[test]
    fn command_name_maps_to_operation_string() {
        let cli = Cli::try_parse_from(["sapmon", "monitor"]).unwrap();
        assert_eq!(cli.command.name(), "monitor");
    }
}
