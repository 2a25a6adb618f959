mod api;
mod commands;
mod config;
mod style;

use clap::{Parser, Subcommand};

use commands::run::RunArgs;
use config::{resolve_api_key, Settings};

const LONG_ABOUT: &str = "Welcome to Dispatch!

To get started, use the login command to authenticate with Dispatch or create an account.

Documentation: https://docs.dispatch.run
Discord: https://dispatch.run/discord
Support: support@dispatch.run";

const RUN_LONG_ABOUT: &str = "Run a Dispatch application.

The command to start the local application endpoint should be
specified after the run command and its options:

  dispatch run [options] -- <command>

Dispatch spawns the local application endpoint and then dispatches
function calls to it continuously.

Dispatch connects to the local application endpoint on http://127.0.0.1:8000.
If the local application is listening on a different host or port,
please set the --endpoint option appropriately. The value passed to
this option will be exported as the DISPATCH_ENDPOINT_ADDR environment
variable to the local application.

A new session is created each time the command is run. A session is
a pristine environment in which function calls can be dispatched and
handled by the local application. To start the command using a previous
session, use the --session option to specify a session ID from a
previous run.";

#[derive(Debug, Parser)]
#[command(name = "dispatch", version, about = "Dispatch command line interface")]
#[command(long_about = LONG_ABOUT)]
struct Cli {
    /// Dispatch API key (env: DISPATCH_API_KEY)
    #[arg(short = 'k', long = "api-key", global = true, value_name = "KEY")]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a Dispatch application
    #[command(long_about = RUN_LONG_ABOUT)]
    Run(RunArgs),

    /// Login to Dispatch
    Login,

    /// Switch between organizations
    Switch {
        /// Organization to switch to; lists organizations when omitted
        organization: Option<String>,
    },

    /// Manage verification keys
    Verification {
        #[command(subcommand)]
        command: VerificationCommand,
    },

    /// Print the version
    Version,
}

#[derive(Debug, Subcommand)]
enum VerificationCommand {
    /// Get the active verification key
    Get,
    /// Rollout a new verification key
    Rollout,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => commands::run::run(cli.api_key, args).await,
        Command::Login => {
            let settings = Settings::from_env();
            commands::login::login(&settings).await
        }
        Command::Switch { organization } => {
            let settings = Settings::from_env();
            commands::switch::switch(&settings, organization.as_deref())
        }
        Command::Verification { command } => {
            let settings = Settings::from_env();
            let api_key = resolve_api_key(cli.api_key.as_deref(), &settings)?;
            match command {
                VerificationCommand::Get => commands::verification::get(&settings, api_key).await,
                VerificationCommand::Rollout => {
                    commands::verification::rollout(&settings, api_key).await
                }
            }
        }
        Command::Version => {
            println!("dispatch version {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
