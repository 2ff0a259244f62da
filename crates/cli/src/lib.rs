pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "fleet",
    about = "Fleet operator CLI",
    long_about = "Operate the fleet session orchestrator: migrations, config inspection, readiness checks, and tenant registration.",
    after_help = "Examples:\n  fleet doctor --json\n  fleet tenant add --owner 1001 --token 123:abc --name Max\n  fleet tenant list"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, provider credentials, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(subcommand, about = "Register, list, and deactivate tenants")]
    Tenant(TenantCommand),
}

#[derive(Debug, Subcommand)]
enum TenantCommand {
    #[command(about = "Register a tenant; it is picked up on the server's next reconcile pass")]
    Add {
        #[arg(long, help = "Gateway user id of the tenant owner")]
        owner: String,
        #[arg(long, help = "Gateway credential (bot token)")]
        token: String,
        #[arg(long, help = "Tenant id; generated when omitted")]
        id: Option<String>,
        #[arg(long, help = "Display name shown to the owner")]
        name: Option<String>,
        #[arg(long, help = "Personality prompt for the assistant")]
        personality: Option<String>,
    },
    #[command(about = "List registered tenants with redacted credentials")]
    List,
    #[command(about = "Mark a tenant inactive; a running session keeps serving until restart")]
    Deactivate { id: String },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Tenant(TenantCommand::Add { owner, token, id, name, personality }) => {
            commands::tenant::add(commands::tenant::NewTenant {
                id,
                owner,
                token,
                display_name: name,
                personality,
            })
        }
        Command::Tenant(TenantCommand::List) => commands::tenant::list(),
        Command::Tenant(TenantCommand::Deactivate { id }) => commands::tenant::deactivate(&id),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
