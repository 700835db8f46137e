//! azurejit - Azure just-in-time VM access from the command line
//!
//! Signs in to Azure, finds a VM by name, makes sure its JIT policy has a rule
//! for the requested port, and opens that port for a limited time.

#![deny(clippy::all)]

mod auth;
mod cli;
mod config;
mod error;
mod jit;
mod token_store;

use std::process::ExitCode;

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use auth::oauth::OAuth2Client;
use auth::session;
use cli::CommandLineArgs;
use config::Config;
use error::AppError;
use jit::{AccessGrant, AccessParams, ArmClient, TerminalPrompt};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = match CommandLineArgs::try_parse() {
        Ok(args) => args,
        Err(e) if !cli::is_usage_error(&e) => e.exit(),
        Err(e) => {
            eprintln!("Warning: {}", cli::usage_warning(&e));
            eprintln!("For more information, try '--help'.");
            return ExitCode::FAILURE;
        }
    };

    // Load .env file (if present) before anything else
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: {}", AppError::Config(format!("{:#}", e)).user_message());
            eprintln!("\nOverride the defaults with environment variables:");
            eprintln!("  AZURE_CLIENT_ID=<your-azure-ad-client-id>");
            eprintln!("  AZURE_TENANT_ID=<your-tenant-id>");
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config.logging.level);
    info!("Starting {} v{}", config.app.name, config.app.version);

    if args.sign_out {
        return match token_store::delete_all() {
            Ok(()) => {
                println!("Cached credentials removed.");
                ExitCode::SUCCESS
            }
            Err(e) => {
                let e = AppError::from(e);
                error!("Sign-out failed: {}", e);
                eprintln!("Warning: {}", e.user_message());
                ExitCode::FAILURE
            }
        };
    }

    match run(&config, args).await {
        Ok(grant) => {
            print_grant(&grant);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            if e.requires_sign_out() {
                if let Err(e) = token_store::delete_all() {
                    warn!("Failed to clear cached credentials: {}", e);
                }
            }
            eprintln!("Warning: {}", e.user_message());
            ExitCode::FAILURE
        }
    }
}

/// Initialize tracing/logging on stderr, keeping stdout for the result.
fn init_logging(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

/// Sign in and run the access flow once.
async fn run(config: &Config, args: CommandLineArgs) -> Result<AccessGrant, AppError> {
    let (vm_name, port) = match (args.vm_name, args.port) {
        (Some(vm_name), Some(port)) => (vm_name, port),
        _ => return Err(AppError::Config("--vm-name and --port are required".to_string())),
    };

    let params = AccessParams {
        vm_name,
        port,
        address_prefix: args
            .address_prefix
            .unwrap_or_else(|| config.jit.default_address_prefix.clone()),
        hours: args.time,
        subscription: args.subscription,
        resource_group: args.resource_group,
        protocol: args.protocol.into(),
        justification: args.justification,
    };

    let oauth_client =
        OAuth2Client::new(config).map_err(|e| AppError::Config(format!("{:#}", e)))?;
    let session = session::sign_in(config, &oauth_client).await?;
    debug!("Management token expires at {}", session.expires_at);

    let arm_client = ArmClient::new(&config.api.management_base_url)?;
    jit::request_access(
        &arm_client,
        session.access_token.as_str(),
        &params,
        &TerminalPrompt,
    )
    .await
}

fn print_grant(grant: &AccessGrant) {
    println!(
        "Access granted to {} ({}/{}) port {} from {} for {}h, until {}",
        grant.vm.name,
        grant.vm.subscription_id,
        grant.vm.resource_group,
        grant.port,
        grant.source_prefix,
        grant.hours,
        grant.end_time_utc
    );
    if let Some(requestor) = &grant.requestor {
        println!("Requested by {}", requestor);
    }
}
