use anyhow::anyhow;
use clap::Parser;
use log::*;
use nsc_cli::client::run_client;
use nsc_cli::config::{CliCommand, Config, GlobalOptions, IdCommand};
use nsc_cli::error::ConfigError;
use nsc_cli::id_management::{default_id_path, LocalIdentitySet};
use nsc_p2p::ClientIdentity;
use std::path::PathBuf;

#[tokio::main]
async fn main() {
    let config: Config = Config::parse();
    let (global_options, command) = config.to_parts();
    let filter = global_options.log_level.to_lowercase();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let result = match command {
        CliCommand::Id(id_command) => exec_id_command(id_command, global_options),
        CliCommand::Run => start_client(global_options).await,
    };

    match result {
        Ok(()) => {
            info!("Bye :)")
        }
        Err(err) => {
            eprintln!("** Error ** \n {err}");
            std::process::exit(1);
        }
    }
}

fn exec_id_command(cmd: IdCommand, config: GlobalOptions) -> Result<(), anyhow::Error> {
    let path = config.identity_file.unwrap_or_else(default_id_path);
    match cmd {
        IdCommand::Create { name } => {
            let mut local_identities = load_or_create_identities(&path)?;
            let identity = match name {
                Some(name) => ClientIdentity::random_with_name(name),
                None => ClientIdentity::random(),
            };
            if local_identities.contains(identity.name()) {
                return Err(anyhow!("Identity with name {} already exists.", identity.name()));
            }
            println!("Identity created: {identity}");
            local_identities.insert(identity);
            println!("Saving identities to {}", path.display());
            local_identities.save(&path)?;
        }
        IdCommand::List => {
            let local_identities = load_or_create_identities(&path)?;
            println!("{} Local identities found.", local_identities.identities.len());
            for id in local_identities.identities.values() {
                println!("{id}");
            }
        }
        IdCommand::Delete { name } => {
            let mut local_identities = load_or_create_identities(&path)?;
            match local_identities.remove(&name) {
                Some(identity) => {
                    println!("Identity deleted: {identity}");
                    local_identities.save(&path)?;
                }
                None => {
                    return Err(anyhow!("Identity with name {name} not found."));
                }
            }
        }
    }
    Ok(())
}

fn load_or_create_identities(path: &PathBuf) -> Result<LocalIdentitySet, anyhow::Error> {
    match LocalIdentitySet::try_load(Some(path)) {
        Ok(local_identities) => Ok(local_identities),
        Err(ConfigError::IoError(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            info!("No identity file found at {}", path.display());
            Ok(LocalIdentitySet::default())
        }
        Err(err) => Err(anyhow!("Error reading identity file: {err}")),
    }
}

async fn start_client(options: GlobalOptions) -> Result<(), anyhow::Error> {
    let path = options.identity_file.unwrap_or_else(default_id_path);
    let identity = assign_identity(&path, options.id_name.as_deref(), &options.client.name)?;
    run_client(options.client, identity).await?;
    Ok(())
}

/// The named identity, or the first one on file. Without any identity on file, a throwaway one is generated.
fn assign_identity(path: &PathBuf, id_name: Option<&str>, client_name: &str) -> Result<ClientIdentity, anyhow::Error> {
    info!("Loading identities from {}", path.display());
    let mut local_identities = load_or_create_identities(path)?;
    if local_identities.is_empty() && id_name.is_none() {
        warn!("No identities found. Using a temporary one. Use `nsc id new` to create a permanent identity.");
        return Ok(ClientIdentity::random_with_name(client_name));
    }
    local_identities.take(id_name).ok_or_else(|| anyhow!("Identity not found: {}", id_name.unwrap_or_default()))
}
