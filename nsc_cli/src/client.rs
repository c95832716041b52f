use crate::config::ClientOptions;
use crate::error::ConfigError;
use anyhow::anyhow;
use libnsc::descriptor::ClientDefaults;
use libnsc::liveness::DataPathProber;
use libnsc::runner::{RunSummary, ServiceRunner};
use libnsc::{CallContext, ServiceDescriptor};
use log::*;
use nsc_p2p::{new_network, ClientIdentity, MeshApi};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Parses and completes every descriptor. Invalid ones are logged and skipped; the rest keep their position in the
/// list, which fixes their connection ids.
pub fn prepare_descriptors(texts: &[String], defaults: &ClientDefaults) -> Vec<(usize, ServiceDescriptor)> {
    texts
        .iter()
        .enumerate()
        .filter_map(|(index, text)| {
            let mut descriptor = match text.parse::<ServiceDescriptor>() {
                Ok(d) => d,
                Err(e) => {
                    error!("Skipping network service #{index} '{text}': {e}");
                    return None;
                }
            };
            if let Err(e) = descriptor.merge(defaults) {
                error!("Skipping network service #{index} '{text}': {e}");
                return None;
            }
            Some((index, descriptor))
        })
        .collect()
}

/// Connects to the mesh manager and serves every configured network service until SIGINT or SIGTERM.
///
/// Fails if no connection could be established at all.
pub async fn run_client(options: ClientOptions, identity: ClientIdentity) -> Result<RunSummary, anyhow::Error> {
    let connect_to = options.connect_to.clone().ok_or(ConfigError::MissingConnectTo)?;
    let defaults = options.defaults()?;
    let descriptors = prepare_descriptors(&options.network_services, &defaults);
    info!("{} of {} network service(s) are valid", descriptors.len(), options.network_services.len());

    let ctx = CallContext::new(CancellationToken::new()).with_field("client", &options.name);
    cancel_on_signal(ctx.clone());

    let identity = Arc::new(identity);
    info!("Using identity {identity}");
    let (network_client, network_event_loop) = new_network(identity.keypair().clone())?;
    // Spawn the network task for it to run in the background.
    tokio::spawn(network_event_loop.run());
    let api = MeshApi::connect(
        network_client.clone(),
        connect_to,
        identity,
        options.dial_timeout,
        options.max_token_lifetime,
    )
    .await?;

    let settings = options.runner_settings();
    let summary = if options.liveness_check_enabled {
        let runner = ServiceRunner::new(api.clone(), api, Some(DataPathProber::default()), settings);
        runner.run(&ctx, descriptors).await
    } else {
        let runner = ServiceRunner::new(api.clone(), api, None::<DataPathProber>, settings);
        runner.run(&ctx, descriptors).await
    };
    info!(
        "Established {} of {} connection(s). Closed {} of {} at teardown.",
        summary.established,
        summary.descriptors,
        summary.cleanup.succeeded(),
        summary.cleanup.attempted
    );
    if let Err(e) = network_client.shutdown().await {
        warn!("Network event loop did not shut down cleanly: {e}");
    }
    if !summary.any_established() {
        return Err(anyhow!("No network service connection could be established"));
    }
    Ok(summary)
}

fn cancel_on_signal(ctx: CallContext) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received");
        ctx.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {},
                _ = term.recv() => {},
            }
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {e}");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod test {
    use super::*;
    use libnsc::MechanismType;

    #[test]
    fn invalid_descriptors_are_skipped_and_keep_their_index() {
        let defaults = ClientDefaults::new(Some(MechanismType::Kernel), ClientDefaults::parse_labels("env=prod").unwrap());
        let texts = ["kernel://svc-a/nsm0", "bad://svc", "svc-b", "svc-c/nsm2", "device://svc-d"]
            .map(String::from)
            .to_vec();
        let descriptors = prepare_descriptors(&texts, &defaults);
        let indices = descriptors.iter().map(|(i, _)| *i).collect::<Vec<_>>();
        // svc-b has no interface name, which kernel requires.
        assert_eq!(indices, vec![0, 3, 4]);
        assert_eq!(descriptors[1].1.network_service, "svc-c");
        assert_eq!(descriptors[1].1.labels["env"], "prod");
        assert_eq!(descriptors[2].1.mechanism, Some(MechanismType::Device));
    }
}
