// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::Result;
use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::{
    runtime::{
        controller::{Action, Config as ControllerConfig},
        reflector::ObjectRef,
        watcher::Config as WatcherConfig,
        Controller,
    },
    Api, Client, ResourceExt,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use vmconverge::{
    config::OperatorConfig,
    context::Context,
    crd::VirtualMachine,
    labels::OWNER_VM_LABEL,
    provider::{http::HttpVmProvider, TimeoutProvider},
    reconcilers::{error_action, reconcile_virtualmachine, success_action},
    store::kubernetes::KubeClusterStore,
    vm_errors::ConvergeError,
    webhooks::{self, PrivilegedIdentities, WebhookState},
};

fn main() -> Result<()> {
    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .thread_name("vmconverge-controller")
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

/// Initialize logging.
///
/// Respects `RUST_LOG` (default `info`) and `RUST_LOG_FORMAT=json|text`.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }
}

async fn async_main() -> Result<()> {
    let config = OperatorConfig::parse();
    init_tracing();

    info!("Starting VM convergence operator");
    debug!(
        hypervisor_url = %config.hypervisor_url,
        rpc_timeout_secs = config.rpc_timeout_secs,
        webhook_addr = %config.webhook_addr,
        strict_admission = config.strict_admission,
        "Configuration loaded"
    );

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("A rustls crypto provider was already installed");
    }

    let settings = config.settings()?;
    info!(features = ?settings.features, "Feature gates");

    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;
    let store = Arc::new(KubeClusterStore::new(client.clone()));

    debug!("Creating hypervisor client");
    let http = reqwest::Client::builder().build()?;
    let provider = Arc::new(TimeoutProvider::new(
        HttpVmProvider::new(http, &config.hypervisor_url, config.hypervisor_token.clone()),
        config.rpc_timeout(),
    ));

    let ctx = Arc::new(Context::new(store.clone(), provider, settings.clone()));
    let webhook_state = Arc::new(WebhookState::new(
        store,
        settings.features,
        PrivilegedIdentities::new(config.privileged_identities.iter().cloned()),
        config.strict_admission,
    ));

    info!("Starting controller and admission webhooks");

    // Neither task should ever exit; if one does, the process exits with it
    tokio::select! {
        result = run_virtualmachine_controller(client, ctx, config.concurrency) => {
            error!("CRITICAL: VirtualMachine controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("VirtualMachine controller exited unexpectedly without error")
        }
        result = webhooks::serve(&config.webhook_addr, webhook_state) => {
            error!("CRITICAL: admission webhook server exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("admission webhook server exited unexpectedly without error")
        }
    }
}

/// Run the `VirtualMachine` controller.
///
/// Instance storage claims are watched too, so a claim being bound or attached
/// wakes its VM instead of waiting for the next requeue.
async fn run_virtualmachine_controller(
    client: Client,
    ctx: Arc<Context>,
    concurrency: u16,
) -> Result<()> {
    info!(concurrency, "Starting VirtualMachine controller");

    let api = Api::<VirtualMachine>::all(client.clone());
    let claims = Api::<PersistentVolumeClaim>::all(client);

    Controller::new(api, WatcherConfig::default())
        .with_config(ControllerConfig::default().concurrency(concurrency))
        .watches(claims, WatcherConfig::default().labels(OWNER_VM_LABEL), |claim| {
            let namespace = claim.namespace()?;
            let vm_name = claim.labels().get(OWNER_VM_LABEL)?;
            Some(ObjectRef::<VirtualMachine>::new(vm_name).within(&namespace))
        })
        .run(reconcile_virtualmachine_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Reconcile wrapper for `VirtualMachine`
async fn reconcile_virtualmachine_wrapper(
    vm: Arc<VirtualMachine>,
    ctx: Arc<Context>,
) -> Result<Action, ConvergeError> {
    debug!(
        name = %vm.name_any(),
        namespace = ?vm.namespace(),
        "Reconcile wrapper called for VirtualMachine"
    );

    match reconcile_virtualmachine(&ctx, (*vm).clone()).await {
        Ok(()) => {
            info!("Successfully reconciled VirtualMachine: {}", vm.name_any());
            Ok(success_action(&ctx, &vm))
        }
        Err(e) => {
            error!("Failed to reconcile VirtualMachine {}: {}", vm.name_any(), e);
            Err(e)
        }
    }
}

/// Error policy for the `VirtualMachine` controller
fn error_policy(vm: Arc<VirtualMachine>, err: &ConvergeError, ctx: Arc<Context>) -> Action {
    error_action(&ctx, &vm, err)
}
