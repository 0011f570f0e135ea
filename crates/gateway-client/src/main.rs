//! Gateway client entry point
//!
//! Run with:
//! ```bash
//! GATEWAY_TOKEN=... cargo run -p gateway-client
//! ```
//!
//! Configuration is loaded from environment variables.

use gateway_client::rest::HttpRestExecutor;
use gateway_client::transport::TlsTransport;
use gateway_client::{EventRouter, GatewayClient, GatewayEvent};
use gateway_common::{
    try_init_tracing_with_config, AppError, ClientConfig, ErrorReport, TracingConfig,
};
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        let report = ErrorReport::from(&e);
        error!(code = %report.code, error = %report.message, "Gateway client failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let config = ClientConfig::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {e}");
        e
    })?;

    if let Err(e) = try_init_tracing_with_config(&TracingConfig::from_log_settings(&config.log)) {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    info!(
        gateway_url = %config.gateway.gateway_url,
        api_version = config.gateway.api_version,
        intents = config.gateway.intents.bits(),
        max_retries = config.reconnect.max_retries,
        "Configuration loaded"
    );

    let transport = TlsTransport::new(config.gateway.handshake_timeout());
    let rest = HttpRestExecutor::new(
        &config.gateway.api_base_url,
        &config.gateway.token,
        config.gateway.rest_timeout(),
    )
    .map_err(AppError::connection)?;

    let mut client = GatewayClient::new(config, transport, rest);
    register_handlers(client.router_mut());

    let shutdown = client.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                shutdown.request();
            }
            Err(e) => warn!(error = %e, "Could not listen for Ctrl-C"),
        }
    });

    let state = client.run().await?;

    match client.exit_reason() {
        Some(reason) if !reason.is_requested() => Err(AppError::session_ended(reason)),
        reason => {
            info!(reason = ?reason, sequence = state.sequence, "Gateway client exited");
            Ok(())
        }
    }
}

fn register_handlers(router: &mut EventRouter) {
    router.on_event("READY", |event: &GatewayEvent| {
        info!(sequence = ?event.sequence, "Connected and identified");
    });
    router.on_event("GUILD_CREATE", |event: &GatewayEvent| {
        info!(sequence = ?event.sequence, "Guild available");
    });
    router.on_event("MESSAGE_CREATE", |event: &GatewayEvent| {
        debug!(sequence = ?event.sequence, "Message received");
    });
}
