//! ws-hub binary entry point: an echo server.

use std::process::ExitCode;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use ws_hub::api::{self, AppState};
use ws_hub::cli::{self, Args};
use ws_hub::config::Config;
use ws_hub::{logging, SessionEvent, WebSocketServer};

#[tokio::main]
async fn main() -> ExitCode {
    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!("Try 'ws-hub --help' for more information.");
            return ExitCode::from(2);
        }
    };

    if args.help {
        cli::print_help();
        return ExitCode::SUCCESS;
    }
    if args.version {
        cli::print_version();
        return ExitCode::SUCCESS;
    }

    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &Args) -> ws_hub::Result<()> {
    let config = Config::load(args)?;
    logging::init_with_filter(config.log_filter());

    info!("ws-hub v{}", env!("CARGO_PKG_VERSION"));

    let server = WebSocketServer::new(config.to_server_config()?);
    server.set_on_client_message_callback(|state, _info, session, event| match event {
        SessionEvent::Open(open) => info!(client = %state, uri = %open.uri, "client connected"),
        SessionEvent::Message(message) => {
            if let Err(e) = session.send(message.clone()) {
                error!(client = %state, error = %e, "echo failed");
            }
        }
        SessionEvent::Close(close) => {
            info!(client = %state, code = close.code, reason = %close.reason, "client disconnected")
        }
        SessionEvent::Error(e) => error!(client = %state, error = %e, "session error"),
        SessionEvent::Ping(_) | SessionEvent::Pong(_) => {}
    })?;
    server.start().await?;

    let shutdown = CancellationToken::new();
    let admin = match config.admin_address()? {
        Some(addr) => {
            let state = AppState::new(server.registry());
            let token = shutdown.clone();
            Some(tokio::spawn(async move {
                api::serve(addr, state, async move { token.cancelled().await }).await
            }))
        }
        None => None,
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "cannot listen for ctrl-c, shutting down");
    }
    info!("shutting down");

    shutdown.cancel();
    server.stop().await;
    if let Some(admin) = admin {
        match admin.await {
            Ok(result) => result?,
            Err(e) => error!(error = %e, "admin API task failed"),
        }
    }
    Ok(())
}
