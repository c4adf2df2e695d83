//! binkpd: binkp mailer daemon
//!
//! `binkpd receive` answers inbound calls on the binkp port, one spawned
//! task per session. `binkpd send` places a single outbound call and exits
//! nonzero if the session failed.

mod args;

use std::net::IpAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use clap::Parser;
use log::{error, info};
use tokio::net::{TcpListener, TcpStream};

use binkp_common::address::{FtnAddress, fixup_address};
use binkp_server::callout::CredentialSource;
use binkp_server::config::BinkConfig;
use binkp_server::session::{BinkSession, disk_receive_factory};

use args::{Args, Command};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = match BinkConfig::load(&args.config) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Unable to read {}: {}", args.config.display(), e);
            return ExitCode::FAILURE;
        }
    };

    match args.command {
        Command::Receive { bind, port } => receive(config, bind, port).await,
        Command::Send { network, node, host, port } => {
            send(config, &network, &node, &host, port).await
        }
    }
}

fn init_logging(verbosity: u8) {
    let mut builder = env_logger::Builder::new();
    let level = match verbosity {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(level);
    builder.init();
}

/// Answer inbound calls until a shutdown signal arrives.
async fn receive(config: Arc<BinkConfig>, bind: IpAddr, port: u16) -> ExitCode {
    let listener = match TcpListener::bind((bind, port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Unable to listen on {}:{}: {}", bind, port, e);
            return ExitCode::FAILURE;
        }
    };
    info!(
        "{} listening for binkp sessions on {}:{}",
        config.system_name, bind, port
    );

    let next_session_id = AtomicU32::new(1);
    tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown signal received; no longer accepting calls");
        }
        _ = async {
            loop {
                match listener.accept().await {
                    Ok((socket, peer_addr)) => {
                        let session_id = next_session_id.fetch_add(1, Ordering::Relaxed);
                        info!("Session {}: answering a call from {}", session_id, peer_addr);
                        let config = Arc::clone(&config);
                        let credentials: Arc<dyn CredentialSource> = config.clone();
                        tokio::spawn(async move {
                            BinkSession::answering(
                                socket,
                                config,
                                credentials,
                                session_id,
                                disk_receive_factory(),
                            )
                            .run()
                            .await;
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept a connection: {}", e);
                    }
                }
            }
        } => {}
    }
    ExitCode::SUCCESS
}

/// Place one outbound call and run the session to completion.
async fn send(
    config: Arc<BinkConfig>,
    network_name: &str,
    node: &str,
    host: &str,
    port: u16,
) -> ExitCode {
    if config.network(network_name).is_none() {
        error!("Network {} is not in the configuration", network_name);
        return ExitCode::FAILURE;
    }
    let expected = match fixup_address(node).parse::<FtnAddress>() {
        Ok(address) => address,
        Err(e) => {
            error!("Invalid node {}: {}", node, e);
            return ExitCode::FAILURE;
        }
    };

    let address = format!("{}:{}", host, port);
    let socket = match TcpStream::connect(&address).await {
        Ok(socket) => socket,
        Err(e) => {
            error!("Unable to connect to {}: {}", address, e);
            return ExitCode::FAILURE;
        }
    };

    // One receive directory per process; concurrent invocations stay apart.
    let session_id = std::process::id();
    info!("Session {}: calling {} at {}", session_id, expected, address);
    let credentials: Arc<dyn CredentialSource> = config.clone();
    let summary = BinkSession::originating(
        socket,
        config,
        credentials,
        network_name,
        expected,
        session_id,
        disk_receive_factory(),
    )
    .run()
    .await;

    if summary.failed { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    }
}
