#![deny(unused_must_use)]

#[macro_use]
extern crate log;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const MAINTENANCE_INTERVAL_SECONDS: u64 = 60;

use chrono::Utc;
use clap;
use futures::Stream;
use futures::future::Future;
use hyper::Server;

use state_export::config::Config;

mod server;

use server::{Components, ExportNewService};

fn main() {
    env_logger::from_env(env_logger::Env::default().default_filter_or("state_export=info")).init();

    let args = clap::App::new("State Export").version(env!("CARGO_PKG_VERSION"))
        .arg(clap::Arg::with_name("address")
            .help("Address and port to listen on")
            .default_value("127.0.0.1:8080"))
        .arg(clap::Arg::with_name("config").long("config")
            .help("Path to configuration JSON")
            .required(true)
            .takes_value(true))
        .get_matches();
    let address: SocketAddr = match args.value_of("address").unwrap_or_default().parse() {
        Ok(address) => address,
        _ => {
            error!("Unable to parse address");
            std::process::exit(1);
        },
    };
    let config = Config::load_from(args.value_of("config").unwrap_or_default()).unwrap_or_else(|e| {
        error!("Cannot load configuration: {}", e);
        std::process::exit(1);
    });
    debug!("Configuration: {:?}", config);
    let components = Components::from_config(&config).unwrap_or_else(|e| {
        error!("Cannot start: {}", e);
        std::process::exit(1);
    });
    if !config.export_enabled {
        warn!("State export is disabled");
    }

    let (tx, rx) = futures::sync::oneshot::channel::<()>();
    let shutdown_signal = Arc::new(Mutex::new(Some(tx)));

    let service = ExportNewService::new(
        Arc::clone(&components.authorization),
        Arc::clone(&components.export),
    );

    let server = Server::bind(&address)
        .serve(service)
        .with_graceful_shutdown(rx)
        .map_err(|e| error!("Server error: {}", e));

    info!("Starting state export {} server on {}", env!("CARGO_PKG_VERSION"), address);
    let mut runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Cannot create runtime: {}", e);
            std::process::exit(1);
        },
    };

    // signal handler to trigger graceful server shutdown
    runtime.spawn(
        tokio_signal::ctrl_c()
            .flatten_stream()
            .map_err(|e| {
                error!("Signal handling error: {}", e);
            })
            .for_each(move |_| {
                start_shutdown(&shutdown_signal);
                Ok(())
            })
    );

    // reload credentials one interval before they go stale and drop expired authorization codes
    let credentials = Arc::downgrade(&components.credentials);
    let codes = Arc::downgrade(&components.codes);
    runtime.spawn(
        tokio::timer::Interval::new_interval(Duration::new(MAINTENANCE_INTERVAL_SECONDS, 0))
            .map_err(|e| {
                error!("Timer error: {}", e);
            })
            .for_each(move |_| {
                let (credentials, codes) = match (credentials.upgrade(), codes.upgrade()) {
                    (Some(credentials), Some(codes)) => (credentials, codes),
                    _ => return Err(()),
                };
                let now = Utc::now();
                if let Err(e) = credentials.refresh_ahead(now, chrono::Duration::seconds(MAINTENANCE_INTERVAL_SECONDS as i64)) {
                    error!("Cannot refresh state credentials: {}", e);
                }
                let purged = codes.purge_expired(now);
                if purged > 0 {
                    debug!("Purged {} expired authorization codes", purged);
                }
                Ok(())
            })
    );

    if runtime.block_on(server).is_err() {
        error!("Error waiting for server to complete");
    }
}

#[inline]
fn start_shutdown(shutdown_signal: &Arc<Mutex<Option<futures::sync::oneshot::Sender<()>>>>) {
    let mut shutdown_signal = match shutdown_signal.lock() {
        Ok(shutdown_signal) => shutdown_signal,
        Err(_) => {
            error!("Cannot obtain shutdown signal");
            return;
        },
    };
    match shutdown_signal.take() {
        Some(shutdown_signal) => {
            warn!("Shutting down");
            if shutdown_signal.send(()).is_err() {
                error!("Server already stopped");
            }
        },
        None => error!("Shutdown signal already used"),
    }
}
