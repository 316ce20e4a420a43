use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{error, info, warn};

use plexfm::api;
use plexfm::config::ConfigStore;
use plexfm::dispatch::{Dispatcher, ScrobbleSink};
use plexfm::helpers::lastfm::{LastfmClient, LastfmScrobbler};
use plexfm::logging;
use plexfm::session;
use plexfm::{get_tokio_runtime, initialize_tokio_runtime};

fn main() {
    // Initialize the Tokio runtime early
    initialize_tokio_runtime();

    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        print_help();
        return;
    }

    // Look for config file path in command line arguments (-c option)
    let config_file_path = find_config_file_in_args(&args);

    // Look for logging config file path in command line arguments (--log-config option)
    let log_config_path = find_log_config_in_args(&args);

    // Initialize logging system
    if let Err(e) = logging::initialize_logging_with_args(&args, log_config_path.as_deref()) {
        eprintln!("Error: Failed to initialize logging configuration: {}", e);
        eprintln!("plexfm cannot start without a valid logging configuration.");
        std::process::exit(1);
    }

    info!("plexfm webhook scrobbler starting");

    // Use the config file path found earlier or default
    let config_path = config_file_path.unwrap_or_else(|| {
        info!("No configuration file specified, using default: plexfm.json");
        "plexfm.json".to_string()
    });

    let store = match ConfigStore::load(&config_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to load {}: {}", config_path, e);
            eprintln!("Error: Failed to load {}: {}", config_path, e);
            eprintln!("Cannot continue without a valid configuration file.");
            std::process::exit(1);
        }
    };

    // Provision a Last.fm session for every configured user before taking
    // webhooks; users without a cached session key go through the
    // interactive authorization flow here
    let dispatcher = match build_dispatcher(&store) {
        Ok(dispatcher) => Arc::new(dispatcher),
        Err(e) => {
            error!("Failed to set up scrobble clients: {}", e);
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    // Set up a shared flag for graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    // Set up Ctrl+C handler
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received Ctrl+C, shutting down...");
        r.store(false, Ordering::SeqCst);

        // Set up a force shutdown after a timeout
        let force_shutdown_delay = Duration::from_secs(5);
        let r_clone = r.clone();
        let _force_shutdown_thread = thread::spawn(move || {
            thread::sleep(force_shutdown_delay);
            if !r_clone.load(Ordering::SeqCst) {
                info!(
                    "Graceful shutdown timed out after {} seconds, forcing exit...",
                    force_shutdown_delay.as_secs()
                );
                std::process::exit(0);
            }
        });
    }) {
        eprintln!("Error: Failed to set Ctrl+C handler: {}", e);
        std::process::exit(1);
    }

    // Start the API server using the global Tokio runtime
    let port = store.listen_port();
    let dispatcher_for_server = Arc::clone(&dispatcher);
    let _api_thread = thread::spawn(move || {
        get_tokio_runtime().block_on(async {
            if let Err(e) = api::start_rocket_server(dispatcher_for_server, port).await {
                error!("API server error: {}", e);
            }
        });
    });

    info!("Waiting for webhooks on port {}", port);

    // Keep the main thread alive until Ctrl+C is received
    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));
    }

    info!("Exiting application");
}

/// Build the dispatcher from the configuration, resolving a Last.fm
/// session for each user.
fn build_dispatcher(store: &Arc<ConfigStore>) -> Result<Dispatcher, String> {
    let config = store.snapshot();
    let mut dispatcher = Dispatcher::new();

    for (account, user) in &config.users {
        let (api_key, api_secret) = config.credentials_for(account).ok_or_else(|| {
            format!(
                "No Last.fm API credentials for user '{}' (set per-user keys or a shared lastfm section)",
                account
            )
        })?;

        let mut client = LastfmClient::new(api_key, api_secret, user.session_key.clone())
            .map_err(|e| format!("Failed to create Last.fm client for '{}': {}", account, e))?;

        match session::resolve_session(&mut client, &session::ThreadSleep, None) {
            Ok((session_key, username)) => {
                // Persist newly obtained session keys so restarts skip the handshake
                if user.session_key.as_deref() != Some(session_key.as_str()) {
                    if let Err(e) = store.set_session_key(account, &session_key) {
                        warn!("Failed to persist session key for '{}': {}", account, e);
                    }
                }
                if username.is_empty() {
                    info!("Last.fm session ready for '{}'", account);
                } else {
                    info!(
                        "Last.fm session ready for '{}' (Last.fm user: {})",
                        account, username
                    );
                }
            }
            Err(e) => {
                return Err(format!(
                    "Last.fm authorization failed for '{}': {}",
                    account, e
                ));
            }
        }

        let sink = LastfmScrobbler::new(account.clone(), client, Arc::clone(store));
        dispatcher.add_user(account, user.scrobble, Arc::new(sink) as Arc<dyn ScrobbleSink>);
    }

    Ok(dispatcher)
}

/// Find config file path from command line arguments (-c option)
fn find_config_file_in_args(args: &[String]) -> Option<String> {
    let mut i = 1;
    while i < args.len() {
        if args[i] == "-c" && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
        i += 1;
    }
    None
}

/// Find logging config file path from command line arguments (--log-config option)
fn find_log_config_in_args(args: &[String]) -> Option<PathBuf> {
    let mut i = 1;
    while i < args.len() {
        if (args[i] == "--log-config" || args[i] == "--logging-config") && i + 1 < args.len() {
            return Some(PathBuf::from(&args[i + 1]));
        }
        i += 1;
    }

    // Check for default logging config files
    let default_paths = ["/etc/plexfm/logging.json", "logging.json"];

    for path_str in &default_paths {
        let path = PathBuf::from(path_str);
        if path.exists() {
            return Some(path);
        }
    }

    None
}

/// Print help information for command line usage
fn print_help() {
    println!("plexfm - Plex webhook to Last.fm scrobble forwarder");
    println!("===================================================");
    println!();
    println!("USAGE:");
    println!("    plexfm [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -c <FILE>                   Specify configuration file path");
    println!("                                (default: plexfm.json)");
    println!();
    println!("    --log-config <FILE>         Specify logging configuration file");
    println!("    --logging-config <FILE>     (alternative form)");
    println!("                                Defaults searched in order:");
    println!("                                - /etc/plexfm/logging.json");
    println!("                                - logging.json");
    println!();
    println!("    -d, --debug                 Enable debug logging");
    println!("    -v, --verbose               (alternative form)");
    println!();
    println!("    -h, --help                  Show this help message");
    println!();
    println!("Point a Plex webhook at http://<host>:<listen_port>/webhook and");
    println!("configure each Plex account name under \"users\" in the config file.");
}
