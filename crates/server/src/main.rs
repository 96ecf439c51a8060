use fly_server::Server;
use fly_server::config::{ConfigError, Configuration, DEFAULT_CONFIG_PATH};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

fn main() -> ExitCode {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let explicit = std::env::args_os().nth(1).map(PathBuf::from);
    let configuration = match load_configuration(explicit) {
        Ok(configuration) => configuration,
        Err(e) => {
            error!(cause = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let server = match Server::builder().handle_signals(true).build() {
        Ok(server) => server,
        Err(e) => {
            error!(cause = %e, "failed to create server");
            return ExitCode::FAILURE;
        }
    };

    match server.start(configuration.server) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(cause = %e, "server failed");
            ExitCode::FAILURE
        }
    }
}

/// An explicit path must exist; the default one falls back to the built-in defaults.
fn load_configuration(explicit: Option<PathBuf>) -> Result<Configuration, ConfigError> {
    if let Some(path) = explicit {
        return Configuration::load(path);
    }

    let path = PathBuf::from(DEFAULT_CONFIG_PATH);
    if path.exists() {
        Configuration::load(path)
    } else {
        info!(path = %path.display(), "no configuration file, using defaults");
        Ok(Configuration::default())
    }
}
