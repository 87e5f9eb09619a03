use std::process::ExitCode;

use coro_web::config::{ConfigError, USAGE};
use coro_web::{Server, ServerConfig};
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

fn main() -> ExitCode {
    let config = match ServerConfig::from_args(std::env::args().skip(1)) {
        Ok(config) => config,
        Err(ConfigError::Help) => {
            println!("{USAGE}");
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("{e}\n\n{USAGE}");
            return ExitCode::from(2);
        }
    };

    let subscriber = FmtSubscriber::builder().with_max_level(config.log_level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
        return ExitCode::FAILURE;
    }

    let server = match Server::bind(&config) {
        Ok(server) => server,
        Err(e) => {
            error!(cause = %e, "bind server error");
            return ExitCode::FAILURE;
        }
    };

    info!(addrs = ?server.local_addrs(), "server started");
    match server.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(cause = %e, "server stopped");
            ExitCode::FAILURE
        }
    }
}
