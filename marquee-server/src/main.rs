use log::error;
use marquee_server::{init_logger, level_from_env, run_server, ServerConfig};

#[tokio::main]
async fn main() {
    if let Err(err) = init_logger(level_from_env()) {
        eprintln!("Could not install logger: {}", err);
    }

    let config = ServerConfig::from_env();

    if let Err(err) = run_server(config).await {
        error!("{}", err);
        std::process::exit(1);
    }
}
