/// Convoflow service entry point
///
/// Loads configuration from the environment, opens the database, loads the
/// active flows and runs the resumption scheduler until Ctrl-C.

use convoflow::{config::Config, service::start_service};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Defaults to ./data/convoflow.db and a 15 second sweep
    let config = Config::default();

    start_service(config).await?;

    Ok(())
}
