use queue_adapter_cli::{run_cli, CliError};
use tracing::error;

#[tokio::main]
async fn main() {
    // Run CLI and handle errors
    if let Err(e) = run_cli().await {
        match &e {
            // No subscriber is installed when logging setup itself failed
            CliError::Logging { .. } => eprintln!("CLI error: {}", e),
            _ => error!("CLI error: {}", e),
        }

        std::process::exit(e.exit_code());
    }
}
