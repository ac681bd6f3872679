mod cli;

use clap::Parser;
use colored::Colorize;
use runchat::{config::load_config, logging::init_tracing, RunClient};
use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Cli::parse();
    let mut config = load_config();
    args.apply(&mut config);
    init_tracing(config.debug);

    if config.api_key.trim().is_empty() {
        println!(
            "{}",
            "No bearer token found. Set USER_JWT_ACCESS_TOKEN or RUNCHAT_API_KEY.".red()
        );
        std::process::exit(2);
    }

    let client = RunClient::new(config.client_config())?;

    let result = match args.command {
        Some(Command::Health) => cli::health(&client).await,
        Some(Command::Assistants) => cli::list_assistants(&client).await,
        Some(Command::Send { message }) => {
            let client = cli::ensure_assistant(&mut config, client).await;
            cli::send(&config, &client, &message.join(" ")).await
        }
        None => {
            let client = cli::ensure_assistant(&mut config, client).await;
            return cli::run_cli(config, client).await;
        }
    };

    if let Err(e) = result {
        println!("{}", format!("Error: {}", e).red());
        std::process::exit(1);
    }
    Ok(())
}
