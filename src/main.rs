use colored::Colorize;
use vigia::cli::Cli;

#[tokio::main]
async fn main() {
    if let Err(e) = Cli::run().await {
        eprintln!("{} {:#}", "✗ Error:".red().bold(), e);
        std::process::exit(1);
    }
}
