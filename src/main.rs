use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use divisa::core::log::{LogStyle, init_logging};

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl From<Commands> for divisa::AppCommand {
    fn from(cmd: Commands) -> divisa::AppCommand {
        match cmd {
            Commands::Serve => divisa::AppCommand::Serve,
            Commands::Convert {
                operation,
                currency,
                amount,
            } => divisa::AppCommand::Convert {
                operation,
                currency,
                amount,
            },
            Commands::Rates => divisa::AppCommand::Rates,
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Run the HTTP API
    Serve,
    /// Convert an amount to MXN, e.g. `divisa convert buy USD 300`
    Convert {
        /// buy or sell (compra/comprar and venta/vender also work)
        operation: String,
        /// Currency code: USD, EUR, CAD, GBP or JPY
        currency: String,
        /// Amount in the foreign currency
        amount: String,
    },
    /// Show current buy/sell rates for every supported currency
    Rates,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let style = match cli.command {
        Some(Commands::Serve) => LogStyle::Server,
        _ => LogStyle::Cli,
    };
    init_logging(cli.verbose, style);

    let result = match cli.command {
        Some(Commands::Setup) => divisa::cli::setup::setup(),
        Some(cmd) => divisa::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
