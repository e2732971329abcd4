use clap::Parser;

/// Pharmacy stock tracker CLI arguments
#[derive(Debug, Parser)]
#[command(
    name = "pharmacy-stock-tracker",
    version,
    about = "Pharmacy inventory ledger with expiry and low-stock alerting"
)]
pub struct Cli {
    /// HTTP listen port
    #[arg(long)]
    pub port: Option<u16>,

    /// SQLite database URL
    #[arg(long)]
    pub database_url: Option<String>,

    /// Alert sweep interval in seconds
    #[arg(long)]
    pub sweep_interval: Option<u64>,

    /// Days-to-expiry threshold for expiring-soon alerts
    #[arg(long)]
    pub expiry_threshold: Option<i64>,

    /// Quantity threshold for low-stock alerts
    #[arg(long)]
    pub low_stock_threshold: Option<i64>,
}
