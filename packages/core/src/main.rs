use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;

use pharmacy_stock_tracker::alerts::dispatch::{DispatchConfig, Dispatcher};
use pharmacy_stock_tracker::alerts::engine::AlertEngine;
use pharmacy_stock_tracker::api::{self, AppState};
use pharmacy_stock_tracker::cli::Cli;
use pharmacy_stock_tracker::config::Config;
use pharmacy_stock_tracker::db;
use pharmacy_stock_tracker::dispense::DispenseService;
use pharmacy_stock_tracker::ledger::StockLedger;
use pharmacy_stock_tracker::logging::init_logging;
use pharmacy_stock_tracker::metrics::AppMetrics;
use pharmacy_stock_tracker::repository::{
    AlertRepository, PatientRepository, PrescriptionRepository, SaleRepository, StockRepository,
};
use pharmacy_stock_tracker::scheduler::{self, SweepSettings};
use pharmacy_stock_tracker::services::mailer::{ConsoleNotifier, Notifier, SmtpNotifier};

#[tokio::main]
async fn main() {
    dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    let config = Config::from_env()
        .map(|c| c.apply_cli(&cli))
        .unwrap_or_else(|err| {
            tracing::error!("{}", err);
            std::process::exit(1);
        });

    tracing::info!("Service started with config: {:?}", config);

    let pool = db::create_pool(&config.database_url)
        .await
        .unwrap_or_else(|err| {
            tracing::error!("Failed to open database {}: {}", config.database_url, err);
            std::process::exit(1);
        });

    let stock = StockRepository::new(pool.clone());
    let alerts = AlertRepository::new(pool.clone());
    let prescriptions = PrescriptionRepository::new(pool.clone());
    let patients = PatientRepository::new(pool.clone());
    let sales = SaleRepository::new(pool);

    let metrics = Arc::new(AppMetrics::new().unwrap_or_else(|err| {
        tracing::error!("Failed to register metrics: {}", err);
        std::process::exit(1);
    }));

    let notifier: Arc<dyn Notifier> = match &config.smtp {
        Some(settings) => match SmtpNotifier::new(settings) {
            Ok(notifier) => Arc::new(notifier),
            Err(err) => {
                tracing::error!("{}", err);
                std::process::exit(1);
            }
        },
        None => {
            tracing::warn!("SMTP not configured - emails will be logged to the console");
            Arc::new(ConsoleNotifier)
        }
    };

    let engine = Arc::new(AlertEngine::new(stock.clone(), alerts.clone()));
    let ledger = Arc::new(StockLedger::new(stock.clone(), engine.clone()));

    let dispatcher = Arc::new(Dispatcher::new(
        alerts,
        prescriptions.clone(),
        patients.clone(),
        notifier.clone(),
        DispatchConfig {
            pharmacy_email: config.pharmacy_email.clone(),
            admin_email: config.admin_email.clone(),
            site_base: config.site_base.clone(),
        },
        metrics.clone(),
    ));
    let dispatch = dispatcher.spawn();

    let dispense = Arc::new(DispenseService::new(
        ledger.clone(),
        stock.clone(),
        prescriptions.clone(),
        patients.clone(),
        sales,
        engine.clone(),
        notifier,
        config.expiry_threshold_days,
    ));

    let sweep = SweepSettings {
        expiry_threshold_days: config.expiry_threshold_days,
        low_stock_threshold: config.low_stock_threshold,
        interval_seconds: config.sweep_interval_seconds,
    };

    let state = AppState {
        engine: engine.clone(),
        ledger,
        dispense,
        dispatch: dispatch.clone(),
        stock,
        prescriptions,
        patients,
        metrics: metrics.clone(),
        sweep,
    };
    let app = api::router(state);

    // The sweep loop owns Ctrl+C handling; its first tick fires immediately.
    tokio::spawn(scheduler::run_alert_sweeps(engine, dispatch, metrics, sweep));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|err| {
            tracing::error!("Failed to bind {}: {}", addr, err);
            std::process::exit(1);
        });

    tracing::info!("Listening on {}", addr);
    if let Err(err) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", err);
    }
}
