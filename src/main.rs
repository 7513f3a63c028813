use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use paygate::activation::ActivationGuard;
use paygate::config::Config;
use paygate::db::{create_pool, init_db, queries, AppState};
use paygate::handlers;
use paygate::models::CreateCourse;
use paygate::payments::StripeClient;

#[derive(Parser, Debug)]
#[command(name = "paygate")]
#[command(about = "Payment and subscription reconciliation service")]
struct Cli {
    /// Seed the database with a dev course catalog
    #[arg(long)]
    seed: bool,

    /// Delete the database on exit (dev mode only, useful for fresh starts)
    #[arg(long)]
    ephemeral: bool,
}

/// Seeds the catalog with dev courses. Only runs in dev mode and when
/// the catalog is empty.
fn seed_dev_data(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");

    let existing = queries::list_courses(&conn).expect("Failed to list courses");
    if !existing.is_empty() {
        tracing::info!("Catalog already has data, skipping seed");
        return;
    }

    tracing::info!("============================================");
    tracing::info!("SEEDING DEV COURSES");
    tracing::info!("============================================");

    let fixtures = [
        CreateCourse {
            title: "Intro Course".to_string(),
            stripe_price_id: "price_dev_intro".to_string(),
            price_cents: 4900,
            access_days: 365,
        },
        CreateCourse {
            title: "Advanced Course".to_string(),
            stripe_price_id: "price_dev_advanced".to_string(),
            price_cents: 9900,
            access_days: 365,
        },
        CreateCourse {
            title: "Free Sampler".to_string(),
            stripe_price_id: "price_dev_free".to_string(),
            price_cents: 0,
            access_days: 0,
        },
    ];

    for input in &fixtures {
        let course = queries::create_course(&conn, input).expect("Failed to create dev course");
        tracing::info!(
            "Course: {} (id: {}, price: {} cents)",
            course.title,
            course.id,
            course.price_cents
        );
    }

    tracing::info!("============================================");
    tracing::info!("DEV COURSES SEEDED");
    tracing::info!("============================================");
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "paygate=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration. Missing processor secrets abort startup.
    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    });

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    let state = AppState {
        db: db_pool,
        stripe: StripeClient::new(&config.stripe_secret_key, &config.stripe_webhook_secret),
        activation: ActivationGuard::new(),
        base_url: config.base_url.clone(),
        success_url: config.success_url.clone(),
        cancel_url: config.cancel_url.clone(),
        tier_prices: config.tier_prices.clone(),
    };

    // Seed dev data if --seed flag is passed (only in dev mode)
    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set PAYGATE_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    let app = Router::new()
        .merge(handlers::router(&config.rate_limits))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    let cleanup_on_exit = cli.ephemeral && config.dev_mode;
    let db_path = config.database_path.clone();
    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: database will be deleted on exit");
    }

    tracing::info!("Paygate server listening on {}", addr);

    // into_make_service_with_connect_info enables IP-based rate limiting
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Failed to start server");

    if cleanup_on_exit {
        tracing::info!("Cleaning up ephemeral database...");
        if let Err(e) = std::fs::remove_file(&db_path) {
            tracing::warn!("Failed to remove {}: {}", db_path, e);
        } else {
            tracing::info!("Removed {}", db_path);
        }
        let _ = std::fs::remove_file(format!("{}-wal", db_path));
        let _ = std::fs::remove_file(format!("{}-shm", db_path));
        tracing::info!("Ephemeral cleanup complete");
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
