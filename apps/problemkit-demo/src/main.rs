use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use axum::{Router, error_handling::HandleErrorLayer, extract::Path, routing::get};
use clap::Parser;
use http::StatusCode;
use problemkit::{
    ObjectResult, ProblemDetailsConfig, ProblemDetailsLayer, ProblemDetailsOptions, RuleRegistry,
};
use problemkit_errors::{Fault, ValidationErrors, categories};
use tracing_subscriber::EnvFilter;

/// Problem details demo server
#[derive(Parser)]
#[command(name = "problemkit-demo")]
#[command(about = "Demo API showing faults and error statuses rendered as problem details")]
#[command(version = "0.3.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // defaults -> YAML (if provided) -> env (PROBLEMKIT__*)
    let config = ProblemDetailsConfig::load(cli.config.as_deref())?;
    let options = ProblemDetailsOptions::from_config(registry(), &config)?;

    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, cli.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, environment = ?config.environment, "problemkit demo listening");

    axum::serve(listener, router(Arc::new(options)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("problemkit demo stopped");
    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}

fn registry() -> RuleRegistry {
    RuleRegistry::builder()
        .map_status(&categories::NOT_IMPLEMENTED, StatusCode::NOT_IMPLEMENTED)
        .map_status(&categories::INVALID_OPERATION, StatusCode::METHOD_NOT_ALLOWED)
        .map_status_with(
            &categories::VALIDATION,
            StatusCode::BAD_REQUEST,
            |ctx, fault, status, factory| {
                let errors = fault
                    .data::<ValidationErrors>()
                    .ok_or_else(|| anyhow::anyhow!("validation fault without field errors"))?;
                Ok(factory.create_validation_problem(ctx, errors, status))
            },
        )
        .ignore(&categories::CANCELED)
        .map_status(&categories::ANY, StatusCode::INTERNAL_SERVER_ERROR)
        .build()
}

fn property_errors() -> ValidationErrors {
    (1..=4)
        .map(|n| ("property", format!("This property's validation failed. - {n}")))
        .collect()
}

fn router(options: Arc<ProblemDetailsOptions>) -> Router {
    let api = Router::new()
        .route(
            "/status/{code}",
            get(|Path(code): Path<u16>| async move {
                StatusCode::from_u16(code).map_err(|e| Fault::from_error(&categories::ARGUMENT, &e))
            }),
        )
        .route(
            "/exception",
            get(|| async { Err::<(), _>(Fault::new(&categories::ANY, "This is a simple exception.")) }),
        )
        .route(
            "/exception/result",
            get(|| async {
                ObjectResult::fault(Fault::new(&categories::NOT_SUPPORTED, "Specified method is not supported."))
                    .with_status(StatusCode::BAD_REQUEST)
            }),
        )
        .route(
            "/exception/not-implemented",
            get(|| async {
                Err::<(), _>(Fault::new(
                    &categories::NOT_IMPLEMENTED,
                    "This is a not implemented exception.",
                ))
            }),
        )
        .route(
            "/exception/invalid-operation",
            get(|| async {
                Err::<(), _>(Fault::new(
                    &categories::INVALID_OPERATION,
                    "This is an invalid operation exception.",
                ))
            }),
        )
        .route(
            "/validation",
            get(|| async {
                ObjectResult::validation(
                    ValidationErrors::new().with_error("property", "This property's validation failed."),
                )
            }),
        )
        .route(
            "/validation/bad",
            get(|| async { ObjectResult::validation(property_errors()).with_status(StatusCode::BAD_REQUEST) }),
        )
        .route(
            "/validation/plain",
            get(|| async { ObjectResult::detail(StatusCode::BAD_REQUEST, "There was an error.") }),
        )
        .route(
            "/validation/exception",
            get(|| async {
                Err::<(), _>(
                    Fault::new(&categories::VALIDATION, "One or more validation errors occurred.")
                        .with_data(property_errors()),
                )
            }),
        );

    Router::new().nest("/api", api).layer(
        tower::ServiceBuilder::new()
            .layer(HandleErrorLayer::new(|fault: Fault| async move {
                tracing::warn!(category = %fault.category(), "fault propagated past problem details");
                (StatusCode::INTERNAL_SERVER_ERROR, fault.to_string())
            }))
            .layer(ProblemDetailsLayer::new(options)),
    )
}
