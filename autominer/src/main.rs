use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use clap::{Arg, ArgAction, Command};
use commonware_runtime::{tokio, Metrics, Runner, Spawner};
use futures::future::{self, Either};
use motherlode_autominer::{
    control, engine,
    ledger::RpcLedger,
    sequencer::NoSigner,
    Config,
};
use motherlode_client::{Client, PriceFeed};
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
};
use tracing::{error, info, warn};

async fn metrics_handler(
    State(context): State<Arc<tokio::Context>>,
) -> Result<Response<Body>, StatusCode> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
        .body(Body::from(context.encode()))
        .map_err(|err| {
            error!("metrics response build failed: {err}");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

fn spawn_metrics_server(context: tokio::Context, addr: SocketAddr) {
    let state = Arc::new(context.clone());
    context.with_label("metrics").spawn(move |_context| async move {
        let listener = match ::tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(err) => {
                error!("metrics server bind failed on {addr}: {err}");
                return;
            }
        };
        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(state);
        if let Err(err) = axum::serve(listener, app.into_make_service()).await {
            error!("metrics server failed on {addr}: {err}");
        }
    });
}

fn main() {
    if let Err(err) = main_result() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn main_result() -> Result<()> {
    // Parse arguments
    let matches = Command::new("autominer")
        .about("Stakes the most profitable squares in the closing seconds of each round.")
        .arg(Arg::new("config").long("config").required(true))
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Emit structured JSON logs")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("check")
                .long("check")
                .help("Validate the config and exit")
                .action(ArgAction::SetTrue),
        )
        .get_matches();
    let json_logs = matches.get_flag("json-logs");

    // Load config
    let config_file = matches
        .get_one::<String>("config")
        .context("missing --config")?;
    let config_file = std::fs::read_to_string(config_file)
        .with_context(|| format!("Could not read config file {config_file}"))?;
    let config: Config =
        serde_yaml::from_str(&config_file).context("Could not parse config file")?;
    let config = config.validate().context("Invalid config")?;
    if matches.get_flag("check") {
        println!("{config:#?}");
        println!("config ok");
        return Ok(());
    }

    // Initialize runtime
    let cfg = tokio::Config::default()
        .with_tcp_nodelay(Some(true))
        .with_worker_threads(config.worker_threads)
        .with_catch_panics(true);
    let executor = tokio::Runner::new(cfg);

    // Start runtime
    executor.start(|context| async move {
        let context = context.with_label("autominer");
        let result: Result<()> = async {
            // Configure telemetry
            tokio::telemetry::init(
                context.with_label("telemetry"),
                tokio::telemetry::Logging {
                    level: config.log_level,
                    json: json_logs,
                },
                None,
                None,
            );
            info!(?config, "loaded config");

            if let Some(port) = config.metrics_port {
                spawn_metrics_server(
                    context.clone(),
                    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
                );
            }

            let client = Client::new(&config.rpc_url, config.ws_url.as_deref())
                .context("Failed to create ledger client")?;
            let ledger = RpcLedger::new(client, config.program_id);
            let prices = PriceFeed::new(&config.price_feed_url)
                .context("Failed to create price feed")?;
            if !config.automation.dry_run {
                warn!("no signer configured; deployments will be skipped");
            }

            let (engine, mailbox, status) = engine::Engine::new(
                context.with_label("engine"),
                engine::Config {
                    ledger,
                    prices,
                    submitter: None::<NoSigner>,
                    automation: config.automation,
                    ore_mint: config.ore_mint.clone(),
                    sol_mint: config.sol_mint.clone(),
                    price_refresh: config.price_refresh,
                    mailbox_size: config.mailbox_size,
                    board_buffer: config.board_buffer,
                },
            );
            let engine = engine.start();
            let control = context.with_label("control").spawn({
                let mailbox = mailbox.clone();
                move |_| control::run(mailbox, status)
            });

            // Run until the user quits or the engine stops
            match future::select(Box::pin(engine), Box::pin(control)).await {
                Either::Left((result, _)) => {
                    if let Err(e) = result {
                        error!(?e, "engine failed");
                    }
                }
                Either::Right((Ok(true), _)) => {
                    info!("quit requested");
                }
                Either::Right((Ok(false), engine)) => {
                    // Without stdin the configured settings stay in effect
                    if let Err(e) = engine.await {
                        error!(?e, "engine failed");
                    }
                }
                Either::Right((Err(e), engine)) => {
                    error!(?e, "control surface failed");
                    if let Err(e) = engine.await {
                        error!(?e, "engine failed");
                    }
                }
            }
            drop(mailbox);
            Ok(())
        }
        .await;

        if let Err(e) = result {
            error!(?e, "autominer initialization failed");
        }
    });

    Ok(())
}
