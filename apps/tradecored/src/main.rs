//! tradecored: the matching engine daemon
//!
//! Usage: `tradecored [config_file]`. Without an argument the config is
//! searched at `./tradecore.toml`, `/etc/tradecore/tradecore.toml`, then
//! `$HOME/.config/tradecore/tradecore.toml`; when none exists the built-in
//! default document is used. Exits 1 on validation or transport bind
//! failure, 0 on graceful shutdown.

use api::{ApiRouter, NodeStateProvider};
use auth::{Authenticator, FrameAuthenticator};
use config::EngineConfig;
use engine::{Coordinator, CoordinatorConfig};
use funding::MarketFundingConfig;
use ingest::pipeline::{IngressPipeline, PipelineConfig};
use ingest::transport::{Transport, UdpTransport};
use matcher::MatcherConfig;
use parking_lot::Mutex;
use persistence::snapshot::Store;
use persistence::wal::Writer;
use risk::MarketRiskConfig;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemetry::TelemetrySink;
use tracing::{error, info, warn};
use types::ids::{AccountId, MarketId};

const IDLE_SLEEP: Duration = Duration::from_millis(10);
const STATUS_INTERVAL: Duration = Duration::from_secs(1);
const FUNDING_SETTLE_INTERVAL: Duration = Duration::from_secs(60);
const TURN_LATENCY_METRIC: u64 = 1;

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() > 2 {
        eprintln!("Usage: {} [config_file]", args[0]);
        eprintln!("  config_file: Path to TOML configuration file");
        eprintln!("               If not specified, uses ./tradecore.toml or generated defaults");
        return 1;
    }

    let cfg = match load_config(&args) {
        Ok(cfg) => cfg,
        Err(code) => return code,
    };

    info!(
        endpoint = %cfg.transport.endpoint,
        markets = cfg.markets.len(),
        wal_path = %cfg.persistence.wal_path.display(),
        "config loaded"
    );

    // Signature verification for signed frames. Until a key store exists,
    // a development keypair is generated and registered for account 1.
    // TODO: load account public keys from config or a key store
    let authenticator = Arc::new(Authenticator::new());
    let (_signing_key, verifying_key) = auth::generate_keypair();
    authenticator.register_account(AccountId(1), verifying_key.as_bytes());
    info!(accounts = authenticator.account_count(), "authenticator ready");

    let verifier = FrameAuthenticator::new(Arc::clone(&authenticator)).into_verifier();
    let (pipeline, receiver) = IngressPipeline::new(
        PipelineConfig {
            new_order_queue_depth: cfg.ingress.new_order_queue_depth,
            cancel_queue_depth: cfg.ingress.cancel_queue_depth,
            replace_queue_depth: cfg.ingress.replace_queue_depth,
            max_new_orders_per_second: cfg.ingress.max_new_orders_per_second,
            max_cancels_per_second: cfg.ingress.max_cancels_per_second,
            max_replaces_per_second: cfg.ingress.max_replaces_per_second,
        },
        Some(verifier),
    );

    // The transport thread is the single producer; the engine thread below
    // is the single consumer.
    let pipeline = Arc::new(Mutex::new(pipeline));
    let transport = Arc::new(Mutex::new(UdpTransport::new()));
    {
        let pipeline = Arc::clone(&pipeline);
        let callback = Arc::new(move |frame: ingest::frame::Frame<'_>| {
            pipeline.lock().submit(frame);
        });
        if let Err(e) = transport.lock().start(&cfg.transport.endpoint, callback) {
            error!(endpoint = %cfg.transport.endpoint, error = %e, "failed to start transport");
            return 1;
        }
    }

    if let Err(e) = std::fs::create_dir_all(&cfg.persistence.snapshot_dir) {
        error!(error = %e, "failed to create snapshot directory");
        return 1;
    }
    if let Some(parent) = cfg.persistence.wal_path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            error!(error = %e, "failed to create WAL directory");
            return 1;
        }
    }

    let wal = match Writer::open(&cfg.persistence.wal_path, cfg.persistence.wal_flush_threshold) {
        Ok(wal) => wal,
        Err(e) => {
            error!(error = %e, "failed to open WAL");
            return 1;
        }
    };
    let snapshot = match Store::new(&cfg.persistence.snapshot_dir) {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "failed to open snapshot store");
            return 1;
        }
    };

    let router = Arc::new(ApiRouter::default());
    for endpoint in ["/orders", "/express-feed", "/trade-metadata", "/state-root"] {
        router.register_endpoint(endpoint);
    }

    let default_market = cfg
        .markets
        .first()
        .map(|market| MarketId(market.id))
        .unwrap_or(MarketId(1));

    let mut coordinator = Coordinator::new(
        CoordinatorConfig {
            default_market,
            snapshot_interval: 256,
            signed_payloads: true,
            matcher: MatcherConfig {
                arena_bytes: cfg.matcher.arena_bytes,
            },
        },
        receiver,
        wal,
        snapshot,
        Arc::clone(&router),
    );

    for market_cfg in &cfg.markets {
        let market = MarketId(market_cfg.id);
        info!(id = market_cfg.id, symbol = %market_cfg.symbol, "configuring market");
        coordinator.configure_market(
            market,
            MarketRiskConfig {
                contract_size: market_cfg.risk.contract_size,
                initial_margin_bp: market_cfg.risk.initial_margin_bp,
                maintenance_margin_bp: market_cfg.risk.maintenance_margin_bp,
            },
            market_cfg.risk.initial_mark_price,
            MarketFundingConfig {
                clamp_bp: i64::from(market_cfg.funding.clamp_bp),
                max_rate_bp: market_cfg.funding.max_rate_bp,
            },
        );
    }

    if let Ok(raw) = std::env::var("MONMOUTH_CHAIN_ID") {
        match parse_chain_id(&raw) {
            Some(chain_id) => coordinator.set_chain_id(chain_id),
            None => {
                error!(value = %raw, "invalid MONMOUTH_CHAIN_ID value");
                return 1;
            }
        }
    }

    match coordinator.recover(&cfg.persistence.snapshot_dir, &cfg.persistence.wal_path) {
        Ok(applied) if applied > 0 => info!(applied, "replayed events from WAL"),
        Ok(_) => {}
        Err(e) => {
            error!(error = %e, "recovery failed");
            return 1;
        }
    }

    let chain_id = coordinator.chain_id_handle();
    let block_number = coordinator.block_number_handle();
    let transport_for_peers = Arc::clone(&transport);
    let transport_for_health = Arc::clone(&transport);
    router.set_node_state_provider(NodeStateProvider {
        chain_id: Some(Box::new(move || chain_id.load(Ordering::Relaxed))),
        block_number: Some(Box::new(move || block_number.load(Ordering::Relaxed))),
        peer_connections: Some(Box::new(move || {
            transport_for_peers.lock().stats().connections_active
        })),
        healthy: Some(Box::new(move || transport_for_health.lock().is_running())),
    });
    info!(chain_id = %router.rpc_result("eth_chainId"), "rpc surface ready");

    let sink = cfg.telemetry.enabled.then(TelemetrySink::new);

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        if let Err(e) = ctrlc::set_handler(move || shutdown.store(true, Ordering::Relaxed)) {
            error!(error = %e, "failed to install signal handler");
            return 1;
        }
    }

    info!("tradecored bootstrapped, entering event loop");

    let mut exit_code = 0;
    let mut last_status = Instant::now();
    let mut last_funding_settle = Instant::now();
    let block_number = coordinator.block_number_handle();

    while !shutdown.load(Ordering::Relaxed) {
        let turn_start = Instant::now();
        match coordinator.run_turn() {
            Ok(0) => std::thread::sleep(IDLE_SLEEP),
            Ok(_) => {
                if let Some(sink) = &sink {
                    sink.record_latency(TURN_LATENCY_METRIC, turn_start.elapsed());
                }
            }
            Err(e) => {
                // Durability is broken; stop accepting events
                error!(error = %e, "event loop failure");
                exit_code = 1;
                break;
            }
        }

        let now = Instant::now();
        if now.duration_since(last_status) >= STATUS_INTERVAL {
            coordinator.sweep_all_liquidations();

            let stats = transport.lock().stats();
            let ingress = pipeline.lock().stats();
            info!(
                block = block_number.load(Ordering::Relaxed),
                ingress_accepted = ingress.accepted,
                frames = stats.frames_received,
                peers = stats.connections_active,
                wal_next = coordinator.wal_next_sequence(),
                "status"
            );
            if let Some(sink) = &sink {
                for summary in sink.drain_latency() {
                    info!(
                        metric = summary.id,
                        count = summary.count,
                        mean_ns = summary.mean_ns,
                        p99_ns = summary.p99_ns,
                        "turn latency"
                    );
                }
            }
            last_status = now;
        }

        if now.duration_since(last_funding_settle) >= FUNDING_SETTLE_INTERVAL {
            let payments = coordinator.settle_funding();
            if !payments.is_empty() {
                info!(payments = payments.len(), "funding settled");
            }
            last_funding_settle = now;
        }
    }

    info!("shutting down, flushing state");
    transport.lock().stop();
    if let Err(e) = coordinator.sync() {
        warn!(error = %e, "final WAL sync failed");
        exit_code = 1;
    }
    exit_code
}

fn load_config(args: &[String]) -> Result<EngineConfig, i32> {
    let explicit = args.get(1).map(PathBuf::from);
    let config_path = explicit.or_else(find_config_path);

    match config_path {
        Some(path) => {
            info!(path = %path.display(), "loading config");
            EngineConfig::load(&path).map_err(|e| {
                error!(error = %e, "config load failed");
                1
            })
        }
        None => {
            info!("no config file found, using defaults");
            EngineConfig::load_from_str(&EngineConfig::generate_default()).map_err(|e| {
                error!(error = %e, "default config failed to load");
                1
            })
        }
    }
}

fn find_config_path() -> Option<PathBuf> {
    let mut candidates = vec![
        PathBuf::from("./tradecore.toml"),
        PathBuf::from("/etc/tradecore/tradecore.toml"),
    ];
    if let Ok(home) = std::env::var("HOME") {
        candidates.push(PathBuf::from(home).join(".config/tradecore/tradecore.toml"));
    }
    candidates.into_iter().find(|path| path.exists())
}

/// Accepts decimal or 0x-prefixed hex, like `strtoull(_, _, 0)`.
fn parse_chain_id(raw: &str) -> Option<u64> {
    if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        raw.parse().ok()
    }
}
