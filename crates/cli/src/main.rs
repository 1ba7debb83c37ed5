use std::{sync::Arc, time::Duration};

use {
    clap::Parser,
    sqlx::SqlitePool,
    tokio::net::TcpListener,
    tracing::{error, info},
    tracing_subscriber::EnvFilter,
};

use {
    parley_bus::{
        DurableBus, EphemeralBus, JetStreamBus, KeyValueStore, MemoryDurableBus,
        MemoryEphemeralBus, MemoryKv, RedisBus,
    },
    parley_chats::{ChatService, LocalChatService, SqliteChatStore},
    parley_config::ParleyConfig,
    parley_gateway::{GatewayServices, GatewayState, fanout},
    parley_messages::{
        DisappearingSweeper, LocalMessageService, MessageService, SqliteMessageStore,
    },
};

#[derive(Parser)]
#[command(name = "parley", about = "Parley — real-time messaging delivery core")]
struct Cli {
    /// Address to bind to (overrides config value).
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on (overrides config value).
    #[arg(long)]
    port: Option<u16>,

    /// Path to a config file (otherwise standard locations are searched).
    #[arg(long, env = "PARLEY_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, default_value_t = false)]
    json_logs: bool,

    /// Run against in-memory bus/store backends (single node, no NATS or
    /// Redis required). For development and tests.
    #[arg(long, default_value_t = false)]
    in_memory: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    if let Err(e) = run(cli).await {
        error!(error = %e, "fatal");
        // Dependency unavailable at startup (store/bus unreachable) or a
        // bind failure: exit non-zero so supervisors restart us.
        std::process::exit(1);
    }
}

fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if cli.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => parley_config::load_config(path)?,
        None => parley_config::discover_and_load(),
    };
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let (durable, ephemeral, kv): (
        Arc<dyn DurableBus>,
        Arc<dyn EphemeralBus>,
        Arc<dyn KeyValueStore>,
    ) = if cli.in_memory {
        info!("using in-memory bus and key/value backends");
        (
            Arc::new(MemoryDurableBus::new()),
            Arc::new(MemoryEphemeralBus::new()),
            Arc::new(MemoryKv::new()),
        )
    } else {
        let jetstream = JetStreamBus::connect(&config.nats.url).await?;
        let redis = RedisBus::connect(&config.redis.url).await?;
        let kv = redis.kv();
        (Arc::new(jetstream), Arc::new(redis), Arc::new(kv))
    };

    let database_url = if cli.in_memory {
        "sqlite::memory:".to_string()
    } else {
        config.database.url.clone()
    };
    let pool = SqlitePool::connect(&database_url).await?;
    SqliteChatStore::init(&pool).await?;
    SqliteMessageStore::init(&pool).await?;

    let chats: Arc<dyn ChatService> = Arc::new(LocalChatService::new(
        Arc::new(SqliteChatStore::new(pool.clone())),
        durable.clone(),
    ));
    let message_store = Arc::new(SqliteMessageStore::new(pool));
    let messages: Arc<dyn MessageService> = Arc::new(LocalMessageService::new(
        message_store.clone(),
        chats.clone(),
        durable.clone(),
    ));

    let verifier = Arc::new(parley_gateway::auth::HttpAuthVerifier::new(
        config.auth.verify_url.clone(),
    ));
    let state = GatewayState::new(
        &config,
        GatewayServices { messages, chats },
        durable,
        ephemeral,
        kv,
        Some(verifier),
    );

    fanout::start(Arc::clone(&state)).await?;

    let sweeper = DisappearingSweeper::new(
        message_store,
        Duration::from_secs(config.sweeper.interval_secs),
    );
    tokio::spawn(sweeper.run(state.shutdown.clone()));

    // SIGINT/SIGTERM trigger the shared shutdown token; the server closes
    // every socket with "going away" and drains before returning.
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    parley_gateway::run(state, listener).await
}
