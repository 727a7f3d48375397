mod api;
mod callback;
mod llm;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use snare_engine::{
    EngineConfig, Notifier, Orchestrator, Persistence, ReplyGenerator, SqlitePersistence,
    TypingDelay,
};
use snare_storage::IntelStore;
use std::{
    fs::OpenOptions,
    io::{self, Write},
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

use crate::api::AppState;
use crate::callback::{HttpNotifier, DEFAULT_CALLBACK_TIMEOUT};
use crate::llm::{ChatCompletionGenerator, LlmConfig, DEFAULT_BASE_URL, DEFAULT_MODEL};

const DEFAULT_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_DB_PATH: &str = "honeypot_intel.db";
const REAPER_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
struct Config {
    addr: String,
    api_key: String,
    db_path: String,
    llm_api_key: String,
    llm_base_url: String,
    llm_model: String,
    callback_url: String,
    typing_delay: bool,
    idle_minutes: u64,
    debug: bool,
    log_dir: String,
}

#[derive(Parser, Debug)]
#[command(name = "snare-server")]
struct Args {
    #[arg(long, default_value = "")]
    addr: String,
    #[arg(long, default_value = "")]
    api_key: String,
    #[arg(long, default_value = "")]
    db_path: String,
    #[arg(long, default_value = "")]
    llm_api_key: String,
    #[arg(long, default_value = "")]
    llm_base_url: String,
    #[arg(long, default_value = "")]
    llm_model: String,
    #[arg(long, default_value = "")]
    callback_url: String,
    #[arg(long, default_value_t = false)]
    typing_delay: bool,
    #[arg(long, default_value_t = 120)]
    idle_minutes: u64,
    #[arg(long, default_value_t = false)]
    debug: bool,
    #[arg(long, default_value = "")]
    log_dir: String,
}

#[tokio::main]
async fn main() {
    let config = load_config();
    let _log_guard = init_logging(&config);
    if let Err(err) = run(config).await {
        error!(event = "server_error", error = %format!("{err:#}"));
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    if config.api_key.is_empty() {
        anyhow::bail!("an API key is required (--api-key or SNARE_API_KEY)");
    }
    let addr: SocketAddr = config
        .addr
        .parse()
        .with_context(|| format!("invalid addr {}", config.addr))?;

    let store = IntelStore::open(&config.db_path)
        .with_context(|| format!("open intelligence store {}", config.db_path))?;
    let store = Arc::new(SqlitePersistence::new(store));

    let generator: Option<Arc<dyn ReplyGenerator>> = if config.llm_api_key.is_empty() {
        warn!(event = "llm_disabled", reason = "no api key, replies use fallbacks");
        None
    } else {
        let mut llm = LlmConfig::new(config.llm_api_key.clone());
        llm.base_url = config.llm_base_url.clone();
        llm.model = config.llm_model.clone();
        let generator = ChatCompletionGenerator::new(llm).context("build llm client")?;
        info!(event = "llm_enabled", model = %generator.model());
        Some(Arc::new(generator))
    };

    let notifier: Option<Arc<dyn Notifier>> = if config.callback_url.is_empty() {
        None
    } else {
        let notifier = HttpNotifier::new(config.callback_url.clone(), DEFAULT_CALLBACK_TIMEOUT)
            .context("build callback client")?;
        info!(event = "callback_enabled", url = %notifier.url());
        Some(Arc::new(notifier))
    };

    let mut engine = EngineConfig::default();
    if config.typing_delay {
        engine.typing_delay = Some(TypingDelay::default());
    }
    let persistence: Arc<dyn Persistence> = store.clone();
    let orchestrator = Orchestrator::new(engine, generator, persistence, notifier);
    let state = Arc::new(AppState {
        orchestrator,
        store,
        api_key: config.api_key.clone(),
    });
    start_idle_reaper(state.clone(), config.idle_minutes);

    let app = api::router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(event = "server_start", addr = %addr, db_path = %config.db_path);

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!(event = "server_shutdown");
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("serve")?;
    Ok(())
}

fn start_idle_reaper(state: Arc<AppState>, idle_minutes: u64) {
    if idle_minutes == 0 {
        return;
    }
    let idle = chrono::Duration::minutes(idle_minutes as i64);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(REAPER_INTERVAL);
        loop {
            ticker.tick().await;
            let evicted = state
                .orchestrator
                .registry()
                .evict_idle(Utc::now() - idle)
                .await;
            for session_id in evicted {
                info!(event = "session_evicted", session_id = %session_id);
            }
        }
    });
}

fn load_config() -> Config {
    let args = Args::parse();
    Config {
        addr: resolve(&args.addr, "SNARE_ADDR", DEFAULT_ADDR),
        api_key: resolve(&args.api_key, "SNARE_API_KEY", ""),
        db_path: resolve(&args.db_path, "SNARE_DB_PATH", DEFAULT_DB_PATH),
        llm_api_key: resolve(&args.llm_api_key, "GROQ_API_KEY", ""),
        llm_base_url: resolve(&args.llm_base_url, "SNARE_LLM_BASE_URL", DEFAULT_BASE_URL),
        llm_model: resolve(&args.llm_model, "SNARE_LLM_MODEL", DEFAULT_MODEL),
        callback_url: resolve(&args.callback_url, "SNARE_CALLBACK_URL", ""),
        typing_delay: args.typing_delay || env_true("SNARE_TYPING_DELAY"),
        idle_minutes: args.idle_minutes,
        debug: args.debug || env_true("SNARE_DEBUG"),
        log_dir: resolve(&args.log_dir, "SNARE_LOG_DIR", ""),
    }
}

/// Flag value, else environment variable, else default.
fn resolve(flag: &str, env_key: &str, default: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.trim().to_string();
    }
    match std::env::var(env_key) {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => default.to_string(),
    }
}

fn init_logging(config: &Config) -> Option<LogGuard> {
    let level = if config.debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("SNARE_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let writer = match open_log_file(&config.log_dir) {
        Ok(log_guard) => log_guard,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }
    };
    let file = writer.file.clone();
    let make_writer = BoxMakeWriter::new(move || MultiWriter::new(file.clone()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(writer)
}

struct LogGuard {
    file: Option<Arc<Mutex<std::fs::File>>>,
}

struct MultiWriter {
    stdout: io::Stdout,
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl MultiWriter {
    fn new(file: Option<Arc<Mutex<std::fs::File>>>) -> Self {
        Self {
            stdout: io::stdout(),
            file,
        }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.stdout.write_all(buf);
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.stdout.flush();
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
        Ok(())
    }
}

fn open_log_file(log_dir: &str) -> io::Result<LogGuard> {
    if log_dir.trim().is_empty() {
        return Ok(LogGuard { file: None });
    }
    let dir = PathBuf::from(log_dir);
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(format!("snare-server-{}.log", Utc::now().format("%Y%m%d")));
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
    })
}

fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}
