//! autobot — the statement-scraping supervisor binary.
//!
//! Startup sequence:
//!   1. Load settings from the environment
//!   2. Start the Messenger (dedicated delivery thread)
//!   3. Open the credential store
//!   4. Build the registry + supervisor over the WebDriver session factory
//!   5. Start the balance monitor (periodic task)
//!   6. Run the chat loop: long-poll commands, dispatch each as a task
//!
//! Teardown happens in reverse on Ctrl-C: stop all workers, stop the
//! monitor, flush and close the messenger.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use autobot_banks::PortalAdapters;
use autobot_browser::WebDriverFactory;
use autobot_captcha::TwoCaptcha;
use autobot_creds::CredStore;
use autobot_messenger::Messenger;
use autobot_monitor::{BalanceMonitor, BalanceSample, MonitorConfig, ThresholdLadder};
use autobot_sink::StatementSink;
use autobot_supervisor::{Deps, Registry, Supervisor};
use autobot_worker::WorkerTuning;

mod commands;
mod settings;
mod telegram;

use commands::{CommandCtx, Reply};
use settings::Settings;
use telegram::{TelegramPoller, TelegramTransport};

#[derive(Parser, Debug)]
#[command(
    name = "autobot",
    version,
    about = "Multi-tenant bank statement scraper with a chat front end"
)]
struct Args {
    /// Override the credentials CSV path from the environment.
    #[arg(long)]
    credentials_csv: Option<PathBuf>,

    /// Deliver every event immediately (no batching, keep all photos).
    #[arg(long)]
    debug_events: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,autobot=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    let mut settings = Settings::from_env().context("loading settings")?;
    if let Some(path) = args.credentials_csv {
        settings.credentials_csv = path;
    }
    info!("autobot starting");

    // The transport and the CAPTCHA solver carry blocking HTTP clients;
    // build them before the async runtime exists.
    let transport = TelegramTransport::new(&settings.telegram_token);
    let solver = if settings.two_captcha_key.is_empty() {
        None
    } else {
        Some(Arc::new(TwoCaptcha::new(&settings.two_captcha_key)))
    };

    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
    runtime.block_on(run(settings, args.debug_events, transport, solver))
}

async fn run(
    settings: Settings,
    debug_events: bool,
    transport: TelegramTransport,
    solver: Option<Arc<TwoCaptcha>>,
) -> anyhow::Result<()> {
    // ── Messenger ─────────────────────────────────────────────────────────────
    let messenger = Messenger::spawn(
        Box::new(transport),
        settings.telegram_chat_id,
        debug_events,
    );

    // ── Credential store ──────────────────────────────────────────────────────
    let creds = Arc::new(
        CredStore::open(&settings.credentials_csv).context("opening credential store")?,
    );

    // ── Supervisor over the WebDriver session factory ─────────────────────────
    let download_root = std::env::current_dir()
        .context("resolving working directory")?
        .join("downloads");
    let sessions = Arc::new(WebDriverFactory::new(
        &settings.webdriver_url,
        &settings.profile_root,
        &download_root,
    ));

    let registry = Arc::new(Registry::new());
    let supervisor = Arc::new(Supervisor::new(Deps {
        creds,
        registry: Arc::clone(&registry),
        messenger: messenger.clone(),
        solver,
        sessions,
        adapters: Arc::new(PortalAdapters),
        sink: StatementSink::new(&settings.autobank_upload_url),
        tuning: WorkerTuning::default(),
    }));

    // ── Balance monitor ───────────────────────────────────────────────────────
    let sampler_registry = Arc::clone(&registry);
    let monitor = BalanceMonitor::new(
        MonitorConfig::new(
            settings.balance_check_interval,
            settings.alert_group_ids.clone(),
        ),
        ThresholdLadder::default(),
        messenger.clone(),
        Box::new(move || {
            sampler_registry
                .views()
                .into_iter()
                .map(|v| BalanceSample {
                    alias: v.alias,
                    bank_label: v.bank_label,
                    account_number: v.account_number,
                    balance_text: v.last_balance,
                })
                .collect()
        }),
    );
    let monitor_task = monitor.spawn();

    // ── Chat loop ─────────────────────────────────────────────────────────────
    let ctx = Arc::new(CommandCtx::new(
        Arc::clone(&supervisor),
        Arc::clone(&monitor),
        download_root,
    ));
    let mut poller = TelegramPoller::new(&settings.telegram_token);

    info!("autobot ready");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            batch = poller.poll() => {
                for incoming in batch {
                    let ctx = Arc::clone(&ctx);
                    let messenger = messenger.clone();
                    // Commands may block (worker joins take up to 5 s each);
                    // keep them off the poll loop.
                    tokio::task::spawn_blocking(move || {
                        for reply in ctx.handle(incoming.chat_id, &incoming.text) {
                            match reply {
                                Reply::Text(text) => {
                                    if let Err(e) =
                                        messenger.send_direct(incoming.chat_id, text)
                                    {
                                        warn!(error = %e, "reply delivery failed");
                                    }
                                }
                                Reply::Document { path, caption } => {
                                    messenger.send_document(path, caption);
                                }
                            }
                        }
                    });
                }
            }
        }
    }

    // ── Teardown, reverse order ───────────────────────────────────────────────
    info!("shutting down");
    for (alias, outcome) in supervisor.stop_all() {
        info!(alias, ?outcome, "worker shutdown");
    }
    if let Some(task) = monitor_task {
        task.abort();
    }
    messenger.close();
    info!("autobot stopped");
    Ok(())
}
