//! Process wiring: builds every collaborator from [`HabitConfig`], starts the
//! background loops and tears them down in dependency order.

use crate::config::{HabitConfig, TelegramMode};
use crate::context::HabitContext;
use crate::error::{HabitError, Result};
use crate::gateway::memory::MemoryGateway;
use crate::gateway::telegram::TelegramGateway;
use crate::gateway::webhook::{WebhookState, serve_webhook};
use crate::gateway::{InboundEvent, MessagingGateway};
use crate::habit_dirs;
use crate::inbound::InboundHandler;
use crate::pending::{PendingAnswerTracker, PendingEvent};
use crate::registry::FileSubjectRegistry;
use crate::report::JsonReportRenderer;
use crate::scheduler::{DispatchLedger, Dispatcher};
use crate::store::RecordStore;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bound on queued inbound events before ingress applies backpressure.
pub const INBOUND_QUEUE_CAPACITY: usize = 256;

/// A running habit tracker.
pub struct HabitRuntime {
    ctx: HabitContext,
    data_dir: PathBuf,
    inbound_tx: mpsc::Sender<InboundEvent>,
    webhook_addr: Option<SocketAddr>,
    shutdown: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl HabitRuntime {
    /// Start with the gateway selected by `config`: Telegram when configured,
    /// otherwise an in-memory gateway that only logs (dry run).
    ///
    /// # Errors
    ///
    /// Fails on invalid config or when the registry, ledger or webhook
    /// listener cannot be opened.
    pub async fn start(config: HabitConfig) -> Result<Self> {
        let telegram = config
            .gateway
            .telegram
            .as_ref()
            .map(|t| Arc::new(TelegramGateway::new(t)));
        let gateway: Arc<dyn MessagingGateway> = match &telegram {
            Some(t) => Arc::clone(t) as Arc<dyn MessagingGateway>,
            None => {
                warn!("no telegram gateway configured, outbound messages are only recorded in memory");
                Arc::new(MemoryGateway::new())
            }
        };
        Self::launch(config, gateway, telegram).await
    }

    /// Start with an explicit outbound gateway. Telegram polling is not run.
    ///
    /// # Errors
    ///
    /// Same as [`HabitRuntime::start`].
    pub async fn start_with_gateway(
        config: HabitConfig,
        gateway: Arc<dyn MessagingGateway>,
    ) -> Result<Self> {
        Self::launch(config, gateway, None).await
    }

    async fn launch(
        config: HabitConfig,
        gateway: Arc<dyn MessagingGateway>,
        telegram: Option<Arc<TelegramGateway>>,
    ) -> Result<Self> {
        config.validate()?;
        let table = Arc::new(config.schedule.table()?);
        let data_dir = config.store.resolved_data_dir();
        tokio::fs::create_dir_all(&data_dir).await?;
        info!(
            "starting habit tracker: {} schedule entries, data in {}",
            table.entries().len(),
            data_dir.display()
        );

        let store = Arc::new(RecordStore::new(
            habit_dirs::records_dir_in(&data_dir),
            config.store.retry,
            config.store.max_concurrent_io,
        ));
        let registry = Arc::new(
            FileSubjectRegistry::open(
                habit_dirs::registry_file_in(&data_dir),
                config.store.retry,
            )
            .await?,
        );
        let renderer = Arc::new(JsonReportRenderer::new(
            habit_dirs::reports_dir_in(&data_dir),
            config.store.retry,
        ));
        let ledger = DispatchLedger::open(habit_dirs::dispatch_ledger_in(&data_dir)).await?;

        let shutdown = CancellationToken::new();
        let mut tasks = Vec::new();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let tracker = PendingAnswerTracker::with_events(
            Arc::clone(&store),
            Arc::clone(&gateway),
            config.gateway.send_retry,
            events_tx,
        );
        log_pending_events(events_rx);

        let ctx = HabitContext {
            table,
            registry,
            store,
            gateway,
            tracker,
            renderer,
            grace: config.pending.grace,
            send_retry: config.gateway.send_retry,
        };

        let dispatcher = Arc::new(
            Dispatcher::new(ctx.clone(), config.dispatcher.report_schedule(), ledger)
                .with_tick_interval(Duration::from_secs(config.dispatcher.tick_secs)),
        );
        tasks.push(("dispatcher", dispatcher.run(shutdown.child_token())));

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);
        let inbound = Arc::new(InboundHandler::new(ctx.clone()));
        tasks.push(("inbound", inbound.run(inbound_rx, shutdown.child_token())));

        let mode = config.gateway.telegram.as_ref().map(|t| t.mode);
        if let Some(telegram) = &telegram
            && mode == Some(TelegramMode::Polling)
        {
            let telegram = Arc::clone(telegram);
            let tx = inbound_tx.clone();
            let token = shutdown.child_token();
            tasks.push((
                "telegram-polling",
                tokio::spawn(async move {
                    if let Err(e) = telegram.run_polling(tx, token).await {
                        warn!("telegram polling stopped: {e}");
                    }
                }),
            ));
        }

        let mut webhook_addr = None;
        let webhook = &config.gateway.webhook;
        if webhook.enabled {
            let listener = TcpListener::bind((webhook.host.as_str(), webhook.port))
                .await
                .map_err(|e| {
                    HabitError::Config(format!(
                        "cannot bind webhook on {}:{}: {e}",
                        webhook.host, webhook.port
                    ))
                })?;
            webhook_addr = Some(listener.local_addr()?);
            let telegram_ingress = telegram.filter(|_| mode == Some(TelegramMode::Webhook));
            let state = WebhookState::new(
                inbound_tx.clone(),
                webhook.bearer_token.clone(),
                telegram_ingress,
            );
            let token = shutdown.child_token();
            tasks.push((
                "webhook",
                tokio::spawn(async move {
                    if let Err(e) = serve_webhook(listener, state, token).await {
                        warn!("webhook ingress stopped: {e}");
                    }
                }),
            ));
        }

        info!("habit tracker running");
        Ok(Self {
            ctx,
            data_dir,
            inbound_tx,
            webhook_addr,
            shutdown,
            tasks,
        })
    }

    /// Shared collaborators, for embedding and tests.
    #[must_use]
    pub fn context(&self) -> &HabitContext {
        &self.ctx
    }

    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Address the webhook ingress is bound to, when enabled.
    #[must_use]
    pub fn webhook_addr(&self) -> Option<SocketAddr> {
        self.webhook_addr
    }

    /// Sender feeding the inbound handler, for in-process adapters.
    #[must_use]
    pub fn inbound_sender(&self) -> mpsc::Sender<InboundEvent> {
        self.inbound_tx.clone()
    }

    /// Stop ingress and the dispatcher, cancel pending timers, then drain
    /// the store so every accepted write is on disk.
    pub async fn shutdown(self) {
        info!("shutting down habit tracker");
        self.shutdown.cancel();
        drop(self.inbound_tx);
        for (name, handle) in self.tasks {
            if let Err(e) = handle.await {
                warn!("{name} task ended abnormally: {e}");
            }
        }
        self.ctx.tracker.shutdown().await;
        self.ctx.store.shutdown().await;
        info!("habit tracker stopped");
    }
}

/// Detached; ends once the last tracker handle is dropped.
fn log_pending_events(mut rx: mpsc::UnboundedReceiver<PendingEvent>) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            debug!("pending: {event:?}");
        }
    });
}
