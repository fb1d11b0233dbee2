//! Session - one open agent
//!
//! Owns the store, the bus, the providers, the tool registry, the task
//! scheduler, and the injection queue. `run_prompt` drives one turn;
//! after each turn the session kicks off whatever background work the
//! turn warranted (distillation, consolidation).

use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use eyre::Result;
use memstore::{OpenOptions, Store, TaskKind};
use tracing::{info, warn};

use crate::agents::{run_consolidation, run_reflection, run_research, should_consolidate};
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::context::{AssemblerConfig, ContextAssembler};
use crate::distill::{DistillConfig, Distiller};
use crate::events::EventBus;
use crate::llm::{ModelTier, Provider, create_provider};
use crate::plugin::PluginManager;
use crate::sched::{SubAgentRunner, TaskScheduler};
use crate::tools::ToolRegistry;
use crate::tools::builtin::{
    BackgroundReflectTool, BackgroundResearchTool, CancelTaskTool, FinishTool, ListTasksTool,
    MemoryContextTool, MemorySearchTool, SetAlarmTool, ltm_tools, present_tools,
};
use crate::turn::{
    InjectionRx, InjectionTx, LoopMode, TurnConfig, TurnLoop, TurnObserver, TurnResult,
    injection_channel,
};

/// Cancels the in-flight turn, if any. Cheap to clone across tasks.
#[derive(Clone, Default)]
pub struct InterruptHandle {
    current: Arc<StdMutex<Option<CancelToken>>>,
}

impl InterruptHandle {
    /// Fire the current turn's cancel token
    pub fn interrupt(&self) {
        if let Some(token) = self.current.lock().expect("interrupt handle poisoned").as_ref() {
            token.cancel();
        }
    }

    fn set(&self, token: Option<CancelToken>) {
        *self.current.lock().expect("interrupt handle poisoned") = token;
    }

    /// Whether a turn is currently in flight
    pub fn turn_running(&self) -> bool {
        self.current.lock().expect("interrupt handle poisoned").is_some()
    }
}

/// One open agent session
pub struct Session {
    config: Config,
    store: Store,
    bus: EventBus,
    workhorse: Arc<dyn Provider>,
    fast: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
    scheduler: Arc<TaskScheduler>,
    plugins: Arc<PluginManager>,
    injection_tx: InjectionTx,
    injection_rx: InjectionRx,
    interrupt: InterruptHandle,
    alarm_timer: tokio::task::JoinHandle<()>,
}

impl Session {
    /// Open a session with providers built from config (reads the API key
    /// environment variable)
    pub async fn new(config: Config) -> Result<Self> {
        let workhorse = create_provider(&config.provider, ModelTier::Workhorse)?;
        let fast = create_provider(&config.provider, ModelTier::Fast)?;
        Self::with_providers(config, workhorse, fast).await
    }

    /// Open a session with injected providers (tests, custom hosts)
    pub async fn with_providers(
        config: Config,
        workhorse: Arc<dyn Provider>,
        fast: Arc<dyn Provider>,
    ) -> Result<Self> {
        let store = Store::open(
            config.store_path(),
            OpenOptions {
                lock_timeout: Duration::from_millis(config.store.lock_timeout_ms),
                read_only: false,
            },
        )
        .await?;

        let bus = EventBus::with_default_capacity();
        let (injection_tx, injection_rx) = injection_channel();

        // Background sub-agents run on the fast tier
        let runner = Self::build_runner(
            store.clone(),
            bus.clone(),
            fast.clone(),
            config.provider.models.fast.clone(),
            file_root(),
        );
        let scheduler = TaskScheduler::new(
            store.clone(),
            bus.clone(),
            injection_tx.clone(),
            runner,
            config.tasks.max_concurrent,
        );
        let alarm_timer =
            scheduler.start_alarm_timer(Duration::from_millis(config.tasks.alarm_poll_ms));

        let plugins = Arc::new(PluginManager::new());
        let plugin_tools = plugins.connect_all(&config.plugins).await;
        for issue in plugins.issues() {
            warn!(issue = %issue, "plugin issue at startup");
        }

        let mut registry = ToolRegistry::new().with_plugins(plugins.clone());
        registry.register_all(ltm_tools(store.clone(), bus.clone(), "main"));
        registry.register_all(present_tools(store.clone(), bus.clone()));
        registry.register(Arc::new(MemorySearchTool::new(store.clone())));
        registry.register(Arc::new(MemoryContextTool::new(store.clone())));
        registry.register(Arc::new(BackgroundResearchTool::new(scheduler.clone())));
        registry.register(Arc::new(BackgroundReflectTool::new(scheduler.clone())));
        registry.register(Arc::new(SetAlarmTool::new(scheduler.clone())));
        registry.register(Arc::new(ListTasksTool::new(scheduler.clone())));
        registry.register(Arc::new(CancelTaskTool::new(scheduler.clone())));
        registry.register(Arc::new(FinishTool::finish_turn()));
        registry.register_all(plugin_tools);

        info!(
            session_id = store.session_id(),
            tools = registry.names().len(),
            "session open"
        );

        Ok(Self {
            config,
            store,
            bus,
            workhorse,
            fast,
            registry: Arc::new(registry),
            scheduler,
            plugins,
            injection_tx,
            injection_rx,
            interrupt: InterruptHandle::default(),
            alarm_timer,
        })
    }

    fn build_runner(
        store: Store,
        bus: EventBus,
        provider: Arc<dyn Provider>,
        model: String,
        file_root: PathBuf,
    ) -> SubAgentRunner {
        Arc::new(move |kind, description, cancel| {
            let store = store.clone();
            let bus = bus.clone();
            let provider = provider.clone();
            let model = model.clone();
            let file_root = file_root.clone();
            Box::pin(async move {
                match kind {
                    TaskKind::Research => {
                        run_research(store, provider, bus, &model, &description, file_root, cancel)
                            .await
                    }
                    TaskKind::Reflect => {
                        run_reflection(store, provider, bus, &model, &description, cancel).await
                    }
                    // Alarms never reach the runner; they fire on the timer
                    TaskKind::Alarm => Ok(description),
                }
            })
        })
    }

    /// Run one user prompt through the turn loop, then schedule any
    /// warranted background work
    pub async fn run_prompt(
        &mut self,
        input: &str,
        observer: &mut TurnObserver,
    ) -> Result<TurnResult> {
        let cancel = CancelToken::new();
        self.interrupt.set(Some(cancel.clone()));

        let mut turn_loop = TurnLoop {
            provider: self.workhorse.clone(),
            registry: self.registry.clone(),
            store: self.store.clone(),
            bus: Some(self.bus.clone()),
            cancel,
            config: TurnConfig {
                max_turns: self.config.turn.max_turns,
                temperature: self.config.provider.temperature,
                model: self.config.provider.models.workhorse.clone(),
                finish_tool: Some("finish_turn".to_string()),
            },
            mode: LoopMode::Main {
                assembler: ContextAssembler::new(
                    self.store.clone(),
                    AssemblerConfig {
                        context_window: self.config.provider.context_window,
                        budget_fraction: self.config.memory.budget_fraction,
                        ..AssemblerConfig::default()
                    },
                ),
            },
        };

        let result = turn_loop
            .run_turn(input, Some(&mut self.injection_rx), observer)
            .await;
        self.interrupt.set(None);

        if let Ok(turn) = &result {
            self.spawn_post_turn_workers(turn.needs_escalation);
        }
        result
    }

    /// Fire-and-forget distillation and consolidation after a turn
    fn spawn_post_turn_workers(&self, escalate: bool) {
        let distiller = Distiller::new(
            self.store.clone(),
            self.fast.clone(),
            self.bus.clone(),
            DistillConfig {
                threshold_tokens: if escalate { 1 } else { self.config.distill_threshold() },
                batch: self.config.memory.distill_batch,
                compose: self.config.memory.distill_compose,
            },
        );
        tokio::spawn(async move {
            if let Err(e) = distiller.run_if_needed(CancelToken::new()).await {
                warn!(error = %e, "distillation worker failed");
            }
        });

        match should_consolidate(&self.store) {
            Ok(true) => {
                let store = self.store.clone();
                let bus = self.bus.clone();
                let provider = self.fast.clone();
                let model = self.config.provider.models.fast.clone();
                tokio::spawn(async move {
                    match store.workers().is_running("consolidator") {
                        Ok(false) => {
                            let worker = match store.workers().start("consolidator") {
                                Ok(id) => id,
                                Err(e) => {
                                    warn!(error = %e, "failed to record consolidator start");
                                    return;
                                }
                            };
                            match run_consolidation(store.clone(), provider, bus, &model, CancelToken::new())
                                .await
                            {
                                Ok(summary) => {
                                    info!(summary = %summary, "consolidation complete");
                                    let _ = store.workers().finish(&worker);
                                }
                                Err(e) => {
                                    warn!(error = %e, "consolidation failed");
                                    let _ = store.workers().fail(&worker, &e.to_string());
                                }
                            }
                        }
                        Ok(true) => {}
                        Err(e) => warn!(error = %e, "consolidator check failed"),
                    }
                });
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "noteworthy check failed"),
        }
    }

    /// Run a research question inline, bypassing the background queue
    pub async fn research_inline(&self, question: &str) -> Result<String> {
        run_research(
            self.store.clone(),
            self.fast.clone(),
            self.bus.clone(),
            &self.config.provider.models.fast,
            question,
            file_root(),
            CancelToken::new(),
        )
        .await
    }

    /// Run a reflection question inline
    pub async fn reflect_inline(&self, focus: &str) -> Result<String> {
        run_reflection(
            self.store.clone(),
            self.fast.clone(),
            self.bus.clone(),
            &self.config.provider.models.fast,
            focus,
            CancelToken::new(),
        )
        .await
    }

    pub fn session_id(&self) -> &str {
        self.store.session_id()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn bus(&self) -> EventBus {
        self.bus.clone()
    }

    /// Sender half of the mid-turn injection queue
    pub fn injector(&self) -> InjectionTx {
        self.injection_tx.clone()
    }

    /// Handle that cancels the in-flight turn
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    pub fn scheduler(&self) -> Arc<TaskScheduler> {
        self.scheduler.clone()
    }

    pub fn plugins(&self) -> Arc<PluginManager> {
        self.plugins.clone()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Plugin child processes die with their clients (kill_on_drop)
        self.alarm_timer.abort();
    }
}

/// Root for research file reads: the working directory
fn file_root() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}
