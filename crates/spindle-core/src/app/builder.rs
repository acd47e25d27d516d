//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # 起動時検証（Fail-fast）
//! - 設定値の検証（`Config::validate`）
//! - `expect_tasks()` で宣言した task_type が全て登録済みか
//! - store を開けるか（file store ならここで snapshot を読む）
//!
//! 問題があれば `build()` が `BuildError` を返し、何も起動しない。

use std::sync::Arc;

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

use super::dispatcher::Dispatcher;
use super::pool::WorkerPool;
use super::recovery::Recovery;
use super::service::TaskService;
use crate::config::{Config, ConfigError, StoreConfig};
use crate::domain::{CoordinatorId, Decider, ExecutionError, TaskType};
use crate::impls::{FileTaskStore, InMemoryTaskStore};
use crate::ports::{Clock, IdGenerator, StoreError, SystemClock, TaskStore, UlidGenerator};
use crate::typed::{Executor, ExecutorRegistry, Handler, RegistryError, TaskKind};

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new()
///     .with_config(config)
///     .register_typed::<SendEmail, _>(EmailHandler)?
///     .expect_tasks(&["email"])
///     .build()
///     .await?;
/// let running = app.start();
/// ```
pub struct AppBuilder {
    registry: ExecutorRegistry,
    expected_tasks: Option<Vec<TaskType>>,
    config: Config,
    store: Option<Arc<dyn TaskStore>>,
    clock: Arc<dyn Clock>,
    decider: Option<Arc<dyn Decider>>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing task types: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<TaskType>),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("could not open task store: {0}")]
    Store(#[from] StoreError),
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            registry: ExecutorRegistry::new(),
            expected_tasks: None,
            config: Config::default(),
            store: None,
            clock: Arc::new(SystemClock),
            decider: None,
        }
    }

    /// Register a typed handler under `T::TYPE`.
    pub fn register_typed<T: TaskKind, H: Handler<T> + 'static>(mut self, handler: H) -> Result<Self, RegistryError> {
        self.registry.register_typed::<T, H>(handler)?;
        Ok(self)
    }

    pub fn register(
        mut self,
        task_type: impl Into<TaskType>,
        executor: impl Executor + 'static,
    ) -> Result<Self, RegistryError> {
        self.registry.register(task_type, executor)?;
        Ok(self)
    }

    pub fn register_fn<F, Fut>(mut self, task_type: impl Into<TaskType>, f: F) -> Result<Self, RegistryError>
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, ExecutionError>> + Send + 'static,
    {
        self.registry.register_fn(task_type, f)?;
        Ok(self)
    }

    /// 期待される task_type のリストを設定
    pub fn expect_tasks(mut self, task_types: &[&str]) -> Self {
        self.expected_tasks = Some(task_types.iter().map(|&t| TaskType::new(t)).collect());
        self
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Use this store instead of the one `Config::store` describes.
    pub fn with_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the retry policy derived from the configuration.
    pub fn with_decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = Some(decider);
        self
    }

    pub async fn build(self) -> Result<App, BuildError> {
        self.config.validate()?;

        if let Some(expected_tasks) = &self.expected_tasks {
            let missing: Vec<TaskType> = expected_tasks
                .iter()
                .filter(|t| !self.registry.contains(t))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing));
            }
        }

        let store: Arc<dyn TaskStore> = match (self.store, &self.config.store) {
            (Some(store), _) => store,
            (None, StoreConfig::Memory) => Arc::new(InMemoryTaskStore::with_clock(Arc::clone(&self.clock))),
            (None, StoreConfig::File { path }) => {
                Arc::new(FileTaskStore::open_with_clock(path, Arc::clone(&self.clock)).await?)
            }
        };

        let decider = self
            .decider
            .unwrap_or_else(|| Arc::new(self.config.retry_policy()));

        Ok(App {
            config: self.config,
            registry: Arc::new(self.registry),
            store,
            clock: self.clock,
            decider,
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A fully wired, not yet running engine.
pub struct App {
    config: Config,
    registry: Arc<ExecutorRegistry>,
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    decider: Arc<dyn Decider>,
}

impl App {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    pub fn store(&self) -> Arc<dyn TaskStore> {
        Arc::clone(&self.store)
    }

    /// Spawn the dispatcher on the current tokio runtime.
    ///
    /// Tasks left RUNNING by a previous run are recovered before the first
    /// claim.
    pub fn start(self) -> RunningApp {
        let (pool, reports) = WorkerPool::new(self.config.pool_size, self.config.execution_timeout());
        let pool = Arc::new(pool);
        let wake = Arc::new(Notify::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(Arc::clone(&self.clock)));
        let coordinator = ids.generate_coordinator_id();

        let service = TaskService::new(
            Arc::clone(&self.store),
            Arc::clone(&pool),
            Arc::clone(&self.clock),
            Arc::clone(&wake),
            self.config.stats_window(),
        );

        let dispatcher = Dispatcher {
            coordinator,
            recovery: Recovery::new(Arc::clone(&self.store), Arc::clone(&self.decider), Arc::clone(&self.clock)),
            store: self.store,
            registry: self.registry,
            decider: self.decider,
            pool,
            reports,
            clock: self.clock,
            ids,
            lease_duration: self.config.lease_duration(),
            poll_interval: self.config.poll_interval(),
            shutdown_grace: self.config.shutdown_grace(),
            wake,
            shutdown: shutdown_rx,
        };

        RunningApp {
            coordinator,
            service,
            shutdown_tx,
            dispatcher: tokio::spawn(dispatcher.run()),
        }
    }
}

/// Handle to a started engine.
/// - `request_shutdown()` で claim を止める
/// - `shutdown_and_join()` で実行中の task の報告を待ってから終了する
pub struct RunningApp {
    coordinator: CoordinatorId,
    service: TaskService,
    shutdown_tx: watch::Sender<bool>,
    dispatcher: JoinHandle<()>,
}

impl RunningApp {
    pub fn service(&self) -> TaskService {
        self.service.clone()
    }

    pub fn coordinator(&self) -> CoordinatorId {
        self.coordinator
    }

    pub fn request_shutdown(&self) {
        // receiver が既に drop されていても問題ない
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(e) = self.dispatcher.await {
            tracing::error!(error = %e, "dispatcher task ended abnormally");
        }
    }
}
