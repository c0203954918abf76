//! Server orchestrator.

use crate::logic::{
    register_chain, ExecuteRequest, ExecuteResponse, Executor, ModuleLoader, WorkerPool,
};
use crate::render::{self, RenderOptions};
use crate::signal::{Registry, Role, SignalScope, Value};
use crate::tree::TreeNode;
use crate::{Error, Result};
use futures::stream::BoxStream;
use std::sync::Arc;

/// The server-side core: scope, registry, executor, renderer.
pub struct ServerWeaver {
    scope: SignalScope,
    registry: Arc<Registry>,
    executor: Arc<Executor>,
    loader: Arc<dyn ModuleLoader>,
    workers: Arc<WorkerPool>,
    options: RenderOptions,
}

/// Builder for [`ServerWeaver`].
pub struct ServerWeaverBuilder {
    loader: Arc<dyn ModuleLoader>,
    workers: Option<Arc<WorkerPool>>,
    options: RenderOptions,
}

impl ServerWeaverBuilder {
    /// Override the worker pool instead of sharing the process-wide one.
    pub fn worker_pool(mut self, workers: Arc<WorkerPool>) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Override renderer tuning.
    pub fn render_options(mut self, options: RenderOptions) -> Self {
        self.options = options;
        self
    }

    /// Assemble the orchestrator.
    pub fn build(self) -> ServerWeaver {
        let registry = Arc::new(Registry::new());
        let workers = self
            .workers
            .unwrap_or_else(|| WorkerPool::shared(self.loader.clone()));
        let executor = Arc::new(
            Executor::new(registry.clone(), self.loader.clone(), Role::Server)
                .with_workers(workers.clone()),
        );
        ServerWeaver {
            scope: SignalScope::server(),
            registry,
            executor,
            loader: self.loader,
            workers,
            options: self.options,
        }
    }
}

impl ServerWeaver {
    /// An orchestrator over the host's SSR module loader.
    pub fn new(loader: Arc<dyn ModuleLoader>) -> Self {
        Self::builder(loader).build()
    }

    /// Start building an orchestrator.
    pub fn builder(loader: Arc<dyn ModuleLoader>) -> ServerWeaverBuilder {
        ServerWeaverBuilder {
            loader,
            workers: None,
            options: RenderOptions::default(),
        }
    }

    /// The server-prefixed source-id scope.
    pub fn scope(&self) -> &SignalScope {
        &self.scope
    }

    /// The orchestrator's registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The orchestrator's executor.
    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// Render a tree to a chunked HTML byte stream.
    pub fn render_to_stream(&self, tree: TreeNode) -> BoxStream<'static, Result<String>> {
        render::render_to_stream(self.executor.clone(), tree, self.options)
    }

    /// Render a tree to one HTML string.
    pub async fn render_to_string(&self, tree: TreeNode) -> Result<String> {
        render::render_to_string(self.executor.clone(), tree).await
    }

    /// The transport-free side of `POST /weaver/execute`: rebuild a fresh
    /// registry from the serialized chain, execute the target, and return
    /// its JSON value. The host wires this to its HTTP stack.
    pub async fn handle_execute(&self, request: ExecuteRequest) -> Result<ExecuteResponse> {
        tracing::debug!(target = %request.target_id, signals = request.signals.len(), "remote execution request");
        let registry = Arc::new(Registry::new());
        register_chain(&registry, &request.signals);

        let executor = Executor::new(registry, self.loader.clone(), Role::Server)
            .with_workers(self.workers.clone());
        let execution = executor.execute_computed(&request.target_id).await?;
        let value = match execution.deferred {
            Some(deferred) => deferred.await?,
            None => execution.value,
        };
        match value {
            Value::Json(value) => Ok(ExecuteResponse { value }),
            other => Err(Error::Remote(format!(
                "target {} produced a non-JSON value: {other:?}",
                request.target_id
            ))),
        }
    }
}
