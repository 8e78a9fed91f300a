//! Composition root: construct storage and clients, register skills and
//! tools, wire services, start the scheduler, and serve HTTP until shutdown.

use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::agent::AgentService;
use crate::bus::EventBus;
use crate::config::AppConfig;
use crate::directions::{DirectionsClient, DirectionsProvider};
use crate::embeddings::RemoteEmbedder;
use crate::jobs::JobService;
use crate::llm::{ChatProvider, OpenAiProvider};
use crate::memory::MemoryService;
use crate::notify::{Notifier, PushNotifier};
use crate::scheduler::JobScheduler;
use crate::server::{self, AppState};
use crate::skills::{DepartureCheckSkill, SkillRegistry};
use crate::store::Store;
use crate::threads::ThreadService;
use crate::title::TitleHandler;
use crate::tools::{
    CreateJobTool, CurrentDatetimeTool, DeleteJobTool, DirectionsTool, FetchUrlTool,
    ListJobsTool, ListSkillsTool, NotifyTool, RecallTool, RememberTool, ToolRegistry,
    UpdateJobTool,
};

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let store = Arc::new(Store::connect(&config.database.path).await?);
    info!(path = %config.database.path, "Storage ready");

    let provider: Arc<dyn ChatProvider> = Arc::new(
        OpenAiProvider::new(&config.llm.base_url, &config.llm.api_key)
            .map_err(|e| anyhow::anyhow!(e))?,
    );
    let embedder = Arc::new(RemoteEmbedder::new(
        &config.llm.base_url,
        &config.llm.api_key,
        &config.llm.embedding_model,
        config.llm.embedding_dimensions,
    ));
    let notifier: Arc<dyn Notifier> = Arc::new(PushNotifier::new(
        config.push.endpoint.as_deref(),
        config.push.channel.as_deref(),
    ));
    let directions: Option<Arc<dyn DirectionsProvider>> =
        config.directions.api_key.as_deref().map(|key| {
            Arc::new(DirectionsClient::new(&config.directions.base_url, key))
                as Arc<dyn DirectionsProvider>
        });

    let bus = EventBus::new();
    let threads = Arc::new(ThreadService::new(store.clone()));
    let memory = Arc::new(MemoryService::new(store.clone(), embedder).await?);

    let mut skills = SkillRegistry::new();
    if let Some(directions) = &directions {
        skills.register(Arc::new(DepartureCheckSkill::new(
            directions.clone(),
            notifier.clone(),
        )));
    }
    let skills = Arc::new(skills);
    let jobs = Arc::new(JobService::new(store.clone(), skills.clone()));

    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(RecallTool::new(memory.clone())));
    tools.register(Arc::new(RememberTool::new(memory.clone())));
    tools.register(Arc::new(CurrentDatetimeTool));
    tools.register(Arc::new(FetchUrlTool::new()));
    tools.register(Arc::new(NotifyTool::new(notifier.clone())));
    tools.register(Arc::new(ListJobsTool::new(jobs.clone())));
    tools.register(Arc::new(CreateJobTool::new(jobs.clone())));
    tools.register(Arc::new(UpdateJobTool::new(jobs.clone())));
    tools.register(Arc::new(DeleteJobTool::new(jobs.clone())));
    tools.register(Arc::new(ListSkillsTool::new(skills.clone())));
    if let Some(directions) = &directions {
        tools.register(Arc::new(DirectionsTool::new(directions.clone())));
    }

    let agent = AgentService::new(
        threads.clone(),
        memory.clone(),
        provider.clone(),
        Arc::new(tools),
        bus.clone(),
        config.llm.chat_model.clone(),
        config.agent.max_iterations,
    );

    let title_handler = TitleHandler::new(
        threads.clone(),
        provider,
        bus.clone(),
        config.llm.chat_model.clone(),
    )
    .start();

    let scheduler = JobScheduler::new(
        store.clone(),
        threads.clone(),
        agent.clone(),
        skills,
        notifier,
        config.server.app_url.clone(),
    );
    let scheduler_handle = scheduler.clone().start();

    let app = server::router(AppState {
        threads,
        memory,
        jobs,
        agent,
        bus,
    });

    let listener = TcpListener::bind(("0.0.0.0", config.server.port)).await?;
    info!(port = config.server.port, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Shutdown ordering: requests have stopped; cancel in-flight runs, then
    // close the pool. The run lease covers anything that does not exit in
    // time.
    info!("Shutting down");
    scheduler.stop();
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), scheduler_handle).await;
    title_handler.abort();
    store.close().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
