use clap::Parser;
use novel_agent::agent::{AgentRegistry, Dispatcher, NovelRole, WorkerAgent};
use novel_agent::config::{NovelConfig, StoreConfig};
use novel_agent::context::SharedContextTree;
use novel_agent::embedding::{EmbeddingService, HttpEmbeddingClient, ZeroVectorFallback};
use novel_agent::error::{ConfigError, Result};
use novel_agent::llm::{DefaultLlmClient, LlmClient, LlmConfig};
use novel_agent::memory::BoundedMemory;
use novel_agent::pipeline::NovelBrief;
use novel_agent::store::SimilarityStore;
use novel_agent::tasks::Scheduler;
use reqwest::Client;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// 多 Worker 协作生成长篇小说
#[derive(Parser, Debug)]
#[command(name = "novel-agent", version)]
struct Args {
    /// YAML 配置文件，缺省时使用默认配置
    #[arg(short, long, env = "NOVEL_AGENT_CONFIG")]
    config: Option<PathBuf>,

    #[arg(short, long)]
    title: String,

    #[arg(short, long, default_value = "fantasy")]
    genre: String,

    #[arg(long, default_value_t = 3)]
    chapters: usize,

    /// 结束后把任务状态与上下文树写入该目录
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "novel_agent=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => NovelConfig::load(path)?,
        None => NovelConfig::default(),
    };

    let model = LlmConfig::from_env()?.get_model(&config.model)?;
    info!(model = %model.model, "🤖 使用模型");
    let http = Arc::new(Client::new());
    let llm: Arc<dyn LlmClient> = Arc::new(DefaultLlmClient::new(http.clone(), model));

    let mut registry = AgentRegistry::new();
    for role in NovelRole::ALL {
        registry.register(Arc::new(WorkerAgent::for_role(role, llm.clone())));
    }

    let mut memory = BoundedMemory::new(config.memory.capacity);
    if config.store.enabled {
        let store = open_store(&config.store, http)?;
        memory = memory.with_long_term(Arc::new(store));
    }

    let brief = NovelBrief::new(&args.title, &args.genre, args.chapters);
    let tree = SharedContextTree::new(brief.describe());
    let dispatcher = Dispatcher::new(registry, Scheduler::new(), Arc::new(memory))
        .with_config(config.dispatch_config())
        .with_context_tree(tree.clone())
        .with_tree_summaries(llm.clone())
        .with_coordinator(llm);
    dispatcher.scheduler().submit_all(brief.tasks())?;

    let token = dispatcher.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 收到中断信号，停止领取新任务");
            token.cancel();
        }
    });

    let report = dispatcher.run().await?;

    if let Some(dir) = &args.output {
        tokio::fs::create_dir_all(dir).await?;
        dispatcher.scheduler().save(dir.join("tasks.json")).await?;
        tree.save(dir.join("context.json")).await?;
        info!(dir = %dir.display(), "💾 结果已保存");
    }

    println!("{}", dispatcher.scheduler().summary()?);
    for (task_id, cause) in &report.failures {
        println!("  ✗ {task_id}: {cause}");
    }
    if report.stalled {
        println!("⚠️ 部分任务因依赖失败无法继续");
    }
    Ok(())
}

fn open_store(config: &StoreConfig, http: Arc<Client>) -> Result<SimilarityStore> {
    let apikey = std::env::var(&config.apikey_env)
        .map_err(|_| ConfigError::EnvFormatError(format!("{} is not set", config.apikey_env)))?;
    let client = HttpEmbeddingClient::new(http, apikey, config.dimension)
        .with_url(&config.embedding_url)
        .with_model(&config.embedding_model);
    let embedder: Arc<dyn EmbeddingService> = if config.zero_fallback {
        Arc::new(ZeroVectorFallback::new(client))
    } else {
        Arc::new(client)
    };

    match &config.path {
        Some(path) => SimilarityStore::open(path, embedder, config.dimension),
        None => Ok(SimilarityStore::in_memory(embedder, config.dimension)),
    }
}
