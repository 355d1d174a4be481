//! Sapa application binary - composition root.
//!
//! 1. Load and validate configuration from TOML
//! 2. Open the session database
//! 3. For chat commands: check provider keys, build the semantic index from
//!    the chunk file, register tools and wire the orchestrator
//! 4. Run the requested command

mod cli;

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use sapa_chat::{Orchestrator, TurnOutcome, TurnResponse};
use sapa_core::config::{api_key_from_env, expand_home, SapaConfig};
use sapa_core::error::SapaError;
use sapa_core::retry::RetryPolicy;
use sapa_core::types::Role;
use sapa_llm::OpenAiChatModel;
use sapa_storage::{Database, SessionStore};
use sapa_tools::{LinkLookupTool, ToolRegistry};
use sapa_vector::{load_chunk_file, DistanceMetric, HttpEmbeddingService, Retriever, SemanticIndex};

use cli::{CliArgs, Command};

/// Load the config file if present, otherwise defaults. Either way the
/// result must validate.
fn load_config(path: &Path) -> Result<SapaConfig, SapaError> {
    let config = if path.exists() {
        SapaConfig::load(path)?
    } else {
        SapaConfig::default()
    };
    config.validate()?;
    Ok(config)
}

fn open_store(config: &SapaConfig) -> Result<SessionStore, SapaError> {
    let db = Database::new(&config.database_path())?;
    Ok(SessionStore::new(Arc::new(db)))
}

/// Wire the orchestrator. Missing provider keys, a bad chunk file or a bad
/// link mapping are configuration errors.
fn build_orchestrator(config: &SapaConfig, store: SessionStore) -> Result<Orchestrator, SapaError> {
    let embedding_key = api_key_from_env(&config.embedding.api_key_env)?;
    let generation_key = api_key_from_env(&config.generation.api_key_env)?;

    // Knowledge base.
    let metric: DistanceMetric = config.retrieval.metric.parse()?;
    let index = Arc::new(SemanticIndex::new());
    index.ensure_created(config.embedding.dimension, metric)?;
    let chunks_path = expand_home(&config.retrieval.chunks_path);
    let report = load_chunk_file(&index, &chunks_path).map_err(|e| {
        SapaError::Config(format!(
            "cannot load knowledge base {}: {}",
            chunks_path.display(),
            e
        ))
    })?;
    if report.chunks == 0 {
        tracing::warn!(path = %chunks_path.display(), "Knowledge base is empty; answers will be ungrounded");
    }

    // Retrieval.
    let embedder = HttpEmbeddingService::new(
        &config.embedding.endpoint,
        &config.embedding.model,
        embedding_key,
        config.embedding.dimension,
        config.embedding.timeout(),
    )?;
    let embedding_policy = RetryPolicy::new(
        config.embedding.timeout(),
        config.chat.provider_retries,
        config.chat.retry_backoff(),
    );
    let retriever =
        Retriever::new(index, embedder, embedding_policy).with_min_score(config.retrieval.min_score);

    // Tools.
    let mut tools = ToolRegistry::new();
    tools.register(LinkLookupTool::from_file(&expand_home(&config.tools.links_path))?)?;

    // Generation.
    let model = OpenAiChatModel::new(&config.generation, generation_key)?;
    let generation_policy = RetryPolicy::new(
        config.generation.timeout(),
        config.chat.provider_retries,
        config.chat.retry_backoff(),
    );

    Ok(Orchestrator::new(
        Arc::new(retriever),
        Arc::new(model),
        Arc::new(tools),
        store,
        generation_policy,
        config.chat.clone(),
        config.retrieval.clone(),
        config.storage.clone(),
    ))
}

fn print_response(response: &TurnResponse) {
    println!("{}", response.answer);
    if response.outcome != TurnOutcome::Answered {
        return;
    }
    if !response.links.is_empty() {
        println!();
        for link in &response.links {
            println!("  [{}] {} - {}", link.link_type.as_str(), link.label, link.url);
        }
    }
    if !response.follow_ups.is_empty() {
        println!();
        for question in &response.follow_ups {
            println!("  ? {}", question);
        }
    }
}

/// Turns whose write failed are only held in memory; give them one last try.
async fn flush_before_exit(orchestrator: &Orchestrator) {
    let unsaved = orchestrator.flush_all().await;
    if unsaved > 0 {
        tracing::error!(turns = unsaved, "Exiting with turns that could not be saved");
    }
}

async fn run_chat(orchestrator: &Orchestrator, session: Option<String>) -> Result<(), SapaError> {
    let session_id = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    println!("Session {} (type 'exit' to quit)", session_id);

    let result = chat_loop(orchestrator, &session_id).await;
    flush_before_exit(orchestrator).await;
    result
}

async fn chat_loop(orchestrator: &Orchestrator, session_id: &str) -> Result<(), SapaError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
            break;
        }

        match orchestrator.handle_turn(session_id, line).await {
            Ok(response) => print_response(&response),
            Err(e) => eprintln!("error: {}", e),
        }
        println!();
    }
    Ok(())
}

async fn run_ask(
    orchestrator: &Orchestrator,
    session: &str,
    query: &str,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = orchestrator.handle_turn(session, query).await?;
    flush_before_exit(orchestrator).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_response(&response);
    }
    Ok(())
}

fn run_sessions(store: &SessionStore, limit: usize) -> Result<(), SapaError> {
    let summaries = store.list_recent(limit)?;
    if summaries.is_empty() {
        println!("No sessions yet.");
    }
    for s in summaries {
        println!(
            "{}  {}  ({} turns)  {}",
            s.updated_at
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M"),
            s.session_id,
            s.turn_count,
            s.preview
        );
    }
    Ok(())
}

fn run_history(store: &SessionStore, session: &str) -> Result<(), SapaError> {
    let session = store.load(session)?;
    if session.is_empty() {
        println!("Session {} has no turns.", session.session_id);
    }
    for turn in &session.turns {
        let who = match turn.role {
            Role::User => "you",
            Role::Assistant => "sapa",
        };
        println!(
            "[{}] {}: {}",
            turn.timestamp
                .with_timezone(&chrono::Local)
                .format("%H:%M:%S"),
            who,
            turn.content
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let config = load_config(&config_file)?;

    // Tracing goes to stderr so answers on stdout stay clean.
    let log_level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .init();

    tracing::info!(
        path = %config_file.display(),
        found = config_file.exists(),
        "Starting Sapa v{}",
        env!("CARGO_PKG_VERSION")
    );

    let store = open_store(&config)?;

    match args.command {
        Command::Sessions { limit } => run_sessions(&store, limit)?,
        Command::History { session } => run_history(&store, &session)?,
        Command::Chat { session } => {
            let orchestrator = build_orchestrator(&config, store)?;
            run_chat(&orchestrator, session).await?;
        }
        Command::Ask {
            session,
            json,
            query,
        } => {
            let orchestrator = build_orchestrator(&config, store)?;
            run_ask(&orchestrator, &session, &query, json).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn config_in(dir: &Path, key_env: &str) -> SapaConfig {
        let chunks = write(
            dir,
            "chunks.jsonl",
            r#"{"id":"c1","text":"Phở Thìn","language":"vietnamese","source":"guide","category":"food","embedding":[1.0,0.0,0.0,0.0]}"#,
        );
        let links = write(
            dir,
            "links.json",
            r#"{"pho_hanoi":{"keywords":["phở"],"links":[{"type":"map","url":"https://maps.example/pho","label":"Phở Thìn"}]}}"#,
        );

        let mut config = SapaConfig::default();
        config.general.data_dir = dir.display().to_string();
        config.embedding.dimension = 4;
        config.embedding.api_key_env = key_env.to_string();
        config.generation.api_key_env = key_env.to_string();
        config.retrieval.chunks_path = chunks.display().to_string();
        config.tools.links_path = links.display().to_string();
        config
    }

    #[test]
    fn test_missing_config_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.retrieval.top_k, 3);
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "config.toml", "[retrieval]\ntop_k = 9\n");
        assert!(matches!(load_config(&path), Err(SapaError::Config(_))));
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), "SAPA_TEST_KEY_THAT_IS_NEVER_SET");
        let store = open_store(&config).unwrap();
        let err = build_orchestrator(&config, store).err().unwrap();
        assert!(matches!(err, SapaError::Config(ref m) if m.contains("SAPA_TEST_KEY_THAT_IS_NEVER_SET")));
    }

    #[test]
    fn test_build_orchestrator_from_files() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("SAPA_TEST_KEY_BUILD", "test-key");
        let config = config_in(dir.path(), "SAPA_TEST_KEY_BUILD");
        let store = open_store(&config).unwrap();
        assert!(build_orchestrator(&config, store).is_ok());
        assert!(dir.path().join("sessions.db").exists());
    }

    #[test]
    fn test_bad_chunk_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("SAPA_TEST_KEY_CHUNKS", "test-key");
        let mut config = config_in(dir.path(), "SAPA_TEST_KEY_CHUNKS");
        config.embedding.dimension = 8;
        let store = open_store(&config).unwrap();
        let err = build_orchestrator(&config, store).err().unwrap();
        assert!(matches!(err, SapaError::Config(ref m) if m.contains("knowledge base")));
    }

    #[test]
    fn test_history_and_sessions_on_fresh_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), "UNUSED");
        let store = open_store(&config).unwrap();
        run_sessions(&store, 10).unwrap();
        run_history(&store, "nobody").unwrap();
    }
}
