//! Execution History Store - append-only ledger of per-task outcomes
//!
//! Written by the orchestrator (concurrently, from parallel siblings) and read
//! by the decision engine's historical strategy. Records are never mutated or
//! removed; pruning is left to whoever owns the persisted file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::{intent::IntentKey, MaestroError, Result};

/// Outcome of one agent invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    /// `{run_id}:{step_id}:{agent_name}`
    pub task_id: String,
    pub run_id: Uuid,
    pub plan_id: Uuid,
    pub step_id: String,
    pub agent_name: String,
    pub duration_ms: u64,
    pub success: bool,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub intent_key: Option<IntentKey>,
}

impl ExecutionRecord {
    pub fn new(
        task_id: impl Into<String>,
        agent_name: impl Into<String>,
        duration_ms: u64,
        success: bool,
        error_message: Option<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            run_id: Uuid::nil(),
            plan_id: Uuid::nil(),
            step_id: String::new(),
            agent_name: agent_name.into(),
            duration_ms,
            success,
            error_message,
            timestamp: Utc::now(),
            intent_key: None,
        }
    }

    pub fn with_run(mut self, run_id: Uuid, plan_id: Uuid, step_id: impl Into<String>) -> Self {
        self.run_id = run_id;
        self.plan_id = plan_id;
        self.step_id = step_id.into();
        self
    }

    pub fn with_intent_key(mut self, intent_key: Option<IntentKey>) -> Self {
        self.intent_key = intent_key;
        self
    }
}

/// Write-through persistence for appended records
#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn write(&self, record: &ExecutionRecord) -> Result<()>;
}

/// Appends one JSON document per line
pub struct JsonLinesSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record in the file; a missing file yields no records
    pub async fn load(&self) -> Result<Vec<ExecutionRecord>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(MaestroError::from))
            .collect()
    }
}

#[async_trait]
impl HistorySink for JsonLinesSink {
    async fn write(&self, record: &ExecutionRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }
}

#[derive(Default)]
struct HistoryState {
    records: IndexMap<String, ExecutionRecord>,
    by_agent: HashMap<String, Vec<usize>>,
    by_intent: HashMap<IntentKey, Vec<usize>>,
}

impl HistoryState {
    fn insert(&mut self, record: ExecutionRecord) -> Result<()> {
        if self.records.contains_key(&record.task_id) {
            return Err(MaestroError::DuplicateRecord(record.task_id));
        }

        let index = self.records.len();
        self.by_agent
            .entry(record.agent_name.clone())
            .or_default()
            .push(index);
        if let Some(key) = &record.intent_key {
            self.by_intent.entry(key.clone()).or_default().push(index);
        }
        self.records.insert(record.task_id.clone(), record);
        Ok(())
    }

    fn collect(&self, indexes: Option<&Vec<usize>>) -> Vec<ExecutionRecord> {
        indexes
            .map(|indexes| {
                indexes
                    .iter()
                    .filter_map(|&i| self.records.get_index(i).map(|(_, r)| r.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Append-only `task_id -> ExecutionRecord` ledger with agent and intent indexes
#[derive(Default)]
pub struct ExecutionHistoryStore {
    state: RwLock<HistoryState>,
    sink: Option<Arc<dyn HistorySink>>,
}

impl ExecutionHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn HistorySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Build a store from previously persisted records (not re-written to any sink)
    pub fn restore(records: Vec<ExecutionRecord>) -> Result<Self> {
        let mut state = HistoryState::default();
        for record in records {
            state.insert(record)?;
        }

        Ok(Self {
            state: RwLock::new(state),
            sink: None,
        })
    }

    /// Append a record; a task id can only be written once
    pub async fn append(&self, record: ExecutionRecord) -> Result<()> {
        let persisted = self.sink.as_ref().map(|_| record.clone());

        self.state.write().await.insert(record)?;

        if let (Some(sink), Some(record)) = (&self.sink, persisted) {
            if let Err(e) = sink.write(&record).await {
                tracing::warn!("[HISTORY] Failed to persist record {}: {}", record.task_id, e);
            }
        }

        Ok(())
    }

    pub async fn get(&self, task_id: &str) -> Option<ExecutionRecord> {
        self.state.read().await.records.get(task_id).cloned()
    }

    pub async fn by_agent(&self, agent_name: &str) -> Vec<ExecutionRecord> {
        let state = self.state.read().await;
        state.collect(state.by_agent.get(agent_name))
    }

    pub async fn by_intent(&self, key: &IntentKey) -> Vec<ExecutionRecord> {
        let state = self.state.read().await;
        state.collect(state.by_intent.get(key))
    }

    pub async fn by_run(&self, run_id: Uuid) -> Vec<ExecutionRecord> {
        self.state
            .read()
            .await
            .records
            .values()
            .filter(|record| record.run_id == run_id)
            .cloned()
            .collect()
    }

    /// All records, in append order
    pub async fn snapshot(&self) -> Vec<ExecutionRecord> {
        self.state.read().await.records.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
