//! Log-collector service: fan-in of all broker telemetry into rotating
//! per-source and per-type log files.
//!
//! Every message on every exchange is appended as one JSON line to four
//! files: `all.log`, `<messageType>.log`, `<source>/all.log` and
//! `<source>/<messageType>.log`, each rotated by size.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::StationConfig;
use crate::messaging::{
    Binding, Exchange, HandlerError, HandlerKind, HandlerResult, Message, MessageHandler,
    MessageNode, Messenger, NodeConfig, NodeHandle,
};

/// Exchanges the collector taps. Matches every service on the mesh.
const TAPPED_EXCHANGES: &[&str] = &[
    "mount",
    "sdr",
    "database",
    "astrodynamics",
    "radiometrics",
    "signal_processor",
    "tracker",
    "orchestrator",
    "scheduler",
    "collect",
];

/// Rotation policy defaults.
pub const DEFAULT_MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;
pub const DEFAULT_BACKUP_COUNT: u32 = 3;

/// Size-rotating append-only log file.
///
/// When an append would push the file past `max_size`, existing backups shift
/// `.1 -> .2 -> ...` up to `backup_count` and the live file becomes `.1`.
pub struct RotatingLog {
    path: PathBuf,
    max_size: u64,
    backup_count: u32,
}

impl RotatingLog {
    pub fn new(path: PathBuf, max_size: u64, backup_count: u32) -> Self {
        Self {
            path,
            max_size,
            backup_count,
        }
    }

    fn backup_path(&self, index: u32) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{index}"));
        PathBuf::from(name)
    }

    fn rotate(&self) -> Result<()> {
        for index in (1..self.backup_count).rev() {
            let from = self.backup_path(index);
            if from.exists() {
                std::fs::rename(&from, self.backup_path(index + 1))?;
            }
        }
        if self.backup_count > 0 && self.path.exists() {
            std::fs::rename(&self.path, self.backup_path(1))?;
        }
        Ok(())
    }

    pub fn append_line(&self, line: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {:?}", parent))?;
        }
        let current = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        if current + line.len() as u64 + 1 > self.max_size {
            self.rotate()?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {:?}", self.path))?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

/// Writes each message to its four destinations, caching writers per path.
pub struct LogSink {
    root: PathBuf,
    max_size: u64,
    backup_count: u32,
    writers: Mutex<HashMap<PathBuf, RotatingLog>>,
}

impl LogSink {
    pub fn new(root: &Path, max_size: u64, backup_count: u32) -> Self {
        Self {
            root: root.to_path_buf(),
            max_size,
            backup_count,
            writers: Mutex::new(HashMap::new()),
        }
    }

    pub async fn write_message(&self, message: &Message) -> Result<()> {
        let kind = message.kind().to_string();
        let source = message.source().to_lowercase();
        let line = serde_json::to_string(message)?;

        let targets = [
            self.root.join("all.log"),
            self.root.join(format!("{kind}.log")),
            self.root.join(&source).join("all.log"),
            self.root.join(&source).join(format!("{kind}.log")),
        ];

        let mut writers = self.writers.lock().await;
        for path in targets {
            let writer = writers.entry(path.clone()).or_insert_with(|| {
                RotatingLog::new(path, self.max_size, self.backup_count)
            });
            writer.append_line(&line)?;
        }
        Ok(())
    }
}

struct LogHandler {
    sink: Arc<LogSink>,
}

#[async_trait]
impl MessageHandler for LogHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::All
    }

    async fn handle(
        &self,
        message: &Message,
        _correlation_id: Option<&str>,
        _node: &NodeHandle,
    ) -> HandlerResult {
        self.sink
            .write_message(message)
            .await
            .map_err(HandlerError::transient)?;
        Ok(None)
    }
}

fn node_config() -> NodeConfig {
    let mut config = NodeConfig::service("log-collector");
    for exchange in TAPPED_EXCHANGES {
        config = config
            .exchange(Exchange::topic(exchange))
            .binding(Binding::new(exchange, &["#"]));
    }
    config
}

pub struct LogCollectorService {
    node: MessageNode,
}

impl LogCollectorService {
    pub async fn serve(config: &StationConfig, cancel: CancellationToken) -> Result<Self> {
        let sink = Arc::new(LogSink::new(
            &config.log_dir,
            DEFAULT_MAX_LOG_SIZE,
            DEFAULT_BACKUP_COUNT,
        ));
        let messenger = Messenger::new("log-collector", crate::MESSAGE_VERSION);
        let mut node =
            MessageNode::connect(node_config(), &config.nats_url, messenger, cancel).await?;
        node.add_handler(Arc::new(LogHandler { sink }));
        node.start().await?;
        info!("Log collector tapping {} exchanges", TAPPED_EXCHANGES.len());
        Ok(Self { node })
    }

    pub async fn stop(&mut self) {
        self.node.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::Messenger;
    use serde_json::json;

    #[test]
    fn appends_lines_until_rotation() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("all.log");
        let log = RotatingLog::new(path.clone(), 64, 2);

        log.append_line("first line of some length").unwrap();
        log.append_line("second line of some length").unwrap();
        // Third append exceeds 64 bytes: the live file rotates to .1.
        log.append_line("third line forces rotation").unwrap();

        assert!(path.exists());
        assert!(tmp.path().join("all.log.1").exists());
        let live = std::fs::read_to_string(&path).unwrap();
        assert_eq!(live.trim(), "third line forces rotation");
    }

    #[test]
    fn backups_cap_at_backup_count() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cmd.log");
        let log = RotatingLog::new(path, 8, 2);
        for i in 0..10 {
            log.append_line(&format!("line number {i}")).unwrap();
        }
        assert!(tmp.path().join("cmd.log.1").exists());
        assert!(tmp.path().join("cmd.log.2").exists());
        assert!(!tmp.path().join("cmd.log.3").exists());
    }

    #[tokio::test]
    async fn messages_fan_out_to_four_files() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = LogSink::new(tmp.path(), DEFAULT_MAX_LOG_SIZE, DEFAULT_BACKUP_COUNT);
        let message = Messenger::new("mount-controller", "1.0.0")
            .telemetry("status", json!({"azimuth": 270.0}));
        sink.write_message(&message).await.unwrap();

        for expected in [
            "all.log",
            "telemetry.log",
            "mount-controller/all.log",
            "mount-controller/telemetry.log",
        ] {
            let path = tmp.path().join(expected);
            assert!(path.is_file(), "{expected} missing");
            let contents = std::fs::read_to_string(path).unwrap();
            assert!(contents.contains("\"telemetryType\":\"status\""));
        }
    }
}
