// Output sinks for connection explanations


use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use console::style;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::analyzer::{Analysis, ConnectionExplanation};
use crate::{Result, VaultError};

/// Receives one explanation per analyzed change
#[async_trait]
pub trait ConnectionSink: Send + Sync {
    async fn publish(&self, explanation: &ConnectionExplanation) -> Result<()>;
}

/// Prints a styled report to stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

#[async_trait]
impl ConnectionSink for ConsoleSink {
    async fn publish(&self, explanation: &ConnectionExplanation) -> Result<()> {
        println!("{}", render_explanation(explanation));
        Ok(())
    }
}

/// Render an explanation as a terminal report
#[inline]
pub fn render_explanation(explanation: &ConnectionExplanation) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} {} ({})",
        style("🔗 Connections for").bold().cyan(),
        style(&explanation.source_title).bold(),
        explanation.source_id
    );

    if !explanation.has_connections() {
        let _ = writeln!(out, "   {}", style("No related notes found").dim());
        return out;
    }

    if let Analysis::Structured {
        key_concepts,
        summary,
        ..
    } = &explanation.analysis
    {
        if !summary.is_empty() {
            let _ = writeln!(out, "   {}", summary);
        }
        if !key_concepts.is_empty() {
            let _ = writeln!(
                out,
                "   {} {}",
                style("Key concepts:").yellow(),
                key_concepts.join(", ")
            );
        }
    }

    for related in &explanation.related {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "   📄 {} ({}) similarity {}",
            style(&related.title).bold(),
            related.id,
            style(format!("{:.2}", related.similarity)).green()
        );
        if let Some(insight) = &related.insight {
            if !insight.relationship.is_empty() {
                let _ = writeln!(
                    out,
                    "      {} {}",
                    style("Relationship:").yellow(),
                    insight.relationship
                );
            }
            if !insight.shared_concepts.is_empty() {
                let _ = writeln!(
                    out,
                    "      {} {}",
                    style("Shared concepts:").yellow(),
                    insight.shared_concepts.join(", ")
                );
            }
            if !insight.practical_applications.is_empty() {
                let _ = writeln!(
                    out,
                    "      {} {}",
                    style("Practical applications:").yellow(),
                    insight.practical_applications
                );
            }
        }
    }

    if let Analysis::RawText(raw) = &explanation.analysis {
        let _ = writeln!(out);
        let _ = writeln!(out, "   {}", style("Model notes (unstructured):").yellow());
        for line in raw.lines().filter(|l| !l.trim().is_empty()) {
            let _ = writeln!(out, "      {}", line.trim());
        }
    }

    out
}

/// Appends one JSON object per explanation to a file
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonLinesSink {
    #[inline]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ConnectionSink for JsonLinesSink {
    async fn publish(&self, explanation: &ConnectionExplanation) -> Result<()> {
        let mut line = serde_json::to_string(explanation).map_err(|e| {
            VaultError::Other(anyhow::anyhow!("Failed to serialize explanation: {}", e))
        })?;
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

        debug!(
            "Appended explanation for {} to {}",
            explanation.source_id,
            self.path.display()
        );
        Ok(())
    }
}

/// Fans out to several sinks; every sink is tried and the first error returned
#[derive(Default, Clone)]
pub struct MultiSink {
    sinks: Vec<Arc<dyn ConnectionSink>>,
}

impl MultiSink {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn with(mut self, sink: Arc<dyn ConnectionSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl ConnectionSink for MultiSink {
    async fn publish(&self, explanation: &ConnectionExplanation) -> Result<()> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.publish(explanation).await {
                warn!(
                    kind = e.kind(),
                    "Sink failed to publish {}: {}", explanation.source_id, e
                );
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
