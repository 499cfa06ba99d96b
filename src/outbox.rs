// =============================================================================
// Signal Outbox — durable FIFO of trade intents with atomic replace-on-write
// =============================================================================
//
// The outbox is a single JSON document `{ "signals": [ ... ] }` on a
// persistent disk. Every mutation rewrites the whole file through a sibling
// temp file, fsync, then rename, so a partially-written document is never
// observable. Unreadable content heals to the empty document; a single
// malformed entry is dropped at pop time without touching its neighbors.
//
// Dedupe here is soft (last 50 fingerprints); the executed_signals table in
// the store is the real idempotency barrier.
// =============================================================================

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::signal::{self, Signal};

/// How many trailing entries the soft dedupe scans.
const DEDUPE_WINDOW: usize = 50;

/// On-disk document layout. Entries stay as raw JSON until popped so one bad
/// entry cannot poison the queue.
#[derive(Debug, Default, Serialize, Deserialize)]
struct OutboxDocument {
    #[serde(default)]
    signals: Vec<Value>,
}

/// Handle to the outbox file.
#[derive(Debug, Clone)]
pub struct Outbox {
    path: PathBuf,
}

impl Outbox {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // -------------------------------------------------------------------------
    // File lifecycle
    // -------------------------------------------------------------------------

    /// Create the file with an empty document if missing; heal corrupt content
    /// by overwriting with the empty document.
    pub fn ensure_exists(&self) -> Result<()> {
        if !self.path.exists() {
            self.write_atomic(&OutboxDocument::default())?;
            info!(path = %self.path.display(), "outbox created");
            return Ok(());
        }

        if let Err(e) = self.read() {
            warn!(
                path = %self.path.display(),
                error = %e,
                "outbox unreadable — healing with empty document"
            );
            self.write_atomic(&OutboxDocument::default())?;
        }
        Ok(())
    }

    fn read(&self) -> Result<OutboxDocument> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read outbox at {}", self.path.display()))?;
        let doc: OutboxDocument = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse outbox at {}", self.path.display()))?;
        Ok(doc)
    }

    /// Missing file reads as empty; a corrupt file is healed in place.
    fn read_or_heal(&self) -> Result<OutboxDocument> {
        if !self.path.exists() {
            return Ok(OutboxDocument::default());
        }
        match self.read() {
            Ok(doc) => Ok(doc),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "outbox parse failed — healing with empty document"
                );
                self.write_atomic(&OutboxDocument::default())?;
                Ok(OutboxDocument::default())
            }
        }
    }

    /// Atomic rewrite: sibling temp file in the same directory, flush + fsync,
    /// then rename over the target.
    fn write_atomic(&self, doc: &OutboxDocument) -> Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create outbox dir {}", dir.display()))?;
        }

        let content = serde_json::to_string_pretty(doc).context("failed to serialise outbox")?;

        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut file = std::fs::File::create(&tmp_path)
                .with_context(|| format!("failed to create tmp outbox {}", tmp_path.display()))?;
            file.write_all(content.as_bytes())
                .with_context(|| format!("failed to write tmp outbox {}", tmp_path.display()))?;
            file.sync_all()
                .with_context(|| format!("failed to fsync tmp outbox {}", tmp_path.display()))?;
        }

        std::fs::rename(&tmp_path, &self.path).with_context(|| {
            format!(
                "failed to rename tmp outbox {} over {}",
                tmp_path.display(),
                self.path.display()
            )
        })?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Queue operations
    // -------------------------------------------------------------------------

    /// Validate `signal`, attach its fingerprint, and append it.
    ///
    /// Returns `true` if the signal was written, `false` on a soft-dedupe hit
    /// (same fingerprint within the trailing window).
    pub fn append(&self, mut signal: Signal) -> Result<bool> {
        signal::validate(&signal)?;

        let fp = signal::fingerprint(&signal);
        signal.fingerprint = Some(fp.clone());

        let mut doc = self.read_or_heal()?;

        let window_start = doc.signals.len().saturating_sub(DEDUPE_WINDOW);
        let duplicate = doc.signals[window_start..]
            .iter()
            .any(|s| s["_fingerprint"].as_str() == Some(fp.as_str()));
        if duplicate {
            info!(fingerprint = %fp, "outbox append deduped");
            return Ok(false);
        }

        let entry = serde_json::to_value(&signal).context("failed to serialise signal")?;
        doc.signals.push(entry);
        self.write_atomic(&doc)?;
        Ok(true)
    }

    /// Pop the head of the queue (FIFO) and rewrite the remainder atomically.
    ///
    /// A malformed head entry is dropped (the rewrite already removed it) and
    /// reads as an empty pop; the entries behind it survive.
    pub fn pop_next(&self) -> Result<Option<Signal>> {
        let mut doc = self.read_or_heal()?;
        if doc.signals.is_empty() {
            return Ok(None);
        }

        let head = doc.signals.remove(0);
        self.write_atomic(&doc)?;

        match serde_json::from_value::<Signal>(head) {
            Ok(signal) => Ok(Some(signal)),
            Err(e) => {
                warn!(error = %e, "malformed outbox entry dropped");
                Ok(None)
            }
        }
    }

    /// Number of queued entries. Zero for a missing or corrupt file.
    pub fn len(&self) -> usize {
        self.read_or_heal().map(|d| d.signals.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
