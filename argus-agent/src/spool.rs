//! Durable encrypted event spool.
//!
//! Two tiers: an in-memory buffer of pending events (one list per event
//! kind, insertion order) and sealed segment files on disk. A flush
//! serializes the buffer into a new segment:
//!
//! ```text
//! [ 4-byte magic "LGQ1" ]
//! [ 16-byte random salt ]
//! [ 12-byte random nonce ]
//! [ AES-256-GCM ciphertext + 16-byte tag ]
//! ```
//!
//! The AES key is derived per segment with PBKDF2-HMAC-SHA256 over the
//! deployment secret and the per-file salt. The GCM tag doubles as tamper
//! evidence: a segment that fails authenticated decryption is moved to
//! `quarantine/` and never retried in-band. Segments are written to a
//! `.part` file and renamed so a half-written segment is never observed.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use argus_core::types::{AlertEvent, AppUsageEvent, FileEvent, NetworkEvent};
use argus_core::{ArgusError, ArgusResult};
use parking_lot::Mutex;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, info, warn};

const MAGIC: &[u8; 4] = b"LGQ1";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const PBKDF2_ROUNDS: u32 = 100_000;
const SEGMENT_EXT: &str = "lgq";
const QUARANTINE_DIR: &str = "quarantine";

/// Decrypted content of one segment, and the shape of the in-memory
/// buffer between flushes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SegmentPayload {
    #[serde(default)]
    pub file_events: Vec<FileEvent>,
    #[serde(default)]
    pub network_events: Vec<NetworkEvent>,
    #[serde(default)]
    pub app_usage_events: Vec<AppUsageEvent>,
    #[serde(default)]
    pub alerts: Vec<AlertEvent>,
}

impl SegmentPayload {
    pub fn len(&self) -> usize {
        self.file_events.len()
            + self.network_events.len()
            + self.app_usage_events.len()
            + self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The local event queue: mutex-guarded in-memory buffer plus sealed
/// segment files under the spool directory.
pub struct EventQueue {
    dir: PathBuf,
    secret: Vec<u8>,
    buffer: Mutex<SegmentPayload>,
    segment_seq: AtomicU64,
    total_enqueued: AtomicU64,
    total_flushed: AtomicU64,
    total_quarantined: AtomicU64,
}

impl EventQueue {
    /// Open (creating if needed) the spool at `dir`, sealed with `secret`.
    pub fn open(dir: impl Into<PathBuf>, secret: &[u8]) -> ArgusResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        std::fs::create_dir_all(dir.join(QUARANTINE_DIR))?;
        info!(dir = %dir.display(), "Event spool opened");
        Ok(Self {
            dir,
            secret: secret.to_vec(),
            buffer: Mutex::new(SegmentPayload::default()),
            segment_seq: AtomicU64::new(0),
            total_enqueued: AtomicU64::new(0),
            total_flushed: AtomicU64::new(0),
            total_quarantined: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // ── Enqueue ──────────────────────────────────────────────────────────

    pub fn enqueue_file(&self, event: FileEvent) {
        self.total_enqueued.fetch_add(1, Ordering::Relaxed);
        self.buffer.lock().file_events.push(event);
    }

    pub fn enqueue_network(&self, event: NetworkEvent) {
        self.total_enqueued.fetch_add(1, Ordering::Relaxed);
        self.buffer.lock().network_events.push(event);
    }

    pub fn enqueue_app(&self, event: AppUsageEvent) {
        self.total_enqueued.fetch_add(1, Ordering::Relaxed);
        self.buffer.lock().app_usage_events.push(event);
    }

    pub fn enqueue_alert(&self, event: AlertEvent) {
        self.total_enqueued.fetch_add(1, Ordering::Relaxed);
        self.buffer.lock().alerts.push(event);
    }

    /// Events currently buffered in memory (not yet sealed).
    pub fn pending(&self) -> usize {
        self.buffer.lock().len()
    }

    // ── Flush ────────────────────────────────────────────────────────────

    /// Seal the current buffer into a new segment. Returns the segment
    /// path, or `None` when the buffer was empty.
    pub fn flush(&self) -> ArgusResult<Option<PathBuf>> {
        let payload = {
            let mut buffer = self.buffer.lock();
            if buffer.is_empty() {
                return Ok(None);
            }
            std::mem::take(&mut *buffer)
        };

        let count = payload.len();
        let plaintext = serde_json::to_vec(&payload)?;
        let sealed = seal(&self.secret, &plaintext)?;

        let seq = self.segment_seq.fetch_add(1, Ordering::Relaxed);
        let name = format!(
            "{:013}-{:04}.{}",
            chrono::Utc::now().timestamp_millis(),
            seq,
            SEGMENT_EXT
        );
        let path = self.dir.join(&name);
        let part = self.dir.join(format!("{}.part", name));

        std::fs::write(&part, &sealed)?;
        std::fs::rename(&part, &path)?;

        self.total_flushed.fetch_add(count as u64, Ordering::Relaxed);
        info!(segment = %name, events = count, bytes = sealed.len(), "Segment sealed");
        Ok(Some(path))
    }

    // ── Segment access (uploader side) ───────────────────────────────────

    /// Sealed segments, oldest first.
    pub fn list_segments(&self) -> Vec<PathBuf> {
        let mut segments = Vec::new();
        if let Ok(entries) = std::fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_file() && path.extension().map_or(false, |e| e == SEGMENT_EXT) {
                    segments.push(path);
                }
            }
        }
        segments.sort();
        segments
    }

    /// Decrypt and decode one segment.
    pub fn read_segment(&self, path: &Path) -> ArgusResult<SegmentPayload> {
        let raw = std::fs::read(path)?;
        let plaintext = unseal(&self.secret, &raw, path)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    /// Remove an acknowledged segment.
    pub fn delete_segment(&self, path: &Path) -> ArgusResult<()> {
        std::fs::remove_file(path)?;
        Ok(())
    }

    /// Move a corrupt segment aside for later inspection.
    pub fn quarantine(&self, path: &Path) {
        let target = self
            .dir
            .join(QUARANTINE_DIR)
            .join(path.file_name().unwrap_or_else(|| "segment".as_ref()));
        match std::fs::rename(path, &target) {
            Ok(()) => {
                self.total_quarantined.fetch_add(1, Ordering::Relaxed);
                error!(segment = %path.display(), "Corrupt segment quarantined");
            }
            Err(e) => {
                error!(segment = %path.display(), error = %e, "Failed to quarantine segment");
            }
        }
    }

    /// Delete segments older than the retention window.
    pub fn sweep_expired(&self, retention_days: u32) {
        let cutoff_ms =
            chrono::Utc::now().timestamp_millis() - i64::from(retention_days) * 86_400_000;
        for path in self.list_segments() {
            if segment_age_ms(&path).map_or(false, |ms| ms < cutoff_ms) {
                warn!(segment = %path.display(), "Retention window exceeded, deleting segment");
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!(segment = %path.display(), error = %e, "Failed to delete expired segment");
                }
            }
        }
    }

    // ── Stats ────────────────────────────────────────────────────────────

    pub fn total_enqueued(&self) -> u64 {
        self.total_enqueued.load(Ordering::Relaxed)
    }
    pub fn total_flushed(&self) -> u64 {
        self.total_flushed.load(Ordering::Relaxed)
    }
    pub fn total_quarantined(&self) -> u64 {
        self.total_quarantined.load(Ordering::Relaxed)
    }
}

/// Creation time embedded in the segment name, falling back to file
/// metadata for names not produced by this process.
fn segment_age_ms(path: &Path) -> Option<i64> {
    let stem = path.file_stem()?.to_str()?;
    if let Some(ms) = stem.split('-').next().and_then(|s| s.parse::<i64>().ok()) {
        return Some(ms);
    }
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    let since_epoch = modified.duration_since(std::time::UNIX_EPOCH).ok()?;
    Some(since_epoch.as_millis() as i64)
}

fn derive_key(secret: &[u8], salt: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(secret, salt, PBKDF2_ROUNDS, &mut key);
    key
}

fn seal(secret: &[u8], plaintext: &[u8]) -> ArgusResult<Vec<u8>> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    rand::thread_rng().fill_bytes(&mut nonce);

    let key = derive_key(secret, &salt);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| ArgusError::Other("segment encryption failed".into()))?;

    let mut out = Vec::with_capacity(MAGIC.len() + SALT_LEN + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn unseal(secret: &[u8], raw: &[u8], path: &Path) -> ArgusResult<Vec<u8>> {
    let header = MAGIC.len() + SALT_LEN + NONCE_LEN;
    if raw.len() < header + 16 {
        return Err(ArgusError::SegmentFormat(format!(
            "{}: truncated ({} bytes)",
            path.display(),
            raw.len()
        )));
    }
    if &raw[..MAGIC.len()] != MAGIC {
        return Err(ArgusError::SegmentFormat(format!(
            "{}: bad magic",
            path.display()
        )));
    }

    let salt = &raw[MAGIC.len()..MAGIC.len() + SALT_LEN];
    let nonce = &raw[MAGIC.len() + SALT_LEN..header];
    let ciphertext = &raw[header..];

    let key = derive_key(secret, salt);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| ArgusError::SegmentCorrupt {
            path: path.display().to_string(),
        })
}
