// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Slot checkpoint files.
//!
//! A checkpoint is a primary binary file plus an optional JSON sidecar at `<file>.ctxchk`.
//!
//! Primary layout, little endian:
//!
//! ```text
//! magic "SLOTCKPT" | version u32 | slot id u32 | model len u32 | model bytes
//! | n_tokens u64 | n_tokens x (token u32, cell u64) | xxh3 of all preceding bytes u64
//! ```
//!
//! The sidecar lists token boundaries inside the primary file. It is bound to the primary
//! by length and checksum; a sidecar that is missing or does not match downgrades a
//! restore to `partial_legacy` but never fails it.
//!
//! Both files are written to a temporary file in the target directory and renamed into
//! place, so a failed save leaves the previous checkpoint intact.
//!
//! Everything here is blocking I/O. Async callers go through `spawn_blocking`.

use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, HasErrorKind};
use crate::tokens::{compute_hash, Cell, Token, TokenState};

pub const CHECKPOINT_MAGIC: &[u8; 8] = b"SLOTCKPT";
pub const FORMAT_VERSION: u32 = 1;
pub const SIDECAR_EXTENSION: &str = "ctxchk";
pub const SIDECAR_VERSION: u32 = 1;

/// Bytes per (token, cell) record
const RECORD_LEN: usize = 4 + 8;
const CHECKSUM_LEN: usize = 8;
const CHECKSUM_SEED: u64 = 0;

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint file not found: {0}")]
    NotFound(PathBuf),

    #[error("permission denied accessing checkpoint file {0}")]
    PermissionDenied(PathBuf),

    #[error("corrupt checkpoint file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("invalid checkpoint filename '{0}'")]
    InvalidTarget(String),

    #[error("checkpoint {path} was saved for model '{found}', not '{expected}'")]
    ModelMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("checkpoint {path} holds {n_tokens} tokens, more than the slot context of {n_ctx}")]
    ContextOverflow {
        path: PathBuf,
        n_tokens: usize,
        n_ctx: usize,
    },

    #[error("checkpoint i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CheckpointError {
    fn from_io(path: &Path, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => CheckpointError::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => {
                CheckpointError::PermissionDenied(path.to_path_buf())
            }
            _ => CheckpointError::Io {
                path: path.to_path_buf(),
                source,
            },
        }
    }

    fn corrupt(path: &Path, reason: impl Into<String>) -> Self {
        CheckpointError::Corrupt {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

impl HasErrorKind for CheckpointError {
    fn kind(&self) -> ErrorKind {
        match self {
            CheckpointError::NotFound(_) => ErrorKind::NotFound,
            CheckpointError::Corrupt { .. }
            | CheckpointError::InvalidTarget(_)
            | CheckpointError::ModelMismatch { .. }
            | CheckpointError::ContextOverflow { .. } => ErrorKind::InvalidRequest,
            CheckpointError::PermissionDenied(_) | CheckpointError::Io { .. } => {
                ErrorKind::Internal
            }
        }
    }
}

/// How much of a checkpoint's metadata a restore could use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreQuality {
    /// The sidecar index matched and a checkpoint boundary was selected
    Full,
    /// Primary file only; the whole state was restored
    PartialLegacy,
    /// No checkpoint file exists
    Missing,
}

impl RestoreQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestoreQuality::Full => "full",
            RestoreQuality::PartialLegacy => "partial_legacy",
            RestoreQuality::Missing => "missing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub name: String,
    pub n_tokens: usize,
    pub byte_offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidecarIndex {
    pub version: u32,
    pub file_len: u64,
    pub file_checksum: u64,
    pub n_tokens: usize,
    pub checkpoints: Vec<CheckpointEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    pub path: PathBuf,
    pub n_saved: usize,
    /// bytes written to the primary file
    pub n_written: u64,
    pub n_checkpoints: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOutcome {
    pub state: TokenState,
    pub slot_id: u32,
    /// bytes read from the primary file
    pub n_read: u64,
    pub n_checkpoints: usize,
    pub quality: RestoreQuality,
}

impl LoadOutcome {
    pub fn n_restored(&self) -> usize {
        self.state.len()
    }
}

/// The sidecar path for a primary checkpoint file.
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(SIDECAR_EXTENSION);
    PathBuf::from(name)
}

/// Checkpoint files under one directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
    checkpoint_interval: usize,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>, checkpoint_interval: usize) -> Self {
        Self {
            dir: dir.into(),
            checkpoint_interval: checkpoint_interval.max(1),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resolve a client supplied filename inside the store directory.
    pub fn resolve(&self, filename: &str) -> Result<PathBuf, CheckpointError> {
        if !is_valid_filename(filename) {
            return Err(CheckpointError::InvalidTarget(filename.to_string()));
        }
        Ok(self.dir.join(filename))
    }

    /// `<model>.slot-<id>.bin`, with path separators in the model id replaced.
    pub fn canonical_filename(model: &str, slot_id: usize) -> String {
        let model: String = model
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' => '_',
                c if c.is_control() => '_',
                c => c,
            })
            .collect();
        format!("{model}.slot-{slot_id}.bin")
    }

    pub fn canonical_path(&self, model: &str, slot_id: usize) -> PathBuf {
        self.dir.join(Self::canonical_filename(model, slot_id))
    }

    /// Write `state` to `path` and refresh its sidecar.
    pub fn save(
        &self,
        path: &Path,
        slot_id: usize,
        model: &str,
        state: &TokenState,
    ) -> Result<SaveOutcome, CheckpointError> {
        let encoded = encode(slot_id as u32, model, state);
        let file_checksum = encoded.checksum;
        let file_len = encoded.bytes.len() as u64;

        let checkpoints = checkpoint_boundaries(state.len(), self.checkpoint_interval)
            .into_iter()
            .map(|n| CheckpointEntry {
                name: format!("tokens-{n}"),
                n_tokens: n,
                byte_offset: (encoded.header_len + n * RECORD_LEN) as u64,
            })
            .collect::<Vec<_>>();
        let index = SidecarIndex {
            version: SIDECAR_VERSION,
            file_len,
            file_checksum,
            n_tokens: state.len(),
            checkpoints,
        };
        let index_json = serde_json::to_vec_pretty(&index).map_err(|e| CheckpointError::Io {
            path: sidecar_path(path),
            source: std::io::Error::other(e),
        })?;

        write_atomic(path, &encoded.bytes)?;
        write_atomic(&sidecar_path(path), &index_json)?;

        tracing::debug!(
            path = %path.display(),
            id_slot = slot_id,
            n_saved = state.len(),
            n_checkpoints = index.checkpoints.len(),
            "slot checkpoint written"
        );

        Ok(SaveOutcome {
            path: path.to_path_buf(),
            n_saved: state.len(),
            n_written: file_len,
            n_checkpoints: index.checkpoints.len(),
        })
    }

    /// Read the checkpoint at `path` for `model`, limited to `n_ctx` tokens.
    ///
    /// Nothing is applied to a slot here; a failed load leaves the caller's state alone.
    pub fn load(
        &self,
        path: &Path,
        model: &str,
        n_ctx: usize,
    ) -> Result<LoadOutcome, CheckpointError> {
        let raw = std::fs::read(path).map_err(|e| CheckpointError::from_io(path, e))?;
        let decoded = decode(path, &raw)?;

        if decoded.model != model {
            return Err(CheckpointError::ModelMismatch {
                path: path.to_path_buf(),
                expected: model.to_string(),
                found: decoded.model,
            });
        }

        let n_read = raw.len() as u64;
        match read_sidecar(path, &decoded, n_read) {
            Some(index) => {
                let best = index
                    .checkpoints
                    .iter()
                    .filter(|c| c.n_tokens <= n_ctx)
                    .max_by_key(|c| c.n_tokens)
                    .ok_or_else(|| CheckpointError::ContextOverflow {
                        path: path.to_path_buf(),
                        n_tokens: decoded.state.len(),
                        n_ctx,
                    })?;
                Ok(LoadOutcome {
                    state: decoded.state.prefix(best.n_tokens),
                    slot_id: decoded.slot_id,
                    n_read,
                    n_checkpoints: index.checkpoints.len(),
                    quality: RestoreQuality::Full,
                })
            }
            None => {
                if decoded.state.len() > n_ctx {
                    return Err(CheckpointError::ContextOverflow {
                        path: path.to_path_buf(),
                        n_tokens: decoded.state.len(),
                        n_ctx,
                    });
                }
                Ok(LoadOutcome {
                    state: decoded.state,
                    slot_id: decoded.slot_id,
                    n_read,
                    n_checkpoints: 0,
                    quality: RestoreQuality::PartialLegacy,
                })
            }
        }
    }
}

/// Filenames must name a file directly inside the store directory.
fn is_valid_filename(filename: &str) -> bool {
    !filename.is_empty()
        && filename.len() <= 255
        && filename != "."
        && filename != ".."
        && !filename.starts_with('.')
        && !filename
            .chars()
            .any(|c| c == '/' || c == '\\' || c == ':' || c.is_control())
}

/// Token counts with a checkpoint: every `interval` tokens plus the final count.
fn checkpoint_boundaries(n_tokens: usize, interval: usize) -> Vec<usize> {
    let mut bounds: Vec<usize> = (1..=n_tokens / interval).map(|i| i * interval).collect();
    if n_tokens > 0 && bounds.last() != Some(&n_tokens) {
        bounds.push(n_tokens);
    }
    bounds
}

struct Encoded {
    bytes: BytesMut,
    header_len: usize,
    checksum: u64,
}

fn encode(slot_id: u32, model: &str, state: &TokenState) -> Encoded {
    let header_len = CHECKPOINT_MAGIC.len() + 4 + 4 + 4 + model.len() + 8;
    let mut buf =
        BytesMut::with_capacity(header_len + state.len() * RECORD_LEN + CHECKSUM_LEN);

    buf.put_slice(CHECKPOINT_MAGIC);
    buf.put_u32_le(FORMAT_VERSION);
    buf.put_u32_le(slot_id);
    buf.put_u32_le(model.len() as u32);
    buf.put_slice(model.as_bytes());
    buf.put_u64_le(state.len() as u64);
    for (token, cell) in state.iter() {
        buf.put_u32_le(token);
        buf.put_u64_le(cell);
    }
    let checksum = compute_hash(&buf, CHECKSUM_SEED);
    buf.put_u64_le(checksum);

    Encoded {
        bytes: buf,
        header_len,
        checksum,
    }
}

struct Decoded {
    slot_id: u32,
    model: String,
    state: TokenState,
    header_len: usize,
    checksum: u64,
}

fn decode(path: &Path, raw: &[u8]) -> Result<Decoded, CheckpointError> {
    let min_len = CHECKPOINT_MAGIC.len() + 4 + 4 + 4 + 8 + CHECKSUM_LEN;
    if raw.len() < min_len {
        return Err(CheckpointError::corrupt(path, "file is truncated"));
    }

    let (body, mut trailer) = raw.split_at(raw.len() - CHECKSUM_LEN);
    let checksum = trailer.get_u64_le();
    if compute_hash(body, CHECKSUM_SEED) != checksum {
        return Err(CheckpointError::corrupt(path, "checksum mismatch"));
    }

    let mut buf = body;
    if &buf[..CHECKPOINT_MAGIC.len()] != CHECKPOINT_MAGIC {
        return Err(CheckpointError::corrupt(path, "bad magic"));
    }
    buf.advance(CHECKPOINT_MAGIC.len());

    let version = buf.get_u32_le();
    if version != FORMAT_VERSION {
        return Err(CheckpointError::corrupt(
            path,
            format!("unsupported format version {version}"),
        ));
    }
    let slot_id = buf.get_u32_le();
    let model_len = buf.get_u32_le() as usize;
    if buf.remaining() < model_len + 8 {
        return Err(CheckpointError::corrupt(path, "header is truncated"));
    }
    let model = String::from_utf8(buf[..model_len].to_vec())
        .map_err(|_| CheckpointError::corrupt(path, "model id is not utf-8"))?;
    buf.advance(model_len);

    let n_tokens = buf.get_u64_le() as usize;
    let header_len = body.len() - buf.remaining();
    match n_tokens.checked_mul(RECORD_LEN) {
        Some(expected) if expected == buf.remaining() => {}
        _ => {
            return Err(CheckpointError::corrupt(
                path,
                format!(
                    "expected {n_tokens} records, found {} bytes",
                    buf.remaining()
                ),
            ))
        }
    }

    let mut tokens: Vec<Token> = Vec::with_capacity(n_tokens);
    let mut cells: Vec<Cell> = Vec::with_capacity(n_tokens);
    for _ in 0..n_tokens {
        tokens.push(buf.get_u32_le());
        cells.push(buf.get_u64_le());
    }
    let state = TokenState::from_parts(tokens, cells)
        .map_err(|e| CheckpointError::corrupt(path, e.to_string()))?;

    Ok(Decoded {
        slot_id,
        model,
        state,
        header_len,
        checksum,
    })
}

/// The sidecar for `path` if present and consistent with the decoded primary file.
fn read_sidecar(path: &Path, decoded: &Decoded, file_len: u64) -> Option<SidecarIndex> {
    let sidecar = sidecar_path(path);
    let raw = match std::fs::read(&sidecar) {
        Ok(raw) => raw,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %sidecar.display(), error = %e, "unreadable checkpoint sidecar");
            }
            return None;
        }
    };

    let index: SidecarIndex = match serde_json::from_slice(&raw) {
        Ok(index) => index,
        Err(e) => {
            tracing::warn!(path = %sidecar.display(), error = %e, "malformed checkpoint sidecar");
            return None;
        }
    };

    let n_tokens = decoded.state.len();
    let consistent = index.version == SIDECAR_VERSION
        && index.file_len == file_len
        && index.file_checksum == decoded.checksum
        && index.n_tokens == n_tokens
        && !index.checkpoints.is_empty()
        && index.checkpoints.iter().all(|c| {
            c.n_tokens <= n_tokens
                && c.byte_offset == (decoded.header_len + c.n_tokens * RECORD_LEN) as u64
        });
    if !consistent {
        tracing::warn!(path = %sidecar.display(), "checkpoint sidecar does not match primary file");
        return None;
    }
    Some(index)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CheckpointError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp =
        tempfile::NamedTempFile::new_in(dir).map_err(|e| CheckpointError::from_io(path, e))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| CheckpointError::from_io(path, e))?;
    tmp.persist(path)
        .map_err(|e| CheckpointError::from_io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::root_cell;
    use rstest::rstest;

    fn state_of(n: u32) -> TokenState {
        let mut state = TokenState::new();
        let tokens: Vec<Token> = (1..=n).collect();
        state.evaluate(root_cell("tiny"), &tokens);
        state
    }

    fn store(dir: &tempfile::TempDir) -> CheckpointStore {
        CheckpointStore::new(dir.path(), 16)
    }

    #[test]
    fn test_save_then_load_is_full() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let path = store.resolve("slot1.bin").unwrap();
        let state = state_of(40);

        let saved = store.save(&path, 1, "tiny", &state).unwrap();
        assert_eq!(saved.n_saved, 40);
        // 16, 32 and the final 40
        assert_eq!(saved.n_checkpoints, 3);
        assert!(sidecar_path(&path).exists());

        let loaded = store.load(&path, "tiny", 128).unwrap();
        assert_eq!(loaded.quality, RestoreQuality::Full);
        assert_eq!(loaded.n_restored(), saved.n_saved);
        assert_eq!(loaded.slot_id, 1);
        assert_eq!(loaded.n_read, saved.n_written);
        assert_eq!(loaded.state, state);
    }

    #[test]
    fn test_missing_sidecar_is_partial_legacy() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let path = store.resolve("legacy.bin").unwrap();
        store.save(&path, 0, "tiny", &state_of(20)).unwrap();
        std::fs::remove_file(sidecar_path(&path)).unwrap();

        let loaded = store.load(&path, "tiny", 128).unwrap();
        assert_eq!(loaded.quality, RestoreQuality::PartialLegacy);
        assert_eq!(loaded.n_restored(), 20);
        assert_eq!(loaded.n_checkpoints, 0);
    }

    #[test]
    fn test_stale_sidecar_is_partial_legacy() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let a = store.resolve("a.bin").unwrap();
        let b = store.resolve("b.bin").unwrap();
        store.save(&a, 0, "tiny", &state_of(20)).unwrap();
        store.save(&b, 0, "tiny", &state_of(30)).unwrap();
        // pair a's primary with b's sidecar
        std::fs::copy(sidecar_path(&b), sidecar_path(&a)).unwrap();

        let loaded = store.load(&a, "tiny", 128).unwrap();
        assert_eq!(loaded.quality, RestoreQuality::PartialLegacy);
        assert_eq!(loaded.n_restored(), 20);
    }

    #[test]
    fn test_sidecar_selects_largest_fitting_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let path = store.resolve("big.bin").unwrap();
        let state = state_of(40);
        store.save(&path, 0, "tiny", &state).unwrap();

        let loaded = store.load(&path, "tiny", 35).unwrap();
        assert_eq!(loaded.quality, RestoreQuality::Full);
        assert_eq!(loaded.n_restored(), 32);
        assert_eq!(loaded.state, state.prefix(32));

        let err = store.load(&path, "tiny", 8).unwrap_err();
        assert!(matches!(err, CheckpointError::ContextOverflow { .. }));
    }

    #[test]
    fn test_legacy_overflow_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let path = store.resolve("big.bin").unwrap();
        store.save(&path, 0, "tiny", &state_of(40)).unwrap();
        std::fs::remove_file(sidecar_path(&path)).unwrap();

        let err = store.load(&path, "tiny", 35).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let path = store.resolve("nothing.bin").unwrap();
        let err = store.load(&path, "tiny", 128).unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound(_)));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[rstest]
    #[case::bad_magic(0)]
    #[case::bad_record(40)]
    #[case::bad_checksum(usize::MAX)]
    fn test_corruption_is_detected(#[case] offset: usize) {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let path = store.resolve("c.bin").unwrap();
        store.save(&path, 0, "tiny", &state_of(10)).unwrap();

        let mut raw = std::fs::read(&path).unwrap();
        let offset = offset.min(raw.len() - 1);
        raw[offset] ^= 0xff;
        std::fs::write(&path, raw).unwrap();

        let err = store.load(&path, "tiny", 128).unwrap_err();
        assert!(matches!(err, CheckpointError::Corrupt { .. }), "{err}");
    }

    #[test]
    fn test_truncated_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let path = store.resolve("t.bin").unwrap();
        store.save(&path, 0, "tiny", &state_of(10)).unwrap();
        let raw = std::fs::read(&path).unwrap();
        std::fs::write(&path, &raw[..raw.len() / 2]).unwrap();

        assert!(matches!(
            store.load(&path, "tiny", 128).unwrap_err(),
            CheckpointError::Corrupt { .. }
        ));
    }

    #[test]
    fn test_model_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let path = store.resolve("m.bin").unwrap();
        store.save(&path, 0, "tiny", &state_of(5)).unwrap();

        let err = store.load(&path, "other", 128).unwrap_err();
        assert!(matches!(err, CheckpointError::ModelMismatch { .. }));
    }

    #[test]
    fn test_overwrite_replaces_previous_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let path = store.resolve("o.bin").unwrap();
        store.save(&path, 0, "tiny", &state_of(30)).unwrap();
        store.save(&path, 0, "tiny", &state_of(3)).unwrap();

        let loaded = store.load(&path, "tiny", 128).unwrap();
        assert_eq!(loaded.n_restored(), 3);
        assert_eq!(loaded.quality, RestoreQuality::Full);
        // only the two checkpoint files, no leftover temporaries
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_empty_state_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let path = store.resolve("empty.bin").unwrap();
        let saved = store.save(&path, 0, "tiny", &TokenState::new()).unwrap();
        assert_eq!(saved.n_checkpoints, 0);

        // no boundaries means the sidecar cannot be used
        let loaded = store.load(&path, "tiny", 128).unwrap();
        assert_eq!(loaded.quality, RestoreQuality::PartialLegacy);
        assert_eq!(loaded.n_restored(), 0);
    }

    #[rstest]
    #[case("slot1.bin", true)]
    #[case("tinyllama-2.slot-0.bin", true)]
    #[case("", false)]
    #[case("..", false)]
    #[case("../escape.bin", false)]
    #[case("dir/file.bin", false)]
    #[case(".hidden", false)]
    fn test_filename_validation(#[case] filename: &str, #[case] ok: bool) {
        let store = CheckpointStore::new("/tmp", 16);
        assert_eq!(store.resolve(filename).is_ok(), ok);
    }

    #[test]
    fn test_canonical_filename() {
        assert_eq!(
            CheckpointStore::canonical_filename("tinyllama-2", 0),
            "tinyllama-2.slot-0.bin"
        );
        assert_eq!(
            CheckpointStore::canonical_filename("org/model", 3),
            "org_model.slot-3.bin"
        );
    }

    #[rstest]
    #[case(0, 16, vec![])]
    #[case(10, 16, vec![10])]
    #[case(16, 16, vec![16])]
    #[case(40, 16, vec![16, 32, 40])]
    fn test_checkpoint_boundaries(
        #[case] n: usize,
        #[case] interval: usize,
        #[case] expected: Vec<usize>,
    ) {
        assert_eq!(checkpoint_boundaries(n, interval), expected);
    }
}
