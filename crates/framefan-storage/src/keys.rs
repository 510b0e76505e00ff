//! The key namespace.
//!
//! Every coordination fact lives in an object whose key encodes it. Keys are
//! built and parsed here and nowhere else.
//!
//! All keys are rooted at `renders/{render_id}/`:
//!
//! | kind                  | suffix                                                     | lifetime  |
//! |-----------------------|------------------------------------------------------------|-----------|
//! | chunk payload         | `chunks/chunk:{chunk:08}`                                  | ephemeral |
//! | initialization marker | `lambda-initialized-chunk:{chunk:08}-attempt:{n}.txt`      | ephemeral |
//! | timing record         | `lambda-timings/chunk:{chunk:08}-start:{ms}-rendered:{ms}.txt` | ephemeral |
//! | encoding progress     | `encoding-progress.json`                                   | ephemeral |
//! | render metadata       | `pre-render-metadata.json`                                 | retained  |
//! | post-render data      | `post-render-metadata.json`                                | retained  |
//! | chunk error           | `errors/chunk:{chunk:08}-attempt:{n}.json`                 | retained  |
//! | render error          | `errors/render-attempt:{n}.json`                           | retained  |
//! | output                | `out.{ext}`                                                | retained  |
//!
//! Chunk indices are zero-padded to eight digits so that listing returns
//! chunks in numeric order and a per-chunk prefix never matches another chunk.

use std::fmt;
use std::str::FromStr;

use framefan_models::RenderId;
use thiserror::Error;

pub const RENDERS_ROOT: &str = "renders";
pub const CHUNK_INDEX_WIDTH: usize = 8;

const CHUNKS_DIR: &str = "chunks/";
const MARKER_STEM: &str = "lambda-initialized-chunk:";
const TIMINGS_DIR: &str = "lambda-timings/";
const ERRORS_DIR: &str = "errors/";
const ENCODING_PROGRESS: &str = "encoding-progress.json";
const RENDER_METADATA: &str = "pre-render-metadata.json";
const POST_RENDER_DATA: &str = "post-render-metadata.json";
const OUTPUT_STEM: &str = "out.";

/// A key that does not match the grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot parse key {key:?}: {reason}")]
pub struct KeyParseError {
    pub key: String,
    pub reason: &'static str,
}

impl KeyParseError {
    fn new(key: &str, reason: &'static str) -> Self {
        Self {
            key: key.to_string(),
            reason,
        }
    }
}

/// Whether a key kind is removed by cleanup or kept after completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyLifetime {
    Ephemeral,
    Retained,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    ChunkPayload,
    InitializationMarker,
    TimingRecord,
    EncodingProgress,
    RenderMetadata,
    PostRenderData,
    ChunkError,
    RenderError,
    Output,
}

impl KeyKind {
    pub const ALL: [KeyKind; 9] = [
        KeyKind::ChunkPayload,
        KeyKind::InitializationMarker,
        KeyKind::TimingRecord,
        KeyKind::EncodingProgress,
        KeyKind::RenderMetadata,
        KeyKind::PostRenderData,
        KeyKind::ChunkError,
        KeyKind::RenderError,
        KeyKind::Output,
    ];

    pub fn lifetime(&self) -> KeyLifetime {
        match self {
            KeyKind::ChunkPayload
            | KeyKind::InitializationMarker
            | KeyKind::TimingRecord
            | KeyKind::EncodingProgress => KeyLifetime::Ephemeral,
            KeyKind::RenderMetadata
            | KeyKind::PostRenderData
            | KeyKind::ChunkError
            | KeyKind::RenderError
            | KeyKind::Output => KeyLifetime::Retained,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            KeyKind::InitializationMarker | KeyKind::TimingRecord => "text/plain",
            KeyKind::ChunkPayload | KeyKind::Output => "application/octet-stream",
            _ => "application/json",
        }
    }
}

/// A fully decoded object key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectKey {
    ChunkPayload {
        render_id: RenderId,
        chunk: u32,
    },
    InitializationMarker {
        render_id: RenderId,
        chunk: u32,
        attempt: u32,
    },
    TimingRecord {
        render_id: RenderId,
        chunk: u32,
        start: i64,
        rendered: i64,
    },
    EncodingProgress {
        render_id: RenderId,
    },
    RenderMetadata {
        render_id: RenderId,
    },
    PostRenderData {
        render_id: RenderId,
    },
    ChunkError {
        render_id: RenderId,
        chunk: u32,
        attempt: u32,
    },
    RenderError {
        render_id: RenderId,
        attempt: u32,
    },
    Output {
        render_id: RenderId,
        extension: String,
    },
}

impl ObjectKey {
    pub fn kind(&self) -> KeyKind {
        match self {
            ObjectKey::ChunkPayload { .. } => KeyKind::ChunkPayload,
            ObjectKey::InitializationMarker { .. } => KeyKind::InitializationMarker,
            ObjectKey::TimingRecord { .. } => KeyKind::TimingRecord,
            ObjectKey::EncodingProgress { .. } => KeyKind::EncodingProgress,
            ObjectKey::RenderMetadata { .. } => KeyKind::RenderMetadata,
            ObjectKey::PostRenderData { .. } => KeyKind::PostRenderData,
            ObjectKey::ChunkError { .. } => KeyKind::ChunkError,
            ObjectKey::RenderError { .. } => KeyKind::RenderError,
            ObjectKey::Output { .. } => KeyKind::Output,
        }
    }

    pub fn render_id(&self) -> &RenderId {
        match self {
            ObjectKey::ChunkPayload { render_id, .. }
            | ObjectKey::InitializationMarker { render_id, .. }
            | ObjectKey::TimingRecord { render_id, .. }
            | ObjectKey::EncodingProgress { render_id }
            | ObjectKey::RenderMetadata { render_id }
            | ObjectKey::PostRenderData { render_id }
            | ObjectKey::ChunkError { render_id, .. }
            | ObjectKey::RenderError { render_id, .. }
            | ObjectKey::Output { render_id, .. } => render_id,
        }
    }

    pub fn chunk(&self) -> Option<u32> {
        match *self {
            ObjectKey::ChunkPayload { chunk, .. }
            | ObjectKey::InitializationMarker { chunk, .. }
            | ObjectKey::TimingRecord { chunk, .. }
            | ObjectKey::ChunkError { chunk, .. } => Some(chunk),
            _ => None,
        }
    }

    pub fn attempt(&self) -> Option<u32> {
        match *self {
            ObjectKey::InitializationMarker { attempt, .. }
            | ObjectKey::ChunkError { attempt, .. }
            | ObjectKey::RenderError { attempt, .. } => Some(attempt),
            _ => None,
        }
    }

    pub fn lifetime(&self) -> KeyLifetime {
        self.kind().lifetime()
    }

    /// Render this key as a storage path.
    pub fn encode(&self) -> String {
        let root = render_prefix(self.render_id());
        match self {
            ObjectKey::ChunkPayload { render_id, chunk } => {
                format!("{}chunk:{}", chunks_prefix(render_id), pad(*chunk))
            }
            ObjectKey::InitializationMarker { chunk, attempt, .. } => {
                format!("{root}{MARKER_STEM}{}-attempt:{attempt}.txt", pad(*chunk))
            }
            ObjectKey::TimingRecord {
                chunk,
                start,
                rendered,
                ..
            } => format!(
                "{root}{TIMINGS_DIR}chunk:{}-start:{start}-rendered:{rendered}.txt",
                pad(*chunk)
            ),
            ObjectKey::EncodingProgress { .. } => format!("{root}{ENCODING_PROGRESS}"),
            ObjectKey::RenderMetadata { .. } => format!("{root}{RENDER_METADATA}"),
            ObjectKey::PostRenderData { .. } => format!("{root}{POST_RENDER_DATA}"),
            ObjectKey::ChunkError { chunk, attempt, .. } => {
                format!("{root}{ERRORS_DIR}chunk:{}-attempt:{attempt}.json", pad(*chunk))
            }
            ObjectKey::RenderError { attempt, .. } => {
                format!("{root}{ERRORS_DIR}render-attempt:{attempt}.json")
            }
            ObjectKey::Output { extension, .. } => format!("{root}{OUTPUT_STEM}{extension}"),
        }
    }

    /// Parse a storage path back into a key.
    pub fn decode(key: &str) -> Result<Self, KeyParseError> {
        let rest = key
            .strip_prefix(RENDERS_ROOT)
            .and_then(|r| r.strip_prefix('/'))
            .ok_or_else(|| KeyParseError::new(key, "not under renders/"))?;
        let (id, suffix) = rest
            .split_once('/')
            .ok_or_else(|| KeyParseError::new(key, "missing render id"))?;
        let render_id =
            RenderId::parse(id).map_err(|_| KeyParseError::new(key, "invalid render id"))?;

        match suffix {
            ENCODING_PROGRESS => return Ok(ObjectKey::EncodingProgress { render_id }),
            RENDER_METADATA => return Ok(ObjectKey::RenderMetadata { render_id }),
            POST_RENDER_DATA => return Ok(ObjectKey::PostRenderData { render_id }),
            _ => {}
        }

        if let Some(s) = suffix.strip_prefix(CHUNKS_DIR) {
            let digits = s
                .strip_prefix("chunk:")
                .ok_or_else(|| KeyParseError::new(key, "malformed chunk payload"))?;
            let chunk = parse_chunk(key, digits)?;
            return Ok(ObjectKey::ChunkPayload { render_id, chunk });
        }

        if let Some(s) = suffix.strip_prefix(MARKER_STEM) {
            let s = s
                .strip_suffix(".txt")
                .ok_or_else(|| KeyParseError::new(key, "marker missing .txt"))?;
            let (chunk, attempt) = parse_chunk_attempt(key, s)?;
            return Ok(ObjectKey::InitializationMarker {
                render_id,
                chunk,
                attempt,
            });
        }

        if let Some(s) = suffix.strip_prefix(TIMINGS_DIR) {
            let s = s
                .strip_prefix("chunk:")
                .and_then(|s| s.strip_suffix(".txt"))
                .ok_or_else(|| KeyParseError::new(key, "malformed timing record"))?;
            let (digits, times) = s
                .split_once("-start:")
                .ok_or_else(|| KeyParseError::new(key, "timing record missing start"))?;
            let (start, rendered) = times
                .split_once("-rendered:")
                .ok_or_else(|| KeyParseError::new(key, "timing record missing rendered"))?;
            return Ok(ObjectKey::TimingRecord {
                render_id,
                chunk: parse_chunk(key, digits)?,
                start: parse_canonical(key, start)?,
                rendered: parse_canonical(key, rendered)?,
            });
        }

        if let Some(s) = suffix.strip_prefix(ERRORS_DIR) {
            let s = s
                .strip_suffix(".json")
                .ok_or_else(|| KeyParseError::new(key, "error record missing .json"))?;
            if let Some(n) = s.strip_prefix("render-attempt:") {
                return Ok(ObjectKey::RenderError {
                    render_id,
                    attempt: parse_attempt(key, n)?,
                });
            }
            let s = s
                .strip_prefix("chunk:")
                .ok_or_else(|| KeyParseError::new(key, "malformed error record"))?;
            let (chunk, attempt) = parse_chunk_attempt(key, s)?;
            return Ok(ObjectKey::ChunkError {
                render_id,
                chunk,
                attempt,
            });
        }

        if let Some(ext) = suffix.strip_prefix(OUTPUT_STEM) {
            if ext.is_empty() || ext.contains('/') {
                return Err(KeyParseError::new(key, "invalid output extension"));
            }
            return Ok(ObjectKey::Output {
                render_id,
                extension: ext.to_string(),
            });
        }

        Err(KeyParseError::new(key, "unknown key kind"))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for ObjectKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

fn pad(chunk: u32) -> String {
    format!("{:0width$}", chunk, width = CHUNK_INDEX_WIDTH)
}

fn parse_chunk(key: &str, digits: &str) -> Result<u32, KeyParseError> {
    let chunk: u32 = digits
        .parse()
        .map_err(|_| KeyParseError::new(key, "chunk index is not a number"))?;
    // Only the canonical padding decodes, so decode(encode(x)) is a bijection.
    if pad(chunk) != digits {
        return Err(KeyParseError::new(key, "chunk index is not zero-padded"));
    }
    Ok(chunk)
}

fn parse_attempt(key: &str, digits: &str) -> Result<u32, KeyParseError> {
    let attempt: u32 = parse_canonical(key, digits)?;
    if attempt == 0 {
        return Err(KeyParseError::new(key, "attempt numbers start at 1"));
    }
    Ok(attempt)
}

fn parse_chunk_attempt(key: &str, s: &str) -> Result<(u32, u32), KeyParseError> {
    let (digits, attempt) = s
        .split_once("-attempt:")
        .ok_or_else(|| KeyParseError::new(key, "missing attempt"))?;
    Ok((parse_chunk(key, digits)?, parse_attempt(key, attempt)?))
}

fn parse_canonical<T>(key: &str, s: &str) -> Result<T, KeyParseError>
where
    T: FromStr + ToString,
{
    let value: T = s
        .parse()
        .map_err(|_| KeyParseError::new(key, "not a number"))?;
    if value.to_string() != s {
        return Err(KeyParseError::new(key, "number is not in canonical form"));
    }
    Ok(value)
}

/// `renders/{id}/`
pub fn render_prefix(render_id: &RenderId) -> String {
    format!("{RENDERS_ROOT}/{render_id}/")
}

/// Prefix shared by every initialization marker of a render.
pub fn marker_prefix(render_id: &RenderId) -> String {
    format!("{}{MARKER_STEM}", render_prefix(render_id))
}

/// Prefix shared by every timing record of a render.
pub fn timings_prefix(render_id: &RenderId) -> String {
    format!("{}{TIMINGS_DIR}", render_prefix(render_id))
}

/// Prefix shared by the timing records of one chunk.
pub fn chunk_timings_prefix(render_id: &RenderId, chunk: u32) -> String {
    format!("{}chunk:{}-", timings_prefix(render_id), pad(chunk))
}

pub fn errors_prefix(render_id: &RenderId) -> String {
    format!("{}{ERRORS_DIR}", render_prefix(render_id))
}

/// Prefix shared by every chunk payload of a render.
pub fn chunks_prefix(render_id: &RenderId) -> String {
    format!("{}{CHUNKS_DIR}", render_prefix(render_id))
}
