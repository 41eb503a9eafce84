use crate::models::usage::CanonicalUsage;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Chat,
    Responses,
    Audio,
    Transcription,
    Image,
}

impl ChunkKind {
    pub const ALL: [ChunkKind; 5] = [
        ChunkKind::Chat,
        ChunkKind::Responses,
        ChunkKind::Audio,
        ChunkKind::Transcription,
        ChunkKind::Image,
    ];
}

/// Fields every chunk variant carries regardless of kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkTrailer {
    pub finish_reason: Option<String>,
    pub token_usage: Option<CanonicalUsage>,
    pub cost: Option<BigDecimal>,
    pub cache_debug: Option<Value>,
    pub raw_response: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ToolCallDelta {
    pub index: i64,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments_delta: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReasoningDelta {
    pub index: i64,
    pub text_delta: Option<String>,
    pub signature_delta: Option<String>,
    pub summary_delta: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AudioDelta {
    pub assistant_id: Option<String>,
    pub data_delta: Option<Vec<u8>>,
    pub transcript_delta: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChatChunk {
    pub timestamp_ms: i64,
    pub chunk_index: i64,
    pub role: Option<String>,
    pub content_delta: Option<String>,
    pub tool_call_deltas: Vec<ToolCallDelta>,
    pub reasoning_deltas: Vec<ReasoningDelta>,
    pub audio_delta: Option<AudioDelta>,
    pub trailer: ChunkTrailer,
}

/// One event from a Responses-style stream. Deep-copied at ingest: every
/// `String`/`Vec` field here is an owned copy, never a borrow into a
/// provider-owned buffer, because multiple observers mutate the assembled
/// message concurrently.
#[derive(Debug, Clone)]
pub enum ResponsesEvent {
    OutputItemAdded { item_id: String },
    ContentPartAdded { item_id: String, content_index: i64 },
    OutputTextDelta { item_id: String, content_index: i64, delta: String },
    RefusalDelta { item_id: String, content_index: i64, delta: String },
    FunctionCallArgumentsDelta { item_id: String, delta: String },
    ReasoningSummaryTextDelta { item_id: String, delta: String },
}

#[derive(Debug, Clone)]
pub struct ResponsesChunk {
    pub timestamp_ms: i64,
    pub chunk_index: i64,
    pub event: ResponsesEvent,
    pub trailer: ChunkTrailer,
}

#[derive(Debug, Clone)]
pub struct TranscriptionChunk {
    pub timestamp_ms: i64,
    pub chunk_index: i64,
    pub text_delta: Option<String>,
    pub trailer: ChunkTrailer,
}

#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub timestamp_ms: i64,
    pub chunk_index: i64,
    pub audio_delta: Option<Vec<u8>>,
    pub trailer: ChunkTrailer,
}

#[derive(Debug, Clone)]
pub struct ImageChunk {
    pub timestamp_ms: i64,
    pub chunk_index: i64,
    pub image_index: i64,
    /// `extra_fields.chunk_index`, when present. Per the mandated priority
    /// rule this wins over `partial_image_index` only when strictly positive.
    pub extra_fields_chunk_index: Option<i64>,
    pub partial_image_index: Option<i64>,
    pub is_complete: bool,
    pub image_b64: Option<String>,
    pub revised_prompt: Option<String>,
    pub model: Option<String>,
    pub trailer: ChunkTrailer,
}

impl ImageChunk {
    /// The effective ordering index for this image chunk, per the mandated
    /// (and acknowledged-quirky) priority rule.
    pub fn effective_chunk_index(&self) -> i64 {
        match self.extra_fields_chunk_index {
            Some(v) if v > 0 => v,
            _ => self.partial_image_index.unwrap_or(self.chunk_index),
        }
    }
}

#[derive(Debug, Clone)]
pub enum StreamChunk {
    Chat(ChatChunk),
    Responses(ResponsesChunk),
    Audio(AudioChunk),
    Transcription(TranscriptionChunk),
    Image(ImageChunk),
}

impl StreamChunk {
    pub fn kind(&self) -> ChunkKind {
        match self {
            StreamChunk::Chat(_) => ChunkKind::Chat,
            StreamChunk::Responses(_) => ChunkKind::Responses,
            StreamChunk::Audio(_) => ChunkKind::Audio,
            StreamChunk::Transcription(_) => ChunkKind::Transcription,
            StreamChunk::Image(_) => ChunkKind::Image,
        }
    }

    pub fn timestamp_ms(&self) -> i64 {
        match self {
            StreamChunk::Chat(c) => c.timestamp_ms,
            StreamChunk::Responses(c) => c.timestamp_ms,
            StreamChunk::Audio(c) => c.timestamp_ms,
            StreamChunk::Transcription(c) => c.timestamp_ms,
            StreamChunk::Image(c) => c.timestamp_ms,
        }
    }

    pub fn chunk_index(&self) -> i64 {
        match self {
            StreamChunk::Chat(c) => c.chunk_index,
            StreamChunk::Responses(c) => c.chunk_index,
            StreamChunk::Audio(c) => c.chunk_index,
            StreamChunk::Transcription(c) => c.chunk_index,
            StreamChunk::Image(c) => c.chunk_index,
        }
    }

    /// Dedup/ordering key: `(image_index, chunk_index)` for Image chunks,
    /// `(0, chunk_index)` for every other kind.
    pub fn dedup_key(&self) -> (i64, i64) {
        match self {
            StreamChunk::Image(c) => (c.image_index, c.chunk_index),
            other => (0, other.chunk_index()),
        }
    }
}
