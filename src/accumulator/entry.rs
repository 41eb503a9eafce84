use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use crate::runtime::record_assertion_failure;

use super::chunk::{AudioChunk, ChatChunk, ChunkKind, ImageChunk, ResponsesChunk, TranscriptionChunk};

#[derive(Default)]
pub struct KindTrack<T> {
    pub chunks: Vec<T>,
    pub seen: HashSet<(i64, i64)>,
    pub max_index: i64,
    pub is_complete: bool,
}

impl<T> KindTrack<T> {
    fn new() -> Self {
        Self {
            chunks: Vec::new(),
            seen: HashSet::new(),
            max_index: -1,
            is_complete: false,
        }
    }

    pub fn is_duplicate(&self, dedup_key: (i64, i64)) -> bool {
        self.seen.contains(&dedup_key)
    }

    /// Appends `chunk` unless `dedup_key` has already been seen. Returns
    /// whether it was appended (false means a duplicate was dropped).
    fn try_append(&mut self, dedup_key: (i64, i64), chunk_index: i64, chunk: T) -> bool {
        if self.seen.contains(&dedup_key) {
            return false;
        }
        self.seen.insert(dedup_key);
        self.chunks.push(chunk);
        if chunk_index > self.max_index {
            self.max_index = chunk_index;
        }
        true
    }
}

/// All mutable state for one request-id, guarded by a single mutex per the
/// mandated locking discipline: chunk append, completion claiming, and pool
/// return of this entry's chunks all happen with this lock held.
pub struct StreamAccumulatorInner {
    pub chat: KindTrack<ChatChunk>,
    pub responses: KindTrack<ResponsesChunk>,
    pub audio: KindTrack<AudioChunk>,
    pub transcription: KindTrack<TranscriptionChunk>,
    pub image: KindTrack<ImageChunk>,
    pub start_ts_ms: Option<i64>,
    pub first_chunk_ts_ms: Option<i64>,
    pub final_ts_ms: Option<i64>,
}

impl StreamAccumulatorInner {
    fn new() -> Self {
        Self {
            chat: KindTrack::new(),
            responses: KindTrack::new(),
            audio: KindTrack::new(),
            transcription: KindTrack::new(),
            image: KindTrack::new(),
            start_ts_ms: None,
            first_chunk_ts_ms: None,
            final_ts_ms: None,
        }
    }

    pub fn observe_timestamps(&mut self, chunk_ts_ms: i64, context_start_ts_ms: Option<i64>) {
        if self.start_ts_ms.is_none() {
            self.start_ts_ms = context_start_ts_ms.or(Some(chunk_ts_ms));
        }
        if self.first_chunk_ts_ms.is_none() {
            self.first_chunk_ts_ms = Some(chunk_ts_ms);
        }
    }

    pub fn mark_final(&mut self, ts_ms: i64) {
        self.final_ts_ms = Some(ts_ms);
    }

    /// CAS-style completion claim for a single-assembler kind: the first
    /// caller to observe the final chunk for this kind wins and runs
    /// assembly; later callers see `false` and return `Delta`/`nil`.
    pub fn claim_completion(&mut self, kind: ChunkKind) -> bool {
        let track_complete = match kind {
            ChunkKind::Chat => &mut self.chat.is_complete,
            ChunkKind::Responses => &mut self.responses.is_complete,
            ChunkKind::Audio => &mut self.audio.is_complete,
            ChunkKind::Transcription => &mut self.transcription.is_complete,
            ChunkKind::Image => &mut self.image.is_complete,
        };
        if *track_complete {
            false
        } else {
            *track_complete = true;
            true
        }
    }

    pub fn time_to_first_token_ms(&self) -> i64 {
        match (self.first_chunk_ts_ms, self.start_ts_ms) {
            (Some(first), Some(start)) => (first - start).max(0),
            _ => 0,
        }
    }

    pub fn latency_ms(&self) -> i64 {
        match (self.final_ts_ms, self.start_ts_ms) {
            (Some(final_ts), Some(start)) => (final_ts - start).max(0),
            _ => 0,
        }
    }
}

pub struct StreamAccumulatorEntry {
    pub request_id: String,
    pub ref_count: AtomicI64,
    pub created_at: Instant,
    pub inner: Mutex<StreamAccumulatorInner>,
}

impl StreamAccumulatorEntry {
    pub fn new(request_id: String) -> Self {
        Self {
            request_id,
            ref_count: AtomicI64::new(0),
            created_at: Instant::now(),
            inner: Mutex::new(StreamAccumulatorInner::new()),
        }
    }

    pub fn incr_ref(&self) -> i64 {
        self.ref_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Decrements the ref count and returns the post-decrement value.
    pub fn decr_ref(&self) -> i64 {
        self.ref_count.fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub fn ref_count(&self) -> i64 {
        self.ref_count.load(Ordering::SeqCst)
    }

    pub fn lock(&self) -> std::sync::MutexGuard<'_, StreamAccumulatorInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                record_assertion_failure("stream accumulator entry mutex poisoned");
                poisoned.into_inner()
            }
        }
    }
}

impl<T> KindTrack<T> {
    pub fn append_if_new(&mut self, dedup_key: (i64, i64), chunk_index: i64, chunk: T) -> bool {
        self.try_append(dedup_key, chunk_index, chunk)
    }
}
