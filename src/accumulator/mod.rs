pub mod assembly;
pub mod chunk;
pub mod context;
pub mod entry;
pub mod pool;
pub mod sweeper;

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::runtime::KeyedMap;

use assembly::{
    assemble_audio, assemble_chat, assemble_image, assemble_responses, assemble_transcription,
    with_timing, AssembledResult,
};
use chunk::{AudioChunk, ChatChunk, ChunkKind, ImageChunk, ResponsesChunk, TranscriptionChunk};
use context::IngestContext;
use entry::StreamAccumulatorEntry;
use pool::{recycle_audio, recycle_chat, recycle_image, recycle_responses, recycle_transcription, ChunkPools};

#[derive(Debug, Clone)]
pub enum IngestPayload {
    Chat(ChatChunk),
    Responses(ResponsesChunk),
    Audio(AudioChunk),
    Transcription(TranscriptionChunk),
    Image(ImageChunk),
}

impl IngestPayload {
    fn kind(&self) -> ChunkKind {
        match self {
            IngestPayload::Chat(_) => ChunkKind::Chat,
            IngestPayload::Responses(_) => ChunkKind::Responses,
            IngestPayload::Audio(_) => ChunkKind::Audio,
            IngestPayload::Transcription(_) => ChunkKind::Transcription,
            IngestPayload::Image(_) => ChunkKind::Image,
        }
    }

    fn timestamp_ms(&self) -> i64 {
        match self {
            IngestPayload::Chat(c) => c.timestamp_ms,
            IngestPayload::Responses(c) => c.timestamp_ms,
            IngestPayload::Audio(c) => c.timestamp_ms,
            IngestPayload::Transcription(c) => c.timestamp_ms,
            IngestPayload::Image(c) => c.timestamp_ms,
        }
    }

    fn chunk_index(&self) -> i64 {
        match self {
            IngestPayload::Chat(c) => c.chunk_index,
            IngestPayload::Responses(c) => c.chunk_index,
            IngestPayload::Audio(c) => c.chunk_index,
            IngestPayload::Transcription(c) => c.chunk_index,
            IngestPayload::Image(c) => c.chunk_index,
        }
    }

    fn dedup_key(&self) -> (i64, i64) {
        match self {
            IngestPayload::Image(c) => (c.image_index, c.chunk_index),
            other => (0, other.chunk_index()),
        }
    }
}

/// Result of one `Ingest` call. Multi-observer kinds (Responses) return
/// `Final` to every concurrent caller; single-assembler kinds return `Final`
/// only to the caller that won the completion claim — every other caller on
/// the same terminal chunk gets `FinalSuppressed`.
#[derive(Debug, Clone)]
pub enum ProcessedStreamResponse {
    Delta,
    Final(AssembledResult),
    FinalSuppressed,
}

/// Per-kind policy for who runs assembly when the terminal chunk arrives.
fn is_multi_observer(kind: ChunkKind) -> bool {
    matches!(kind, ChunkKind::Responses)
}

pub struct Accumulator {
    entries: KeyedMap<String, Arc<StreamAccumulatorEntry>>,
    pools: ChunkPools,
    sweeper_handle: StdMutex<Option<(JoinHandle<()>, CancellationToken)>>,
}

impl Accumulator {
    pub fn new(pool_prewarm_size: usize) -> Arc<Self> {
        Arc::new(Self {
            entries: KeyedMap::new(),
            pools: ChunkPools::new(pool_prewarm_size),
            sweeper_handle: StdMutex::new(None),
        })
    }

    /// Starts the background TTL sweeper. Call once after construction.
    pub fn start_sweeper(self: &Arc<Self>, sweep_interval: Duration, ttl: Duration) {
        let (handle, token) = sweeper::spawn(self.clone(), sweep_interval, ttl);
        *self.sweeper_handle.lock().unwrap() = Some((handle, token));
    }

    fn get_or_create_entry(&self, request_id: &str) -> Arc<StreamAccumulatorEntry> {
        self.entries.get_or_insert_with(request_id.to_string(), || {
            Arc::new(StreamAccumulatorEntry::new(request_id.to_string()))
        })
    }

    /// Returns the entry for `req_id`, creating it if absent, and atomically
    /// increments its subscriber ref count.
    pub fn create(&self, req_id: &str, start_ts_ms: Option<i64>) -> Arc<StreamAccumulatorEntry> {
        let entry = self.get_or_create_entry(req_id);
        entry.incr_ref();
        if let Some(start_ts_ms) = start_ts_ms {
            let mut inner = entry.lock();
            if inner.start_ts_ms.map(|existing| start_ts_ms > existing).unwrap_or(true) {
                inner.start_ts_ms = Some(start_ts_ms);
            }
        }
        entry
    }

    pub fn ingest(
        &self,
        ctx: &IngestContext,
        payload: IngestPayload,
    ) -> Result<ProcessedStreamResponse, AppError> {
        if ctx.accumulator_id.is_empty() {
            return Err(AppError::BadRequest("missing accumulator id".to_string()));
        }

        let entry = self.get_or_create_entry(&ctx.accumulator_id);
        let kind = payload.kind();
        let ts_ms = payload.timestamp_ms();
        let chunk_index = payload.chunk_index();
        let dedup_key = payload.dedup_key();

        let mut inner = entry.lock();
        inner.observe_timestamps(ts_ms, ctx.start_timestamp_ms);

        // A duplicate is dropped outright: skip the pool entirely so a
        // repeated chunk never checks out an object that's never put back.
        match payload {
            IngestPayload::Chat(c) => {
                if !inner.chat.is_duplicate(dedup_key) {
                    let mut pooled = self.pools.chat.get();
                    recycle_chat(&mut pooled, c);
                    inner.chat.append_if_new(dedup_key, chunk_index, pooled);
                }
            }
            IngestPayload::Responses(c) => {
                if !inner.responses.is_duplicate(dedup_key) {
                    let mut pooled = self.pools.responses.get();
                    recycle_responses(&mut pooled, c);
                    inner.responses.append_if_new(dedup_key, chunk_index, pooled);
                }
            }
            IngestPayload::Audio(c) => {
                if !inner.audio.is_duplicate(dedup_key) {
                    let mut pooled = self.pools.audio.get();
                    recycle_audio(&mut pooled, c);
                    inner.audio.append_if_new(dedup_key, chunk_index, pooled);
                }
            }
            IngestPayload::Transcription(c) => {
                if !inner.transcription.is_duplicate(dedup_key) {
                    let mut pooled = self.pools.transcription.get();
                    recycle_transcription(&mut pooled, c);
                    inner.transcription.append_if_new(dedup_key, chunk_index, pooled);
                }
            }
            IngestPayload::Image(c) => {
                if !inner.image.is_duplicate(dedup_key) {
                    let mut pooled = self.pools.image.get();
                    recycle_image(&mut pooled, c);
                    inner.image.append_if_new(dedup_key, chunk_index, pooled);
                }
            }
        }

        if !ctx.is_final_chunk {
            return Ok(ProcessedStreamResponse::Delta);
        }

        inner.mark_final(ts_ms);
        let claimed = inner.claim_completion(kind);

        if !claimed && !is_multi_observer(kind) {
            return Ok(ProcessedStreamResponse::FinalSuppressed);
        }

        let assembled = match kind {
            ChunkKind::Chat => {
                let mut result = assemble_chat(&mut inner.chat.chunks);
                result.trailer = with_timing(result.trailer, &inner);
                AssembledResult::Chat(result)
            }
            ChunkKind::Responses => {
                let mut result = assemble_responses(&mut inner.responses.chunks);
                result.trailer = with_timing(result.trailer, &inner);
                AssembledResult::Responses(result)
            }
            ChunkKind::Audio => {
                let mut result = assemble_audio(&mut inner.audio.chunks);
                result.trailer = with_timing(result.trailer, &inner);
                AssembledResult::Audio(result)
            }
            ChunkKind::Transcription => {
                let mut result = assemble_transcription(&mut inner.transcription.chunks);
                result.trailer = with_timing(result.trailer, &inner);
                AssembledResult::Transcription(result)
            }
            ChunkKind::Image => {
                let mut result = assemble_image(&mut inner.image.chunks);
                result.trailer = with_timing(result.trailer, &inner);
                AssembledResult::Image(result)
            }
        };

        Ok(ProcessedStreamResponse::Final(assembled))
    }

    /// Decrements the subscriber ref count; at zero, recycles every chunk to
    /// its pool and removes the entry. No-op (and not an error) if the
    /// entry is already gone.
    pub fn cleanup(&self, req_id: &str) {
        let Some(entry) = self.entries.get_cloned(&req_id.to_string()) else {
            return;
        };

        let remaining = entry.decr_ref();
        if remaining > 0 {
            return;
        }

        {
            let mut inner = entry.lock();
            for chunk in inner.chat.chunks.drain(..) {
                self.pools.chat.put(chunk);
            }
            for chunk in inner.responses.chunks.drain(..) {
                self.pools.responses.put(chunk);
            }
            for chunk in inner.audio.chunks.drain(..) {
                self.pools.audio.put(chunk);
            }
            for chunk in inner.transcription.chunks.drain(..) {
                self.pools.transcription.put(chunk);
            }
            for chunk in inner.image.chunks.drain(..) {
                self.pools.image.put(chunk);
            }
        }

        self.entries.remove(&req_id.to_string());
    }

    /// Sweeps entries with `ref_count == 0` older than `ttl`, recycling
    /// their chunks the same way `cleanup` does. Returns the number swept.
    pub fn sweep_expired(&self, ttl: Duration) -> usize {
        let mut expired_ids = Vec::new();
        for entry_ref in self.entries.iter() {
            let entry = entry_ref.value();
            if entry.ref_count() <= 0 && entry.created_at.elapsed() > ttl {
                expired_ids.push(entry.request_id.clone());
            }
        }

        for id in &expired_ids {
            if let Some((_, entry)) = self.entries.remove(id) {
                let mut inner = entry.lock();
                for chunk in inner.chat.chunks.drain(..) {
                    self.pools.chat.put(chunk);
                }
                for chunk in inner.responses.chunks.drain(..) {
                    self.pools.responses.put(chunk);
                }
                for chunk in inner.audio.chunks.drain(..) {
                    self.pools.audio.put(chunk);
                }
                for chunk in inner.transcription.chunks.drain(..) {
                    self.pools.transcription.put(chunk);
                }
                for chunk in inner.image.chunks.drain(..) {
                    self.pools.image.put(chunk);
                }
            }
        }

        expired_ids.len()
    }

    /// Stops the sweeper and drains every remaining entry regardless of ref
    /// count, recycling chunks to the pools.
    pub async fn shutdown(&self) {
        if let Some((handle, token)) = self.sweeper_handle.lock().unwrap().take() {
            token.cancel();
            if let Err(e) = handle.await {
                warn!("accumulator sweeper task join error: {:?}", e);
            }
        }

        let ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, entry)) = self.entries.remove(&id) {
                let mut inner = entry.lock();
                for chunk in inner.chat.chunks.drain(..) {
                    self.pools.chat.put(chunk);
                }
                for chunk in inner.responses.chunks.drain(..) {
                    self.pools.responses.put(chunk);
                }
                for chunk in inner.audio.chunks.drain(..) {
                    self.pools.audio.put(chunk);
                }
                for chunk in inner.transcription.chunks.drain(..) {
                    self.pools.transcription.put(chunk);
                }
                for chunk in inner.image.chunks.drain(..) {
                    self.pools.image.put(chunk);
                }
            }
        }
        debug!("accumulator shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::chunk::ChunkTrailer;

    fn chat_chunk(idx: i64, content: &str) -> IngestPayload {
        IngestPayload::Chat(ChatChunk {
            timestamp_ms: idx,
            chunk_index: idx,
            role: Some("assistant".to_string()),
            content_delta: Some(content.to_string()),
            tool_call_deltas: Vec::new(),
            reasoning_deltas: Vec::new(),
            audio_delta: None,
            trailer: ChunkTrailer::default(),
        })
    }

    #[test]
    fn dedup_holds_exactly_n_distinct_indices() {
        let acc = Accumulator::new(4);
        acc.create("req-1", None);
        let ctx = IngestContext::new("req-1", false);
        for i in 0..5 {
            acc.ingest(&ctx, chat_chunk(i, "x")).unwrap();
        }
        // duplicate of index 2
        acc.ingest(&ctx, chat_chunk(2, "dup")).unwrap();

        let entry = acc.get_or_create_entry("req-1");
        let inner = entry.lock();
        assert_eq!(inner.chat.chunks.len(), 5);
    }

    #[test]
    fn out_of_order_final_chunk_sorts_by_index() {
        let acc = Accumulator::new(4);
        acc.create("req-2", Some(0));
        let ctx_mid = IngestContext::new("req-2", false);
        let ctx_final = IngestContext::new("req-2", true);

        acc.ingest(&ctx_mid, chat_chunk(2, "c")).unwrap();
        acc.ingest(&ctx_mid, chat_chunk(0, "a")).unwrap();
        let result = acc.ingest(&ctx_final, chat_chunk(1, "b")).unwrap();

        match result {
            ProcessedStreamResponse::Final(AssembledResult::Chat(chat)) => {
                assert_eq!(chat.content, "abc");
            }
            _ => panic!("expected final chat result"),
        }
    }

    #[test]
    fn cleanup_is_idempotent_after_removal() {
        let acc = Accumulator::new(4);
        acc.create("req-3", None);
        acc.cleanup("req-3");
        acc.cleanup("req-3");
    }

    /// Every chunk checked out of the pool during ingest, including one
    /// dropped as a duplicate, comes back on cleanup: the free list ends up
    /// exactly where it started rather than growing or shrinking.
    #[test]
    fn pool_free_list_is_unchanged_after_ingest_and_cleanup() {
        let acc = Accumulator::new(4);
        let before = acc.pools.chat.len();

        acc.create("req-pool", None);
        let ctx_mid = IngestContext::new("req-pool", false);
        let ctx_final = IngestContext::new("req-pool", true);
        for i in 0..3 {
            acc.ingest(&ctx_mid, chat_chunk(i, "x")).unwrap();
        }
        acc.ingest(&ctx_mid, chat_chunk(1, "dup")).unwrap();
        acc.ingest(&ctx_final, chat_chunk(3, "y")).unwrap();

        assert_eq!(acc.pools.chat.len(), before - 4);

        acc.cleanup("req-pool");
        assert_eq!(acc.pools.chat.len(), before);
    }
}
