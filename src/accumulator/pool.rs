use crate::runtime::pool::ObjectPool;

use super::chunk::{
    AudioChunk, ChatChunk, ChunkTrailer, ImageChunk, ResponsesChunk, ResponsesEvent,
    TranscriptionChunk,
};

fn build_chat() -> ChatChunk {
    ChatChunk {
        timestamp_ms: 0,
        chunk_index: 0,
        role: None,
        content_delta: None,
        tool_call_deltas: Vec::new(),
        reasoning_deltas: Vec::new(),
        audio_delta: None,
        trailer: ChunkTrailer::default(),
    }
}

fn reset_chat(chunk: &mut ChatChunk) {
    *chunk = build_chat();
}

fn build_responses() -> ResponsesChunk {
    ResponsesChunk {
        timestamp_ms: 0,
        chunk_index: 0,
        event: ResponsesEvent::OutputItemAdded { item_id: String::new() },
        trailer: ChunkTrailer::default(),
    }
}

fn reset_responses(chunk: &mut ResponsesChunk) {
    *chunk = build_responses();
}

fn build_audio() -> AudioChunk {
    AudioChunk {
        timestamp_ms: 0,
        chunk_index: 0,
        audio_delta: None,
        trailer: ChunkTrailer::default(),
    }
}

fn reset_audio(chunk: &mut AudioChunk) {
    *chunk = build_audio();
}

fn build_transcription() -> TranscriptionChunk {
    TranscriptionChunk {
        timestamp_ms: 0,
        chunk_index: 0,
        text_delta: None,
        trailer: ChunkTrailer::default(),
    }
}

fn reset_transcription(chunk: &mut TranscriptionChunk) {
    *chunk = build_transcription();
}

fn build_image() -> ImageChunk {
    ImageChunk {
        timestamp_ms: 0,
        chunk_index: 0,
        image_index: 0,
        extra_fields_chunk_index: None,
        partial_image_index: None,
        is_complete: false,
        image_b64: None,
        revised_prompt: None,
        model: None,
        trailer: ChunkTrailer::default(),
    }
}

fn reset_image(chunk: &mut ImageChunk) {
    *chunk = build_image();
}

fn merge_string(slot: &mut Option<String>, incoming: Option<String>) {
    match (slot.as_mut(), incoming) {
        (Some(existing), Some(new)) => {
            existing.clear();
            existing.push_str(&new);
        }
        (_, incoming) => *slot = incoming,
    }
}

fn merge_bytes(slot: &mut Option<Vec<u8>>, incoming: Option<Vec<u8>>) {
    match (slot.as_mut(), incoming) {
        (Some(existing), Some(new)) => {
            existing.clear();
            existing.extend_from_slice(&new);
        }
        (_, incoming) => *slot = incoming,
    }
}

/// Copies `incoming`'s fields onto a pooled chunk in place, reusing its
/// `Vec`/`String` allocations instead of replacing them wholesale.
pub fn recycle_chat(pooled: &mut ChatChunk, mut incoming: ChatChunk) {
    pooled.timestamp_ms = incoming.timestamp_ms;
    pooled.chunk_index = incoming.chunk_index;
    pooled.role = incoming.role.take();
    merge_string(&mut pooled.content_delta, incoming.content_delta.take());
    pooled.tool_call_deltas.clear();
    pooled.tool_call_deltas.extend(incoming.tool_call_deltas.drain(..));
    pooled.reasoning_deltas.clear();
    pooled.reasoning_deltas.extend(incoming.reasoning_deltas.drain(..));
    pooled.audio_delta = incoming.audio_delta.take();
    pooled.trailer = incoming.trailer;
}

pub fn recycle_responses(pooled: &mut ResponsesChunk, incoming: ResponsesChunk) {
    pooled.timestamp_ms = incoming.timestamp_ms;
    pooled.chunk_index = incoming.chunk_index;
    pooled.event = incoming.event;
    pooled.trailer = incoming.trailer;
}

pub fn recycle_audio(pooled: &mut AudioChunk, mut incoming: AudioChunk) {
    pooled.timestamp_ms = incoming.timestamp_ms;
    pooled.chunk_index = incoming.chunk_index;
    merge_bytes(&mut pooled.audio_delta, incoming.audio_delta.take());
    pooled.trailer = incoming.trailer;
}

pub fn recycle_transcription(pooled: &mut TranscriptionChunk, mut incoming: TranscriptionChunk) {
    pooled.timestamp_ms = incoming.timestamp_ms;
    pooled.chunk_index = incoming.chunk_index;
    merge_string(&mut pooled.text_delta, incoming.text_delta.take());
    pooled.trailer = incoming.trailer;
}

pub fn recycle_image(pooled: &mut ImageChunk, mut incoming: ImageChunk) {
    pooled.timestamp_ms = incoming.timestamp_ms;
    pooled.chunk_index = incoming.chunk_index;
    pooled.image_index = incoming.image_index;
    pooled.extra_fields_chunk_index = incoming.extra_fields_chunk_index;
    pooled.partial_image_index = incoming.partial_image_index;
    pooled.is_complete = incoming.is_complete;
    merge_string(&mut pooled.image_b64, incoming.image_b64.take());
    pooled.revised_prompt = incoming.revised_prompt.take();
    pooled.model = incoming.model.take();
    pooled.trailer = incoming.trailer;
}

/// Five pools, one per chunk kind, each prewarmed to the configured size.
/// Recycled chunks are zeroed (reset to their built-fresh state) before
/// being handed back out, so no chunk is ever both pool-owned and
/// accumulator-owned at once.
pub struct ChunkPools {
    pub chat: ObjectPool<ChatChunk>,
    pub responses: ObjectPool<ResponsesChunk>,
    pub audio: ObjectPool<AudioChunk>,
    pub transcription: ObjectPool<TranscriptionChunk>,
    pub image: ObjectPool<ImageChunk>,
}

impl ChunkPools {
    pub fn new(prewarm: usize) -> Self {
        Self {
            chat: ObjectPool::new(build_chat, reset_chat, prewarm),
            responses: ObjectPool::new(build_responses, reset_responses, prewarm),
            audio: ObjectPool::new(build_audio, reset_audio, prewarm),
            transcription: ObjectPool::new(build_transcription, reset_transcription, prewarm),
            image: ObjectPool::new(build_image, reset_image, prewarm),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::chunk::ToolCallDelta;

    #[test]
    fn recycle_chat_reuses_pooled_vec_capacity() {
        let mut pooled = build_chat();
        pooled.tool_call_deltas.reserve(8);
        let capacity_before = pooled.tool_call_deltas.capacity();

        let incoming = ChatChunk {
            timestamp_ms: 1,
            chunk_index: 1,
            role: Some("assistant".to_string()),
            content_delta: Some("hi".to_string()),
            tool_call_deltas: vec![ToolCallDelta {
                index: 0,
                id: Some("call_0".to_string()),
                name: Some("get_weather".to_string()),
                arguments_delta: Some("{}".to_string()),
            }],
            reasoning_deltas: Vec::new(),
            audio_delta: None,
            trailer: ChunkTrailer::default(),
        };
        recycle_chat(&mut pooled, incoming);

        assert_eq!(pooled.content_delta.as_deref(), Some("hi"));
        assert_eq!(pooled.tool_call_deltas.len(), 1);
        assert_eq!(pooled.tool_call_deltas[0].name.as_deref(), Some("get_weather"));
        assert_eq!(pooled.tool_call_deltas.capacity(), capacity_before);
    }

    #[test]
    fn chunk_pools_get_and_put_round_trip() {
        let pools = ChunkPools::new(2);
        let before = pools.chat.len();
        let chunk = pools.chat.get();
        assert_eq!(pools.chat.len(), before - 1);
        pools.chat.put(chunk);
        assert_eq!(pools.chat.len(), before);
    }
}
