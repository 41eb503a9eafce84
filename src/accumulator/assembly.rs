use std::collections::BTreeMap;

use crate::models::usage::CanonicalUsage;
use bigdecimal::BigDecimal;
use serde_json::Value;

use super::chunk::{
    AudioChunk, ChatChunk, ChunkTrailer, ImageChunk, ResponsesChunk, ResponsesEvent,
    TranscriptionChunk,
};
use super::entry::StreamAccumulatorInner;

/// Fields carried from the highest-index chunk into every assembled result.
#[derive(Debug, Clone, Default)]
pub struct AssembledTrailer {
    pub finish_reason: Option<String>,
    pub token_usage: Option<CanonicalUsage>,
    pub cost: Option<BigDecimal>,
    pub cache_debug: Option<Value>,
    pub raw_response: String,
    pub status: String,
    pub error_details: Option<String>,
    pub time_to_first_token_ms: i64,
    pub latency_ms: i64,
}

fn fold_trailer(trailers_in_order: &[&ChunkTrailer]) -> AssembledTrailer {
    let mut out = AssembledTrailer {
        status: "ok".to_string(),
        ..Default::default()
    };
    let raw_parts: Vec<String> = trailers_in_order
        .iter()
        .filter_map(|t| t.raw_response.clone())
        .collect();
    out.raw_response = raw_parts.join("\n");

    if let Some(last) = trailers_in_order.last() {
        out.finish_reason = last.finish_reason.clone();
        out.token_usage = last.token_usage;
        out.cost = last.cost.clone();
        out.cache_debug = last.cache_debug.clone();
        if let Some(error) = &last.error {
            out.status = "error".to_string();
            out.error_details = Some(error.clone());
            out.finish_reason = Some("error".to_string());
        }
    }
    out
}

#[derive(Debug, Clone, Default)]
pub struct AssembledToolCall {
    pub index: i64,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
}

#[derive(Debug, Clone, Default)]
pub struct AssembledReasoning {
    pub index: i64,
    pub text: String,
    pub signature: String,
    pub summary: String,
}

#[derive(Debug, Clone, Default)]
pub struct AssembledAudioTrack {
    pub assistant_id: Option<String>,
    pub data: Vec<u8>,
    pub transcript: String,
}

#[derive(Debug, Clone, Default)]
pub struct AssembledChat {
    pub role: Option<String>,
    pub content: String,
    pub tool_calls: Vec<AssembledToolCall>,
    pub reasoning: Vec<AssembledReasoning>,
    pub audio: Option<AssembledAudioTrack>,
    pub trailer: AssembledTrailer,
}

/// Assembles ordered Chat deltas into a complete message. Tool-call deltas
/// are accumulated by index: a delta whose `function.name` is present starts
/// a new tool call (argument payload `"{}"` is normalised to empty string);
/// otherwise its arguments are appended to that index's existing call.
pub fn assemble_chat(track: &mut [ChatChunk]) -> AssembledChat {
    track.sort_by_key(|c| c.chunk_index);

    let mut role = None;
    let mut content = String::new();
    let mut tool_calls: BTreeMap<i64, AssembledToolCall> = BTreeMap::new();
    let mut reasoning: BTreeMap<i64, AssembledReasoning> = BTreeMap::new();
    let mut audio: Option<AssembledAudioTrack> = None;
    let mut trailers = Vec::with_capacity(track.len());

    for chunk in track.iter() {
        if role.is_none() {
            role = chunk.role.clone();
        }
        if let Some(delta) = &chunk.content_delta {
            content.push_str(delta);
        }
        for tc in &chunk.tool_call_deltas {
            let entry = tool_calls.entry(tc.index).or_insert_with(|| AssembledToolCall {
                index: tc.index,
                id: None,
                name: None,
                arguments: String::new(),
            });
            if let Some(name) = &tc.name {
                entry.name = Some(name.clone());
                if let Some(id) = &tc.id {
                    entry.id = Some(id.clone());
                }
                if let Some(args) = &tc.arguments_delta {
                    if args == "{}" {
                        entry.arguments.clear();
                    } else {
                        entry.arguments.push_str(args);
                    }
                }
            } else if let Some(args) = &tc.arguments_delta {
                entry.arguments.push_str(args);
            }
        }
        for rd in &chunk.reasoning_deltas {
            let entry = reasoning.entry(rd.index).or_insert_with(|| AssembledReasoning {
                index: rd.index,
                text: String::new(),
                signature: String::new(),
                summary: String::new(),
            });
            if let Some(t) = &rd.text_delta {
                entry.text.push_str(t);
            }
            if let Some(s) = &rd.signature_delta {
                entry.signature.push_str(s);
            }
            if let Some(s) = &rd.summary_delta {
                entry.summary.push_str(s);
            }
        }
        if let Some(ad) = &chunk.audio_delta {
            let track_entry = audio.get_or_insert_with(|| AssembledAudioTrack {
                assistant_id: ad.assistant_id.clone(),
                data: Vec::new(),
                transcript: String::new(),
            });
            if let Some(data) = &ad.data_delta {
                track_entry.data.extend_from_slice(data);
            }
            if let Some(t) = &ad.transcript_delta {
                track_entry.transcript.push_str(t);
            }
        }
        trailers.push(&chunk.trailer);
    }

    AssembledChat {
        role,
        content,
        tool_calls: tool_calls.into_values().collect(),
        reasoning: reasoning.into_values().collect(),
        audio,
        trailer: fold_trailer(&trailers),
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContentBlock {
    pub content_index: i64,
    pub text: String,
    pub refusal: String,
}

#[derive(Debug, Clone, Default)]
pub struct ResponsesMessage {
    pub item_id: String,
    pub content_blocks: Vec<ContentBlock>,
    pub function_call_arguments: String,
    pub reasoning_summary_text: String,
}

#[derive(Debug, Clone, Default)]
pub struct AssembledResponses {
    pub messages: Vec<ResponsesMessage>,
    pub trailer: AssembledTrailer,
}

/// Responses-stream state machine keyed by `item_id`. `FunctionCallArgumentsDelta`
/// with an unmatched `item_id` creates a stub message rather than merging into
/// an arbitrary existing one — required to keep parallel tool calls from
/// corrupting each other's arguments.
pub fn assemble_responses(track: &mut [ResponsesChunk]) -> AssembledResponses {
    track.sort_by_key(|c| c.chunk_index);

    let mut order: Vec<String> = Vec::new();
    let mut messages: BTreeMap<String, ResponsesMessage> = BTreeMap::new();
    let mut trailers = Vec::with_capacity(track.len());

    let mut ensure_message = |id: &str, order: &mut Vec<String>, messages: &mut BTreeMap<String, ResponsesMessage>| {
        if !messages.contains_key(id) {
            order.push(id.to_string());
            messages.insert(
                id.to_string(),
                ResponsesMessage {
                    item_id: id.to_string(),
                    ..Default::default()
                },
            );
        }
    };

    for chunk in track.iter() {
        match &chunk.event {
            ResponsesEvent::OutputItemAdded { item_id } => {
                ensure_message(item_id, &mut order, &mut messages);
            }
            ResponsesEvent::ContentPartAdded { item_id, content_index } => {
                ensure_message(item_id, &mut order, &mut messages);
                let message = messages.get_mut(item_id).unwrap();
                if !message.content_blocks.iter().any(|b| b.content_index == *content_index) {
                    message.content_blocks.push(ContentBlock {
                        content_index: *content_index,
                        text: String::new(),
                        refusal: String::new(),
                    });
                }
            }
            ResponsesEvent::OutputTextDelta { item_id, content_index, delta } => {
                ensure_message(item_id, &mut order, &mut messages);
                let message = messages.get_mut(item_id).unwrap();
                let block = find_or_create_block(message, *content_index);
                block.text.push_str(delta);
            }
            ResponsesEvent::RefusalDelta { item_id, content_index, delta } => {
                ensure_message(item_id, &mut order, &mut messages);
                let message = messages.get_mut(item_id).unwrap();
                let block = find_or_create_block(message, *content_index);
                block.refusal.push_str(delta);
            }
            ResponsesEvent::FunctionCallArgumentsDelta { item_id, delta } => {
                // No match creates a stub, never merges into the last message.
                ensure_message(item_id, &mut order, &mut messages);
                let message = messages.get_mut(item_id).unwrap();
                message.function_call_arguments.push_str(delta);
            }
            ResponsesEvent::ReasoningSummaryTextDelta { item_id, delta } => {
                ensure_message(item_id, &mut order, &mut messages);
                let message = messages.get_mut(item_id).unwrap();
                message.reasoning_summary_text.push_str(delta);
            }
        }
        trailers.push(&chunk.trailer);
    }

    let assembled_messages = order
        .into_iter()
        .filter_map(|id| messages.remove(&id))
        .collect();

    AssembledResponses {
        messages: assembled_messages,
        trailer: fold_trailer(&trailers),
    }
}

fn find_or_create_block(message: &mut ResponsesMessage, content_index: i64) -> &mut ContentBlock {
    if let Some(pos) = message
        .content_blocks
        .iter()
        .position(|b| b.content_index == content_index)
    {
        &mut message.content_blocks[pos]
    } else {
        message.content_blocks.push(ContentBlock {
            content_index,
            text: String::new(),
            refusal: String::new(),
        });
        message.content_blocks.last_mut().unwrap()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AssembledTranscription {
    pub text: String,
    pub trailer: AssembledTrailer,
}

pub fn assemble_transcription(track: &mut [TranscriptionChunk]) -> AssembledTranscription {
    track.sort_by_key(|c| c.chunk_index);
    let mut text = String::new();
    let mut trailers = Vec::with_capacity(track.len());
    for chunk in track.iter() {
        if let Some(delta) = &chunk.text_delta {
            text.push_str(delta);
        }
        trailers.push(&chunk.trailer);
    }
    AssembledTranscription {
        text,
        trailer: fold_trailer(&trailers),
    }
}

#[derive(Debug, Clone, Default)]
pub struct AssembledAudio {
    pub data: Vec<u8>,
    pub trailer: AssembledTrailer,
}

pub fn assemble_audio(track: &mut [AudioChunk]) -> AssembledAudio {
    track.sort_by_key(|c| c.chunk_index);
    let mut data = Vec::new();
    let mut trailers = Vec::with_capacity(track.len());
    for chunk in track.iter() {
        if let Some(delta) = &chunk.audio_delta {
            data.extend_from_slice(delta);
        }
        trailers.push(&chunk.trailer);
    }
    AssembledAudio {
        data,
        trailer: fold_trailer(&trailers),
    }
}

#[derive(Debug, Clone, Default)]
pub struct AssembledImage {
    pub image_b64: String,
    pub revised_prompt: Option<String>,
    pub model: Option<String>,
    pub trailer: AssembledTrailer,
}

/// Sorted by `image_index` then `chunk_index` (using the effective index
/// priority rule). If any chunk declares completion, its payload is the
/// final image and earlier partials are discarded; otherwise base64
/// fragments are concatenated in order.
pub fn assemble_image(track: &mut [ImageChunk]) -> AssembledImage {
    track.sort_by_key(|c| (c.image_index, c.effective_chunk_index()));

    if let Some(complete) = track.iter().find(|c| c.is_complete) {
        let trailers: Vec<&ChunkTrailer> = track.iter().map(|c| &c.trailer).collect();
        return AssembledImage {
            image_b64: complete.image_b64.clone().unwrap_or_default(),
            revised_prompt: complete.revised_prompt.clone(),
            model: complete.model.clone(),
            trailer: fold_trailer(&trailers),
        };
    }

    let mut image_b64 = String::new();
    let mut revised_prompt = None;
    let mut model = None;
    let mut trailers = Vec::with_capacity(track.len());
    for chunk in track.iter() {
        if let Some(part) = &chunk.image_b64 {
            image_b64.push_str(part);
        }
        if revised_prompt.is_none() {
            revised_prompt = chunk.revised_prompt.clone();
        }
        if model.is_none() {
            model = chunk.model.clone();
        }
        trailers.push(&chunk.trailer);
    }
    AssembledImage {
        image_b64,
        revised_prompt,
        model,
        trailer: fold_trailer(&trailers),
    }
}

#[derive(Debug, Clone)]
pub enum AssembledResult {
    Chat(AssembledChat),
    Responses(AssembledResponses),
    Transcription(AssembledTranscription),
    Audio(AssembledAudio),
    Image(AssembledImage),
}

/// Stamps `time_to_first_token_ms`/`latency_ms` onto an already-assembled
/// trailer using the entry's timestamps.
pub fn with_timing(mut trailer: AssembledTrailer, inner: &StreamAccumulatorInner) -> AssembledTrailer {
    trailer.time_to_first_token_ms = inner.time_to_first_token_ms();
    trailer.latency_ms = inner.latency_ms();
    trailer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::chunk::ToolCallDelta;

    fn chunk(idx: i64, tool_calls: Vec<ToolCallDelta>) -> ChatChunk {
        ChatChunk {
            timestamp_ms: idx,
            chunk_index: idx,
            role: None,
            content_delta: None,
            tool_call_deltas: tool_calls,
            reasoning_deltas: Vec::new(),
            audio_delta: None,
            trailer: ChunkTrailer::default(),
        }
    }

    #[test]
    fn parallel_tool_calls_interleave_by_index() {
        let mut chunks = vec![
            chunk(0, vec![ToolCallDelta { index: 0, id: Some("call_0".into()), name: Some("add".into()), arguments_delta: Some("".into()) }]),
            chunk(1, vec![ToolCallDelta { index: 1, id: Some("call_1".into()), name: Some("multiply".into()), arguments_delta: Some("".into()) }]),
            chunk(2, vec![ToolCallDelta { index: 0, id: None, name: None, arguments_delta: Some("{\"a\":1".into()) }]),
            chunk(3, vec![ToolCallDelta { index: 1, id: None, name: None, arguments_delta: Some("{\"a\":2".into()) }]),
            chunk(4, vec![ToolCallDelta { index: 0, id: None, name: None, arguments_delta: Some(", \"b\":3}".into()) }]),
            chunk(5, vec![ToolCallDelta { index: 1, id: None, name: None, arguments_delta: Some(", \"b\":4}".into()) }]),
        ];
        let assembled = assemble_chat(&mut chunks);
        assert_eq!(assembled.tool_calls.len(), 2);
        assert_eq!(assembled.tool_calls[0].arguments, "{\"a\":1, \"b\":3}");
        assert_eq!(assembled.tool_calls[1].arguments, "{\"a\":2, \"b\":4}");
    }

    #[test]
    fn empty_json_payload_normalises_to_empty_string() {
        let mut chunks = vec![chunk(
            0,
            vec![ToolCallDelta {
                index: 0,
                id: Some("call_0".into()),
                name: Some("noop".into()),
                arguments_delta: Some("{}".into()),
            }],
        )];
        let assembled = assemble_chat(&mut chunks);
        assert_eq!(assembled.tool_calls[0].arguments, "");
    }

    #[test]
    fn responses_unmatched_item_id_creates_stub() {
        let mut chunks = vec![
            ResponsesChunk {
                timestamp_ms: 0,
                chunk_index: 0,
                event: ResponsesEvent::OutputItemAdded { item_id: "msg_1".into() },
                trailer: ChunkTrailer::default(),
            },
            ResponsesChunk {
                timestamp_ms: 1,
                chunk_index: 1,
                event: ResponsesEvent::FunctionCallArgumentsDelta {
                    item_id: "msg_unrelated".into(),
                    delta: "{\"x\":1}".into(),
                },
                trailer: ChunkTrailer::default(),
            },
        ];
        let assembled = assemble_responses(&mut chunks);
        assert_eq!(assembled.messages.len(), 2);
        assert_eq!(assembled.messages[1].item_id, "msg_unrelated");
        assert_eq!(assembled.messages[1].function_call_arguments, "{\"x\":1}");
        assert_eq!(assembled.messages[0].function_call_arguments, "");
    }

    #[test]
    fn image_effective_index_prefers_extra_fields_when_positive() {
        let mut chunks = vec![
            ImageChunk {
                timestamp_ms: 0,
                chunk_index: 0,
                image_index: 0,
                extra_fields_chunk_index: Some(2),
                partial_image_index: Some(0),
                is_complete: false,
                image_b64: Some("b".into()),
                revised_prompt: None,
                model: None,
                trailer: ChunkTrailer::default(),
            },
            ImageChunk {
                timestamp_ms: 1,
                chunk_index: 1,
                image_index: 0,
                extra_fields_chunk_index: None,
                partial_image_index: Some(1),
                is_complete: false,
                image_b64: Some("a".into()),
                revised_prompt: None,
                model: None,
                trailer: ChunkTrailer::default(),
            },
        ];
        let assembled = assemble_image(&mut chunks);
        assert_eq!(assembled.image_b64, "ab");
    }
}
