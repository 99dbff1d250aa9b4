//! Handles the real-time WebSocket connection to Google Gemini for voice interaction.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use monica_core::live::{
    ADVANCE_STAGE_TOOL, LiveChannel, LiveEvent, LiveGenerator, LiveInput, LiveSessionConfig,
};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, protocol::Message as WsMessage},
};
use tracing::{debug, error, info, warn};

const GEMINI_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

// --- Local Gemini Realtime Types (for encapsulation) ---
mod gemini_realtime_types {
    use serde::{Deserialize, Serialize};
    use serde_json::Value;

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) enum ClientMessage {
        Setup(BidiGenerateContentSetup),
        RealtimeInput(BidiGenerateContentRealtimeInput),
        ClientContent(BidiGenerateContentClientContent),
        ToolResponse(BidiGenerateContentToolResponse),
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct BidiGenerateContentClientContent {
        pub turns: Vec<Content>,
        pub turn_complete: bool,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct BidiGenerateContentSetup {
        pub model: String,
        pub generation_config: GenerationConfig,
        pub system_instruction: Content,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub tools: Vec<Tool>,
        pub input_audio_transcription: Value,
    }
    #[derive(Serialize)]
    pub(super) struct Content {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub role: Option<String>,
        pub parts: Vec<Part>,
    }
    #[derive(Serialize)]
    pub(super) struct Part {
        pub text: String,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct GenerationConfig {
        pub response_modalities: Vec<ResponseModality>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub speech_config: Option<SpeechConfig>,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "UPPERCASE")]
    pub(super) enum ResponseModality {
        Audio,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct SpeechConfig {
        pub voice_config: VoiceConfig,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct VoiceConfig {
        pub prebuilt_voice_config: PrebuiltVoiceConfig,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct PrebuiltVoiceConfig {
        pub voice_name: String,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct Tool {
        pub function_declarations: Vec<FunctionDeclaration>,
    }
    #[derive(Serialize)]
    pub(super) struct FunctionDeclaration {
        pub name: String,
        pub description: String,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct BidiGenerateContentRealtimeInput {
        pub audio: Blob,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct Blob {
        pub mime_type: String,
        pub data: String,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct BidiGenerateContentToolResponse {
        pub function_responses: Vec<FunctionResponse>,
    }
    #[derive(Serialize)]
    pub(super) struct FunctionResponse {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub id: Option<String>,
        pub name: String,
        pub response: Value,
    }
    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ServerMessage {
        pub setup_complete: Option<Value>,
        pub server_content: Option<LiveServerContent>,
        pub tool_call: Option<ToolCall>,
    }
    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct LiveServerContent {
        pub model_turn: Option<ServerContentTurn>,
        pub input_transcription: Option<ServerTranscription>,
        pub turn_complete: Option<bool>,
    }
    #[derive(Deserialize, Debug)]
    pub(super) struct ServerContentTurn {
        pub parts: Vec<ServerPart>,
    }
    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ServerPart {
        pub inline_data: Option<ServerBlob>,
    }
    #[derive(Deserialize, Debug)]
    pub(super) struct ServerBlob {
        pub data: String,
    }
    #[derive(Deserialize, Debug)]
    pub(super) struct ServerTranscription {
        pub text: String,
    }
    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ToolCall {
        #[serde(default)]
        pub function_calls: Vec<FunctionCall>,
    }
    #[derive(Deserialize, Debug)]
    pub(super) struct FunctionCall {
        pub id: Option<String>,
        pub name: String,
    }
}

use gemini_realtime_types as wire;

/// A `LiveGenerator` backed by the Gemini Live API.
pub struct GeminiLiveClient {
    api_key: String,
    model: String,
}

impl GeminiLiveClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self { api_key, model }
    }

    fn setup_message(&self, config: &LiveSessionConfig) -> wire::ClientMessage {
        let tools = if config.declare_advance_tool {
            vec![wire::Tool {
                function_declarations: vec![wire::FunctionDeclaration {
                    name: ADVANCE_STAGE_TOOL.to_string(),
                    description: "Call when the goal of the current coaching stage has been met."
                        .to_string(),
                }],
            }]
        } else {
            Vec::new()
        };
        wire::ClientMessage::Setup(wire::BidiGenerateContentSetup {
            model: self.model.clone(),
            generation_config: wire::GenerationConfig {
                response_modalities: vec![wire::ResponseModality::Audio],
                speech_config: config.voice.clone().map(|voice_name| wire::SpeechConfig {
                    voice_config: wire::VoiceConfig {
                        prebuilt_voice_config: wire::PrebuiltVoiceConfig { voice_name },
                    },
                }),
            },
            system_instruction: wire::Content {
                role: None,
                parts: vec![wire::Part {
                    text: config.instructions.clone(),
                }],
            },
            tools,
            input_audio_transcription: serde_json::json!({}),
        })
    }
}

#[async_trait]
impl LiveGenerator for GeminiLiveClient {
    async fn connect(&self, config: LiveSessionConfig) -> Result<LiveChannel> {
        let url = format!("{}?key={}", GEMINI_LIVE_URL, self.api_key);
        let (ws_stream, _) = connect_async(url)
            .await
            .context("Failed to connect to Gemini Live")?;
        info!(model = %self.model, "Connected to Gemini Realtime WebSocket.");
        let (mut gemini_tx, gemini_rx) = ws_stream.split();

        let setup_msg = self.setup_message(&config);
        gemini_tx
            .send(WsMessage::Text(serde_json::to_string(&setup_msg)?.into()))
            .await?;

        let (input_tx, input_rx) = mpsc::channel(128);
        let (event_tx, event_rx) = mpsc::channel(128);
        tokio::spawn(async move {
            if let Err(e) = run(gemini_tx, gemini_rx, input_rx, event_tx.clone()).await {
                error!(error = ?e, "Gemini realtime task failed");
                let _ = event_tx
                    .send(LiveEvent::Error(format!("Voice connection failed: {}", e)))
                    .await;
            }
            let _ = event_tx.send(LiveEvent::Closed).await;
        });

        Ok(LiveChannel {
            input: input_tx,
            events: event_rx,
        })
    }
}

/// Translates one application input into its Gemini wire message.
fn client_message(input: LiveInput) -> wire::ClientMessage {
    match input {
        LiveInput::Audio(pcm) => wire::ClientMessage::RealtimeInput(wire::BidiGenerateContentRealtimeInput {
            audio: wire::Blob {
                mime_type: INPUT_MIME_TYPE.to_string(),
                data: BASE64.encode(pcm),
            },
        }),
        LiveInput::Context(text) => wire::ClientMessage::ClientContent(wire::BidiGenerateContentClientContent {
            turns: vec![wire::Content {
                role: Some("user".to_string()),
                parts: vec![wire::Part { text }],
            }],
            turn_complete: true,
        }),
        LiveInput::ToolResponse { call_id, name } => {
            wire::ClientMessage::ToolResponse(wire::BidiGenerateContentToolResponse {
                function_responses: vec![wire::FunctionResponse {
                    id: call_id,
                    name,
                    response: serde_json::json!({ "result": "ok" }),
                }],
            })
        }
    }
}

/// Accumulates input transcription fragments into whole utterances.
#[derive(Default)]
struct TranscriptBuffer {
    text: String,
}

impl TranscriptBuffer {
    fn push(&mut self, fragment: &str) -> LiveEvent {
        self.text.push_str(fragment);
        LiveEvent::Transcription {
            text: self.text.trim().to_string(),
            is_final: false,
        }
    }

    fn finish(&mut self) -> Option<LiveEvent> {
        let text = std::mem::take(&mut self.text);
        let text = text.trim();
        (!text.is_empty()).then(|| LiveEvent::Transcription {
            text: text.to_string(),
            is_final: true,
        })
    }
}

/// Maps one parsed server message to application events.
fn server_events(msg: wire::ServerMessage, transcript: &mut TranscriptBuffer) -> Vec<LiveEvent> {
    let mut events = Vec::new();
    if let Some(content) = msg.server_content {
        if let Some(transcription) = content.input_transcription {
            events.push(transcript.push(&transcription.text));
        }
        if let Some(model_turn) = &content.model_turn {
            events.extend(transcript.finish());
            events.push(LiveEvent::Speaking);
            for part in &model_turn.parts {
                if let Some(blob) = &part.inline_data {
                    events.push(LiveEvent::AudioChunk(blob.data.clone()));
                }
            }
        }
        if content.turn_complete == Some(true) {
            events.extend(transcript.finish());
            events.push(LiveEvent::SpeakingDone);
        }
    }
    if let Some(tool_call) = msg.tool_call {
        for call in tool_call.function_calls {
            if call.name == ADVANCE_STAGE_TOOL {
                events.extend(transcript.finish());
                events.push(LiveEvent::AdvanceStage { call_id: call.id });
            } else {
                warn!(name = %call.name, "Ignoring unknown function call from Gemini.");
            }
        }
    }
    events
}

/// Runs the main loop for the Gemini Realtime API connection.
///
/// Proxies application inputs to Gemini and Gemini's messages back as
/// `LiveEvent`s until either side closes.
async fn run<T, R>(
    mut gemini_tx: T,
    mut gemini_rx: R,
    mut input_rx: mpsc::Receiver<LiveInput>,
    event_tx: mpsc::Sender<LiveEvent>,
) -> Result<()>
where
    T: Sink<WsMessage, Error = WsError> + Unpin,
    R: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    let mut is_ready = false;
    let mut transcript = TranscriptBuffer::default();
    loop {
        tokio::select! {
            // Handle inputs from our application.
            input = input_rx.recv() => {
                let Some(input) = input else {
                    debug!("Application closed the live input channel.");
                    break;
                };
                if !is_ready {
                    warn!("Received client event before Gemini setup was complete. Ignoring.");
                    continue;
                }
                let payload = serde_json::to_string(&client_message(input))?;
                gemini_tx.send(WsMessage::Text(payload.into())).await?;
            },
            // Handle events from the Gemini server.
            Some(msg_result) = gemini_rx.next() => {
                match msg_result {
                    Ok(WsMessage::Text(text)) => {
                        let gemini_msg = match serde_json::from_str::<wire::ServerMessage>(&text) {
                            Ok(msg) => msg,
                            Err(_) => {
                                error!("Failed to parse Gemini message. Raw text: {}", text);
                                continue;
                            }
                        };
                        if !is_ready {
                            if gemini_msg.setup_complete.is_some() {
                                info!("Gemini session setup is complete. Ready for bidirectional streaming.");
                                is_ready = true;
                            } else {
                                error!("Received unexpected JSON during Gemini setup: {:?}", gemini_msg);
                            }
                            continue;
                        }
                        for event in server_events(gemini_msg, &mut transcript) {
                            if event_tx.send(event).await.is_err() {
                                return Ok(());
                            }
                        }
                    },
                    Ok(WsMessage::Close(close_frame)) => {
                        error!(?close_frame, "Gemini WebSocket connection closed by server.");
                        break;
                    }
                    Err(e) => {
                        error!("Error reading from Gemini WebSocket: {}", e);
                        break;
                    }
                    _ => {}
                }
            },
            else => break,
        }
    }
    Ok(())
}
