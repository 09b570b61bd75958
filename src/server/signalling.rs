//! Per-WebSocket signalling loop.
//!
//! One long-lived socket per browser. Control messages are JSON objects
//! with a `type` discriminant; replies go through an outbound channel so
//! background work (model pulls, partial transcripts) can write to the
//! socket without holding the receive loop. A 20 s heartbeat rides the
//! same sender task.
//!
//! Long operations differ deliberately: `pull_model` is fire-and-forget,
//! while `speak` and the LLM turn hold the loop — barge-in works by
//! mutating session state, not by cancelling the speak task.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::agent::llm::ProviderKind;
use crate::agent::orchestrator::Orchestrator;
use crate::engine::tts::{self, VoiceEntry};
use crate::server::ice::{self, IceServerEntry};
use crate::server::ServerState;
use crate::session::Session;

/// Messages the browser sends.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Hello {
        #[serde(default)]
        token: String,
    },
    WebrtcOffer {
        sdp: String,
    },
    Start {
        #[serde(default)]
        voice_id: Option<String>,
    },
    Stop,
    Speak {
        text: String,
    },
    StopSpeaking,
    SetProvider {
        provider: String,
    },
    SetModel {
        model: String,
    },
    SetVoice {
        voice_id: String,
    },
    PullModel {
        model: String,
    },
    MicStart,
    MicStop,
    Ping,
}

/// Messages the gateway sends.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Error {
        message: String,
    },
    HelloAck {
        voices: Vec<VoiceEntry>,
        ice_servers: Vec<IceServerEntry>,
        llm_providers: Vec<crate::agent::llm::ProviderInfo>,
        model_catalog: Vec<String>,
        llm_default_provider: String,
        llm_default_model: String,
        tts_default_voice: String,
        ollama_online: bool,
    },
    WebrtcAnswer {
        sdp: String,
    },
    ProviderSet {
        provider: String,
    },
    Transcription {
        text: String,
        partial: bool,
    },
    AgentThinking,
    AgentReply {
        text: String,
    },
    PullProgress {
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        percent: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        total: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        completed: Option<u64>,
    },
    PullComplete {
        model: String,
    },
    PullError {
        message: String,
    },
    ModelCatalogUpdate {
        models: Vec<String>,
    },
    Pong,
}

const HEARTBEAT: Duration = Duration::from_secs(20);

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ServerState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Per-connection mutable state, owned by the receive loop.
struct Conn {
    session: Option<Arc<Session>>,
    ice_servers: Vec<IceServerEntry>,
    orchestrator: Orchestrator,
    tts_voice: String,
}

type Outbound = mpsc::UnboundedSender<ServerMessage>;

async fn handle_socket(socket: WebSocket, state: ServerState) {
    info!("WebSocket connected");
    let (mut sender, mut receiver) = socket.split();

    // All replies funnel through this channel; the sender task also owns
    // the heartbeat. Dropping the channel (loop exit) ends the task.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT);
        heartbeat.tick().await;
        loop {
            tokio::select! {
                msg = out_rx.recv() => match msg {
                    Some(msg) => {
                        let text = serde_json::to_string(&msg).unwrap_or_default();
                        if sender.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = heartbeat.tick() => {
                    if sender.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut conn = Conn {
        session: None,
        ice_servers: Vec::new(),
        orchestrator: Orchestrator::new(state.cfg.clone()),
        tts_voice: state.cfg.tts_default_voice.clone(),
    };

    while let Some(Ok(msg)) = receiver.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let value: Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(_) => {
                send(&out_tx, error("Invalid JSON"));
                continue;
            }
        };
        let parsed: ClientMessage = match serde_json::from_value(value.clone()) {
            Ok(parsed) => parsed,
            Err(_) => {
                let kind = value["type"].as_str().unwrap_or("<missing>");
                send(&out_tx, error(format!("Unknown or invalid message type: {kind}")));
                continue;
            }
        };
        debug!("WS recv: {}", value["type"].as_str().unwrap_or("?"));

        match parsed {
            ClientMessage::Hello { token } => {
                if token != state.cfg.auth_token {
                    send(&out_tx, error("Bad token"));
                    break;
                }
                conn.ice_servers = ice::fetch_ice_servers(&state.cfg).await;
                let client = conn.orchestrator.client();
                let ollama_online = client.is_online().await;
                let model_catalog = client.list_models().await.unwrap_or_default();
                send(
                    &out_tx,
                    ServerMessage::HelloAck {
                        voices: tts::voice_catalog(),
                        ice_servers: conn.ice_servers.clone(),
                        llm_providers: crate::agent::llm::available_providers(&state.cfg),
                        model_catalog,
                        llm_default_provider: conn.orchestrator.provider().id().to_string(),
                        llm_default_model: state.cfg.ollama_model.clone(),
                        tts_default_voice: state.cfg.tts_default_voice.clone(),
                        ollama_online,
                    },
                );
            }

            ClientMessage::WebrtcOffer { sdp } => {
                if sdp.is_empty() {
                    send(&out_tx, error("Missing SDP"));
                    continue;
                }
                if conn.session.is_none() {
                    match Session::new(
                        ice::to_rtc(&conn.ice_servers),
                        state.cfg.transcribe_interval,
                    )
                    .await
                    {
                        Ok(session) => conn.session = Some(Arc::new(session)),
                        Err(e) => {
                            warn!("session setup failed: {e:#}");
                            send(&out_tx, error(format!("WebRTC setup failed: {e}")));
                            continue;
                        }
                    }
                }
                let session = conn.session.as_ref().unwrap();
                match session.handle_offer(&sdp).await {
                    Ok(answer) => send(&out_tx, ServerMessage::WebrtcAnswer { sdp: answer }),
                    Err(e) => {
                        warn!("offer handling failed: {e:#}");
                        send(&out_tx, error(format!("WebRTC offer failed: {e}")));
                    }
                }
            }

            ClientMessage::Start { voice_id } => match &conn.session {
                Some(session) => {
                    let voice_id = voice_id.unwrap_or_else(|| "sine-440".to_string());
                    if let Err(e) = session.start_audio(&voice_id) {
                        send(&out_tx, error(e.to_string()));
                    }
                }
                None => send(&out_tx, error("No WebRTC session")),
            },

            ClientMessage::Stop => {
                if let Some(session) = &conn.session {
                    session.stop_audio();
                }
            }

            ClientMessage::Speak { text } => {
                let text = text.trim().to_string();
                if text.is_empty() {
                    send(&out_tx, error("Empty text"));
                } else if let Some(session) = &conn.session {
                    info!("TTS speak: {:?}", preview(&text));
                    if let Err(e) = session.speak_text(&text, &conn.tts_voice).await {
                        warn!("speak failed: {e:#}");
                        send(&out_tx, error(format!("TTS failed: {e}")));
                    }
                } else {
                    send(&out_tx, error("No WebRTC session"));
                }
            }

            ClientMessage::StopSpeaking => {
                if let Some(session) = &conn.session {
                    session.stop_speaking();
                    info!("TTS playback stopped by user");
                }
            }

            ClientMessage::SetProvider { provider } => match ProviderKind::parse(&provider) {
                Some(kind) => {
                    conn.orchestrator.set_provider(kind);
                    info!("LLM provider switched to: {provider}");
                    send(&out_tx, ServerMessage::ProviderSet { provider });
                }
                None => send(&out_tx, error(format!("Unknown provider: {provider}"))),
            },

            ClientMessage::SetModel { model } => {
                info!("LLM model switched to: {model} (history cleared)");
                conn.orchestrator.set_model(model);
            }

            ClientMessage::SetVoice { voice_id } => {
                if tts::is_known_voice(&voice_id) {
                    conn.tts_voice = voice_id;
                } else {
                    send(&out_tx, error(format!("Unknown voice: {voice_id}")));
                }
            }

            ClientMessage::PullModel { model } => {
                spawn_pull(conn.orchestrator.client(), model, out_tx.clone());
            }

            ClientMessage::MicStart => match &conn.session {
                Some(session) => {
                    let tx = out_tx.clone();
                    session.start_recording(Arc::new(move |text, partial| {
                        let _ = tx.send(ServerMessage::Transcription { text, partial });
                    }));
                }
                None => send(&out_tx, error("No WebRTC session")),
            },

            ClientMessage::MicStop => match conn.session.clone() {
                Some(session) => {
                    let text = match session.stop_recording().await {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("final transcription failed: {e:#}");
                            String::new()
                        }
                    };
                    info!("final transcription: {:?}", preview(&text));
                    send(
                        &out_tx,
                        ServerMessage::Transcription {
                            text: text.clone(),
                            partial: false,
                        },
                    );

                    if !text.trim().is_empty() && llm_configured(&state, &conn) {
                        agent_turn(&mut conn, &session, &text, &out_tx).await;
                    }
                }
                None => send(&out_tx, error("No WebRTC session")),
            },

            ClientMessage::Ping => send(&out_tx, ServerMessage::Pong),
        }
    }

    // Cleanup on disconnect. Dropping the outbound sender lets the send
    // task drain queued replies (a `hello` rejection, final errors) before
    // it exits; background pull tasks notice their sends failing and stop.
    if let Some(session) = conn.session.take() {
        session.close().await;
    }
    drop(out_tx);
    let _ = send_task.await;
    info!("WebSocket disconnected");
}

/// STT result -> LLM -> TTS, holding the message loop for the turn.
async fn agent_turn(conn: &mut Conn, session: &Session, text: &str, out_tx: &Outbound) {
    send(out_tx, ServerMessage::AgentThinking);
    info!(
        "agent thinking (provider={})...",
        conn.orchestrator.provider().id()
    );
    match conn.orchestrator.chat(text, None).await {
        Ok(reply) => {
            info!("agent reply: {:?}", preview(&reply));
            send(out_tx, ServerMessage::AgentReply { text: reply.clone() });
            if let Err(e) = session.speak_text(&reply, &conn.tts_voice).await {
                warn!("reply synthesis failed: {e:#}");
            }
        }
        Err(e) => {
            warn!("LLM error: {e:#}");
            send(out_tx, error(format!("LLM error: {e}")));
        }
    }
}

/// Stream a model pull without blocking the message loop. Each progress
/// frame is forwarded; a failed send means the socket closed and the
/// forwarding stops.
fn spawn_pull(client: crate::agent::llm::OllamaClient, model: String, tx: Outbound) {
    tokio::spawn(async move {
        info!("pulling model: {model}");
        let result = client
            .pull(&model, |p| {
                let percent = match (p.total, p.completed) {
                    (Some(total), Some(done)) if total > 0 => {
                        Some(done as f64 * 100.0 / total as f64)
                    }
                    _ => None,
                };
                tx.send(ServerMessage::PullProgress {
                    status: p.status,
                    percent,
                    total: p.total,
                    completed: p.completed,
                })
                .is_ok()
            })
            .await;
        match result {
            Ok(()) => {
                let models = client.list_models().await.unwrap_or_default();
                let _ = tx.send(ServerMessage::PullComplete { model });
                let _ = tx.send(ServerMessage::ModelCatalogUpdate { models });
            }
            Err(e) => {
                warn!("model pull failed: {e:#}");
                let _ = tx.send(ServerMessage::PullError {
                    message: format!("{e:#}"),
                });
            }
        }
    });
}

/// Hosted providers need credentials; Ollama is assumed reachable (the
/// turn itself reports failures).
fn llm_configured(state: &ServerState, conn: &Conn) -> bool {
    match conn.orchestrator.provider() {
        ProviderKind::Claude => !state.cfg.anthropic_api_key.is_empty(),
        ProviderKind::OpenAi => !state.cfg.openai_api_key.is_empty(),
        ProviderKind::Ollama => true,
    }
}

fn preview(text: &str) -> String {
    text.chars().take(80).collect()
}

fn send(tx: &Outbound, msg: ServerMessage) {
    let _ = tx.send(msg);
}

fn error(message: impl Into<String>) -> ServerMessage {
    ServerMessage::Error {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_parse_from_protocol_json() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type": "hello", "token": "devtoken"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Hello { token } if token == "devtoken"));

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type": "webrtc_offer", "sdp": "v=0"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::WebrtcOffer { sdp } if sdp == "v=0"));

        let msg: ClientMessage = serde_json::from_str(r#"{"type": "mic_stop"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::MicStop));

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type": "start", "voice_id": "sine-440"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Start { voice_id: Some(v) } if v == "sine-440"));
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type": "dance"}"#).is_err());
    }

    #[test]
    fn missing_required_field_fails_to_parse() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type": "speak"}"#).is_err());
    }

    #[test]
    fn server_messages_serialize_with_type_tags() {
        let encoded = serde_json::to_string(&ServerMessage::Transcription {
            text: "hi".into(),
            partial: true,
        })
        .unwrap();
        assert!(encoded.contains(r#""type":"transcription""#));
        assert!(encoded.contains(r#""partial":true"#));

        let encoded = serde_json::to_string(&ServerMessage::Pong).unwrap();
        assert_eq!(encoded, r#"{"type":"pong"}"#);

        let encoded = serde_json::to_string(&ServerMessage::PullProgress {
            status: "downloading".into(),
            percent: None,
            total: None,
            completed: None,
        })
        .unwrap();
        assert!(!encoded.contains("percent"));
    }
}
