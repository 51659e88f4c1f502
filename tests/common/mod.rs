//! Shared fixtures: scripted vendor clients, PCM frame builders and a
//! channel-backed session harness

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use parley_gateway::clients::{
    AudioStream, ExternalClients, LanguageModel, SpeechSynthesis, SpeechToText, TokenStream,
};
use parley_gateway::{
    ChatMessage, Error, Inbound, OutboundFrame, OutboundSink, Result, Session, SessionShared,
    SilenceConfig,
};

/// A 640-byte square-wave frame whose RMS equals the amplitude
pub fn frame(amplitude: i16) -> Bytes {
    let mut out = Vec::with_capacity(640);
    for i in 0..320 {
        let sample = if i % 2 == 0 { amplitude } else { -amplitude };
        out.extend_from_slice(&sample.to_le_bytes());
    }
    Bytes::from(out)
}

pub fn voiced_frame() -> Bytes {
    frame(3000)
}

pub fn silent_frame() -> Bytes {
    frame(0)
}

/// STT stub that replays a scripted sequence of results
pub struct ScriptedStt {
    results: Mutex<VecDeque<Result<String>>>,
}

impl ScriptedStt {
    pub fn replying(results: Vec<Result<String>>) -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(results.into()),
        })
    }
}

#[async_trait]
impl SpeechToText for ScriptedStt {
    async fn transcribe(&self, _pcm: &[u8], _language_hint: &str) -> Result<String> {
        self.results
            .lock()
            .expect("stt script lock")
            .pop_front()
            .unwrap_or_else(|| Err(Error::Stt("script exhausted".to_string())))
    }
}

/// LLM stub that streams a fixed token sequence, optionally with a delay
/// between tokens
pub struct ScriptedLlm {
    tokens: Vec<String>,
    token_delay: Duration,
}

impl ScriptedLlm {
    pub fn saying(tokens: &[&str]) -> Arc<Self> {
        Self::saying_with_delay(tokens, Duration::ZERO)
    }

    pub fn saying_with_delay(tokens: &[&str], token_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            tokens: tokens.iter().map(ToString::to_string).collect(),
            token_delay,
        })
    }
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    async fn stream_reply(&self, _messages: &[ChatMessage]) -> Result<TokenStream> {
        let delay = self.token_delay;
        let stream = futures::stream::iter(self.tokens.clone()).then(move |token| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok::<String, Error>(token)
        });
        Ok(Box::pin(stream))
    }
}

/// LLM stub whose stream cannot even be opened
pub struct FailingLlm;

#[async_trait]
impl LanguageModel for FailingLlm {
    async fn stream_reply(&self, _messages: &[ChatMessage]) -> Result<TokenStream> {
        Err(Error::Llm("model unavailable".to_string()))
    }
}

/// TTS stub yielding a fixed number of chunks per sentence
pub struct ScriptedTts {
    chunks_per_sentence: usize,
    chunk_delay: Duration,
}

impl ScriptedTts {
    pub fn chunks(chunks_per_sentence: usize) -> Arc<Self> {
        Self::chunks_with_delay(chunks_per_sentence, Duration::ZERO)
    }

    pub fn chunks_with_delay(chunks_per_sentence: usize, chunk_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            chunks_per_sentence,
            chunk_delay,
        })
    }
}

#[async_trait]
impl SpeechSynthesis for ScriptedTts {
    async fn stream_speech(&self, _text: &str) -> Result<AudioStream> {
        let delay = self.chunk_delay;
        let stream = futures::stream::iter(0..self.chunks_per_sentence).then(move |i| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok::<Bytes, Error>(Bytes::from(vec![(i % 256) as u8; 128]))
        });
        Ok(Box::pin(stream))
    }
}

/// TTS stub that refuses every request
pub struct FailingTts;

#[async_trait]
impl SpeechSynthesis for FailingTts {
    async fn stream_speech(&self, _text: &str) -> Result<AudioStream> {
        Err(Error::Tts("synthesizer unavailable".to_string()))
    }
}

pub fn clients(
    stt: Arc<dyn SpeechToText>,
    llm: Arc<dyn LanguageModel>,
    tts: Arc<dyn SpeechSynthesis>,
) -> ExternalClients {
    ExternalClients { stt, llm, tts }
}

/// A decoded outbound frame, friendlier to assert on
#[derive(Debug)]
pub enum Wire {
    Json(serde_json::Value),
    Audio(usize),
}

impl Wire {
    /// Compact label: `status:AI_SPEAKING`, `transcript`, `audio`, ...
    pub fn kind(&self) -> String {
        match self {
            Self::Audio(_) => "audio".to_string(),
            Self::Json(value) => {
                let kind = value["type"].as_str().unwrap_or("?");
                if kind == "status" {
                    format!("status:{}", value["state"].as_str().unwrap_or("?"))
                } else {
                    kind.to_string()
                }
            }
        }
    }
}

pub fn decode(frame: OutboundFrame) -> Wire {
    match frame {
        OutboundFrame::Control(text) => {
            Wire::Json(serde_json::from_str(&text).expect("valid control JSON"))
        }
        OutboundFrame::Audio(bytes) => Wire::Audio(bytes.len()),
    }
}

/// A running session wired to in-memory channels
pub struct Harness {
    pub inbound: mpsc::Sender<Inbound>,
    pub outbound: mpsc::Receiver<OutboundFrame>,
    pub shared: Arc<SessionShared>,
    pub task: tokio::task::JoinHandle<()>,
}

impl Harness {
    pub fn spawn(clients: ExternalClients) -> Self {
        Self::spawn_named("test", clients)
    }

    pub fn spawn_named(id: &str, clients: ExternalClients) -> Self {
        let (in_tx, in_rx) = mpsc::channel::<Inbound>(4096);
        let (out_tx, out_rx) = mpsc::channel::<OutboundFrame>(4096);

        let session = Session::new(
            id,
            OutboundSink::new(out_tx),
            clients,
            SilenceConfig::default(),
        );
        let shared = session.shared();
        let task = tokio::spawn(session.run(ReceiverStream::new(in_rx)));

        Self {
            inbound: in_tx,
            outbound: out_rx,
            shared,
            task,
        }
    }

    pub async fn send_frames(&self, frame: Bytes, count: usize) {
        for _ in 0..count {
            self.inbound
                .send(Inbound::Audio(frame.clone()))
                .await
                .expect("session inbound open");
        }
    }

    /// One second of speech followed by enough silence to end the turn
    pub async fn send_utterance(&self) {
        self.send_frames(voiced_frame(), 50).await;
        self.send_frames(silent_frame(), 35).await;
    }

    /// Next outbound frame, decoded; panics after two idle seconds
    pub async fn next_wire(&mut self) -> Wire {
        let frame = tokio::time::timeout(Duration::from_secs(2), self.outbound.recv())
            .await
            .expect("outbound frame before timeout")
            .expect("outbound channel open");
        decode(frame)
    }

    /// Collect decoded frames until a status with the given state arrives
    /// (inclusive), skipping keepalive pings
    pub async fn collect_until_status(&mut self, state: &str) -> Vec<Wire> {
        let wanted = format!("status:{state}");
        let mut seen = Vec::new();
        loop {
            let wire = self.next_wire().await;
            if wire.kind() == "ping" {
                continue;
            }
            let done = wire.kind() == wanted;
            seen.push(wire);
            if done {
                return seen;
            }
        }
    }

    /// Await the session task to completion without moving it out of the
    /// harness, so the harness can still be used afterwards
    pub async fn wait(&mut self) {
        std::future::poll_fn(|cx| std::pin::Pin::new(&mut self.task).poll(cx))
            .await
            .expect("session task");
    }

    /// Drain whatever is already queued without waiting
    pub fn drain_now(&mut self) -> Vec<Wire> {
        let mut seen = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            seen.push(decode(frame));
        }
        seen
    }
}

pub fn kinds(wires: &[Wire]) -> Vec<String> {
    wires.iter().map(Wire::kind).collect()
}

/// Positions of a kind within a decoded sequence
pub fn positions(wires: &[Wire], kind: &str) -> Vec<usize> {
    wires
        .iter()
        .enumerate()
        .filter(|(_, w)| w.kind() == kind)
        .map(|(i, _)| i)
        .collect()
}
