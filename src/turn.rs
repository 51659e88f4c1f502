//! One assistant turn: STT, then LLM and TTS bridged by a bounded queue
//!
//! The language-model producer and the synthesis consumer run concurrently;
//! synthesis of the first sentence starts while the model is still writing
//! the second. A child cancellation token lets either side fail the other
//! without confusing an internal failure with a user barge-in, which is
//! signaled on the parent token and leaves all client messaging to the
//! session loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::clients::ExternalClients;
use crate::memory::ChatMessage;
use crate::sentence::SentenceSplitter;
use crate::session::{OutboundSink, SessionShared};
use crate::state::SessionState;
use crate::wire::ServerEvent;
use crate::{Error, Result};

/// Sentences buffered between the LLM producer and the TTS consumer; a full
/// queue backpressures the model stream
const SENTENCE_QUEUE_CAPACITY: usize = 8;

/// Pause between the two transcription attempts
const STT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Deadline for the first model token
const LLM_FIRST_TOKEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for the whole model stream
const LLM_STREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline per synthesized sentence
const TTS_SENTENCE_TIMEOUT: Duration = Duration::from_secs(20);

/// Language hint passed to the transcription service
const STT_LANGUAGE_HINT: &str = "en-IN";

/// Spoken when transcription fails twice
const FALLBACK_UTTERANCE: &str = "Sorry, I didn't catch that.";

/// Everything a turn task needs from its session
///
/// Deliberately narrow: a sink, the shared state and a cancellation
/// observer, never the socket or the session itself.
pub struct TurnContext {
    pub shared: Arc<SessionShared>,
    pub sink: OutboundSink,
    pub clients: ExternalClients,
    pub cancel: CancellationToken,
}

/// Run one full turn against the captured utterance audio
///
/// Entry point for the task spawned by the session loop; never panics and
/// never lets an error escape.
pub async fn run_turn(ctx: TurnContext, audio: Vec<u8>) {
    let started = Instant::now();

    match drive(&ctx, audio, started).await {
        Ok(()) => {}
        Err(Error::Cancelled) => {
            tracing::debug!(session_id = %ctx.shared.id(), "turn cancelled");
        }
        Err(Error::Transport(e)) => {
            tracing::info!(session_id = %ctx.shared.id(), error = %e, "turn lost its client");
        }
        Err(e) => {
            tracing::error!(session_id = %ctx.shared.id(), error = %e, "turn failed");
            let _ = ctx
                .sink
                .event(&ServerEvent::Error {
                    message: e.to_string(),
                })
                .await;
            let _ = back_to_listening(&ctx).await;
        }
    }
}

async fn drive(ctx: &TurnContext, audio: Vec<u8>, started: Instant) -> Result<()> {
    // ── STT ──────────────────────────────────────────────────────────
    let transcript = match transcribe_with_retry(ctx, &audio).await {
        Ok(text) => text,
        Err(Error::Cancelled) => return Err(Error::Cancelled),
        Err(e) => {
            tracing::warn!(session_id = %ctx.shared.id(), error = %e, "transcription failed twice");
            return speak_fallback(ctx).await;
        }
    };

    if transcript.is_empty() {
        tracing::info!(session_id = %ctx.shared.id(), "empty transcript, listening again");
        return back_to_listening(ctx).await;
    }

    tracing::info!(
        session_id = %ctx.shared.id(),
        transcript = %transcript,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "user turn transcribed"
    );
    ctx.sink
        .event(&ServerEvent::Transcript {
            text: transcript.clone(),
        })
        .await?;

    // ── LLM producer and TTS consumer, bridged by the sentence queue ─
    let messages = ctx.shared.build_llm_request(&transcript);
    let (sentence_tx, sentence_rx) = mpsc::channel::<String>(SENTENCE_QUEUE_CAPACITY);

    // Child token: an internal failure on either side stops the other, while
    // the parent stays reserved for barge-in and teardown
    let local = ctx.cancel.child_token();

    let producer = tokio::spawn({
        let llm = Arc::clone(&ctx.clients.llm);
        let session_id = ctx.shared.id().to_string();
        let local = local.clone();
        async move {
            let result = stream_sentences(&*llm, &messages, &sentence_tx, &local, started).await;
            if let Err(e) = &result {
                if !matches!(e, Error::Cancelled) {
                    tracing::warn!(session_id = %session_id, error = %e, "model stream failed");
                }
                local.cancel();
            }
            result
        }
    });

    let spoken = consume_sentences(ctx, sentence_rx, &local).await;
    let produced = match producer.await {
        Ok(result) => result,
        Err(e) => Err(Error::Invariant(format!("producer task panicked: {e}"))),
    };

    // Barge-in or teardown: the session loop owns all further messaging
    if ctx.cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    match (produced, spoken) {
        (Ok(full_text), Ok(audio_bytes)) => {
            finish_turn(ctx, &transcript, &full_text, audio_bytes, started).await
        }
        (Err(e), _) if !matches!(e, Error::Cancelled) => {
            ctx.sink
                .event(&ServerEvent::Error {
                    message: e.to_string(),
                })
                .await?;
            back_to_listening(ctx).await?;
            Ok(())
        }
        (_, Err(e)) if !matches!(e, Error::Cancelled) => Err(e),
        _ => {
            // Both sides report cancellation but the parent token is clear;
            // treat as an aborted turn and recover the session
            back_to_listening(ctx).await?;
            Ok(())
        }
    }
}

/// Commit and announce a successfully completed turn
async fn finish_turn(
    ctx: &TurnContext,
    transcript: &str,
    full_text: &str,
    audio_bytes: u64,
    started: Instant,
) -> Result<()> {
    let text = full_text.trim();

    if !text.is_empty() {
        ctx.sink
            .event(&ServerEvent::TtsText {
                text: text.to_string(),
                has_audio: audio_bytes > 0,
            })
            .await?;
        ctx.sink
            .event(&ServerEvent::AudioEnd {
                audio_bytes_sent: audio_bytes,
            })
            .await?;
        ctx.shared.commit_turn(transcript, text);
    }

    tracing::info!(
        session_id = %ctx.shared.id(),
        audio_bytes,
        total_ms = started.elapsed().as_millis() as u64,
        "turn complete"
    );
    back_to_listening(ctx).await
}

/// Return the session to listening and announce it
async fn back_to_listening(ctx: &TurnContext) -> Result<()> {
    if ctx.shared.transition(SessionState::UserSpeaking) {
        ctx.sink
            .event(&ServerEvent::status(SessionState::UserSpeaking))
            .await?;
    }
    Ok(())
}

/// Transcribe the turn audio, retrying once silently
async fn transcribe_with_retry(ctx: &TurnContext, audio: &[u8]) -> Result<String> {
    match transcribe_once(ctx, audio).await {
        Ok(text) => Ok(text),
        Err(Error::Cancelled) => Err(Error::Cancelled),
        Err(e) => {
            tracing::debug!(session_id = %ctx.shared.id(), error = %e, "retrying transcription");
            tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(STT_RETRY_DELAY) => {}
            }
            transcribe_once(ctx, audio).await
        }
    }
}

async fn transcribe_once(ctx: &TurnContext, audio: &[u8]) -> Result<String> {
    tokio::select! {
        _ = ctx.cancel.cancelled() => Err(Error::Cancelled),
        result = ctx.clients.stt.transcribe(audio, STT_LANGUAGE_HINT) => {
            result.map(|text| text.trim().to_string())
        }
    }
}

/// Stream model tokens into the sentence queue; returns the full reply text
///
/// Closing the queue sender is the end-of-stream sentinel the consumer waits
/// for.
async fn stream_sentences(
    llm: &dyn crate::clients::LanguageModel,
    messages: &[ChatMessage],
    sentence_tx: &mpsc::Sender<String>,
    cancel: &CancellationToken,
    started: Instant,
) -> Result<String> {
    use futures::StreamExt as _;

    let mut stream = tokio::select! {
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        opened = llm.stream_reply(messages) => opened?,
    };

    let mut splitter = SentenceSplitter::new();
    let mut full_text = String::new();
    let mut awaiting_first = true;
    let deadline = Instant::now() + LLM_STREAM_TIMEOUT;

    loop {
        let limit = if awaiting_first {
            deadline.min(Instant::now() + LLM_FIRST_TOKEN_TIMEOUT)
        } else {
            deadline
        };

        let item = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            item = tokio::time::timeout_at(limit, stream.next()) => item,
        };

        let token = match item {
            Err(_) if awaiting_first => {
                return Err(Error::Llm("no token before the deadline".to_string()))
            }
            Err(_) => return Err(Error::Llm("stream exceeded its deadline".to_string())),
            Ok(None) => break,
            Ok(Some(Err(e))) => return Err(e),
            Ok(Some(Ok(token))) => token,
        };

        if awaiting_first {
            awaiting_first = false;
            tracing::info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "first model token"
            );
        }

        full_text.push_str(&token);
        for sentence in splitter.push(&token) {
            enqueue_sentence(sentence_tx, sentence, cancel).await?;
        }
    }

    if let Some(rest) = splitter.flush() {
        enqueue_sentence(sentence_tx, rest, cancel).await?;
    }

    Ok(full_text)
}

async fn enqueue_sentence(
    sentence_tx: &mpsc::Sender<String>,
    sentence: String,
    cancel: &CancellationToken,
) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        sent = sentence_tx.send(sentence) => {
            // The consumer only disappears when the turn is being torn down
            sent.map_err(|_| Error::Cancelled)
        }
    }
}

/// Drain the sentence queue into synthesized audio on the wire
///
/// A vendor failure on one sentence is logged and skipped so the rest of the
/// reply still plays; transport failures and cancellation end the turn.
async fn consume_sentences(
    ctx: &TurnContext,
    mut sentence_rx: mpsc::Receiver<String>,
    cancel: &CancellationToken,
) -> Result<u64> {
    let mut audio_bytes = 0_u64;
    let mut audio_started = false;

    loop {
        let sentence = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            next = sentence_rx.recv() => match next {
                Some(sentence) => sentence,
                None => break,
            },
        };

        tracing::debug!(session_id = %ctx.shared.id(), sentence = %sentence, "synthesizing");

        let spoken = tokio::time::timeout(
            TTS_SENTENCE_TIMEOUT,
            speak_sentence(ctx, &sentence, cancel, &mut audio_bytes, &mut audio_started),
        )
        .await;

        match spoken {
            Ok(Ok(())) => {}
            Ok(Err(Error::Cancelled)) => return Err(Error::Cancelled),
            Ok(Err(e @ Error::Transport(_))) => return Err(e),
            Ok(Err(e)) => {
                tracing::warn!(session_id = %ctx.shared.id(), error = %e, "skipping sentence");
            }
            Err(_) => {
                tracing::warn!(session_id = %ctx.shared.id(), "synthesis timed out, skipping");
            }
        }
    }

    Ok(audio_bytes)
}

/// Synthesize one sentence and forward its chunks to the client
///
/// The first chunk of the turn flips the session to `AI_SPEAKING` and is
/// preceded by `audio_start`. Cancellation is observed before every send; no
/// chunk goes out after the signal is seen, and dropping the stream closes
/// the vendor connection.
async fn speak_sentence(
    ctx: &TurnContext,
    sentence: &str,
    cancel: &CancellationToken,
    audio_bytes: &mut u64,
    audio_started: &mut bool,
) -> Result<()> {
    use futures::StreamExt as _;

    let mut stream = tokio::select! {
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        opened = ctx.clients.tts.stream_speech(sentence) => opened?,
    };

    loop {
        // The cancel branch comes first: once the signal is raised, nothing
        // more may be enqueued behind the session's `interrupt` message
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            chunk = stream.next() => match chunk {
                None => break,
                Some(Err(e)) => return Err(e),
                Some(Ok(chunk)) => chunk,
            },
        };

        if !*audio_started {
            *audio_started = true;
            if ctx.shared.transition(SessionState::AiSpeaking) {
                let status = ServerEvent::status(SessionState::AiSpeaking);
                event_unless_cancelled(ctx, cancel, &status).await?;
            }
            event_unless_cancelled(ctx, cancel, &ServerEvent::AudioStart).await?;
        }

        *audio_bytes += chunk.len() as u64;
        audio_unless_cancelled(ctx, cancel, chunk).await?;
        ctx.shared.touch();
    }

    Ok(())
}

/// Forward a control message, preferring cancellation over the send
async fn event_unless_cancelled(
    ctx: &TurnContext,
    cancel: &CancellationToken,
    event: &ServerEvent,
) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        sent = ctx.sink.event(event) => sent,
    }
}

/// Forward an audio chunk, preferring cancellation over the send
async fn audio_unless_cancelled(
    ctx: &TurnContext,
    cancel: &CancellationToken,
    chunk: bytes::Bytes,
) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        sent = ctx.sink.audio(chunk) => sent,
    }
}

/// Speak the canned apology when transcription is unrecoverable
///
/// Runs only the synthesis stage; nothing is recorded in memory. If the
/// synthesizer also fails, `tts_text` with `has_audio: false` asks the
/// browser to voice the apology itself.
async fn speak_fallback(ctx: &TurnContext) -> Result<()> {
    let mut audio_bytes = 0_u64;
    let mut audio_started = false;

    let spoken = tokio::time::timeout(
        TTS_SENTENCE_TIMEOUT,
        speak_sentence(
            ctx,
            FALLBACK_UTTERANCE,
            &ctx.cancel,
            &mut audio_bytes,
            &mut audio_started,
        ),
    )
    .await;

    match spoken {
        Ok(Ok(())) => {}
        Ok(Err(Error::Cancelled)) => return Err(Error::Cancelled),
        Ok(Err(e @ Error::Transport(_))) => return Err(e),
        Ok(Err(e)) => {
            tracing::warn!(session_id = %ctx.shared.id(), error = %e, "fallback synthesis failed");
        }
        Err(_) => {
            tracing::warn!(session_id = %ctx.shared.id(), "fallback synthesis timed out");
        }
    }

    ctx.sink
        .event(&ServerEvent::TtsText {
            text: FALLBACK_UTTERANCE.to_string(),
            has_audio: audio_bytes > 0,
        })
        .await?;
    if audio_bytes > 0 {
        ctx.sink
            .event(&ServerEvent::AudioEnd {
                audio_bytes_sent: audio_bytes,
            })
            .await?;
    }

    back_to_listening(ctx).await
}
