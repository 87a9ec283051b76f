//! Shared fixtures: a throwaway database plus scripted collaborators.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::mpsc;

use vera_core::{
    Answer, AnswerEngine, AnswerRequest, AnswerStream, AudioArtifact, ChatOrchestrator, ChatSettings,
    ConversationLedger, Database, Disconnected, EngineError, EngineResult, EventSink, IdentityStore,
    LedgerLimits, Origin, OutboundEvent, SessionAuthenticator, SpeechError, SpeechResult, SpeechSynthesizer,
    TokenSigner,
};

pub const SECRET: &str = "integration-test-secret";

pub struct Harness {
    _dir: TempDir,
    pub db: Database,
    pub ids: IdentityStore,
    pub auth: SessionAuthenticator,
    pub ledger: ConversationLedger,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_ttl(chrono::Duration::hours(24))
    }

    pub fn with_ttl(ttl: chrono::Duration) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("vera.db")).unwrap();
        let ids = IdentityStore::new(db.clone());
        ids.create("RID001", None).unwrap();
        ids.create("RID002", None).unwrap();
        Self {
            _dir: dir,
            auth: SessionAuthenticator::new(db.clone(), TokenSigner::new(SECRET), ttl),
            ledger: ConversationLedger::new(db.clone(), LedgerLimits::default()),
            ids,
            db,
        }
    }

    pub fn login(&self, research_id: &str) -> String {
        self.auth.issue_token(research_id, &Origin::default()).unwrap().token
    }

    pub fn orchestrator(
        &self,
        engine: Arc<dyn AnswerEngine>,
        speech: Option<Arc<dyn SpeechSynthesizer>>,
        settings: ChatSettings,
    ) -> ChatOrchestrator {
        ChatOrchestrator::new(self.auth.clone(), self.ledger.clone(), engine, speech, settings)
    }
}

/// Answers with a fixed script, optionally after a delay or with a failure.
#[derive(Default)]
pub struct ScriptedEngine {
    pub chunks: Vec<String>,
    pub delay: Option<Duration>,
    pub gap: Option<Duration>,
    pub fail: bool,
    /// Stream the chunks, then break off with a transport error.
    pub fail_mid_stream: bool,
    pub seen: Mutex<Vec<AnswerRequest>>,
}

impl ScriptedEngine {
    pub fn replying(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn last_request(&self) -> Option<AnswerRequest> {
        self.seen.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl AnswerEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn answer(&self, request: AnswerRequest) -> EngineResult<Answer> {
        self.seen.lock().unwrap().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(EngineError::Api {
                status: 500,
                body: "scripted failure".into(),
            });
        }
        Ok(Answer {
            text: self.chunks.concat(),
            citations: Vec::new(),
        })
    }

    async fn stream(&self, request: AnswerRequest) -> EngineResult<AnswerStream> {
        self.seen.lock().unwrap().push(request);
        if self.fail {
            return Err(EngineError::Http("scripted failure".into()));
        }
        let (tx, rx) = mpsc::channel(8);
        let chunks = self.chunks.clone();
        let gap = self.gap;
        let fail_mid_stream = self.fail_mid_stream;
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
                if let Some(gap) = gap {
                    tokio::time::sleep(gap).await;
                }
            }
            if fail_mid_stream {
                let _ = tx.send(Err(EngineError::Interrupted("connection reset".into()))).await;
            }
        });
        Ok(rx)
    }
}

/// Speech that always succeeds or always fails.
pub struct FakeSpeech {
    pub fail: bool,
}

#[async_trait]
impl SpeechSynthesizer for FakeSpeech {
    async fn synthesize(&self, text: &str) -> SpeechResult<AudioArtifact> {
        if self.fail {
            return Err(SpeechError::Api {
                status: 503,
                body: "voice offline".into(),
            });
        }
        Ok(AudioArtifact {
            url: "/audio/fake.mp3".into(),
            bytes: text.as_bytes().to_vec(),
            mime_type: "audio/mpeg".into(),
        })
    }
}

/// Collects events. With `close_after_chunks`, the peer "leaves" once that
/// many chunks were delivered.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<OutboundEvent>,
    pub close_after_chunks: Option<usize>,
}

impl RecordingSink {
    pub fn chunk_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, OutboundEvent::Chunk { .. }))
            .count()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn emit(&mut self, event: OutboundEvent) -> Result<(), Disconnected> {
        self.events.push(event);
        Ok(())
    }

    async fn closed(&mut self) {
        match self.close_after_chunks {
            Some(n) if self.chunk_count() >= n => {}
            _ => std::future::pending::<()>().await,
        }
    }
}
