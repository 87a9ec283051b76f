mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{FakeSpeech, Harness, ScriptedEngine};
use vera_core::{
    ChatOrchestrator, ChatRequest, ChatSettings, ConversationLedger, Database, IngestRequest, LedgerLimits, Role,
    VeraError,
};

fn request(rid: &str, conv: &str, content: &str, model: Option<&str>) -> ChatRequest {
    ChatRequest {
        research_id: rid.into(),
        conversation_id: conv.into(),
        content: content.into(),
        model: model.map(str::to_string),
    }
}

#[tokio::test]
async fn question_is_answered_and_both_turns_are_stored() {
    let h = Harness::new();
    let engine = Arc::new(ScriptedEngine::replying(&["P.A.D. is when the blood vessels in your legs get narrow."]));
    let chat = h.orchestrator(engine.clone(), None, ChatSettings::default());

    let caller = chat.authenticate(Some(&h.login("RID001"))).await.unwrap();
    let reply = chat
        .send_message(&caller, request("RID001", "conv_1", "What is P.A.D.?", Some("gpt-4.1")))
        .await
        .unwrap();
    assert_eq!(reply.role, Role::Assistant);
    assert_eq!(reply.model_used.as_deref(), Some("gpt-4.1"));

    let page = h.ledger.history("RID001", Some("conv_1"), 50, 0).unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.messages[0].role, Role::User);
    assert_eq!(page.messages[0].content, "What is P.A.D.?");
    assert_eq!(page.messages[1].id, reply.id);

    let sent = engine.last_request().unwrap();
    assert_eq!(sent.model, "gpt-4.1");
    assert_eq!(sent.turns[0].role, Role::System);
    assert_eq!(sent.turns.last().unwrap().content, "What is P.A.D.?");
}

#[tokio::test]
async fn default_model_is_used_when_none_requested() {
    let h = Harness::new();
    let chat = h.orchestrator(Arc::new(ScriptedEngine::replying(&["ok"])), None, ChatSettings::default());
    let reply = chat
        .send_message("RID001", request("RID001", "conv_d", "hello", None))
        .await
        .unwrap();
    assert_eq!(reply.model_used.as_deref(), Some("gpt-4o"));
}

#[tokio::test]
async fn engine_timeout_keeps_only_the_user_message() {
    let h = Harness::new();
    let engine = ScriptedEngine {
        chunks: vec!["too late".into()],
        delay: Some(Duration::from_secs(10)),
        ..Default::default()
    };
    let settings = ChatSettings {
        engine_timeout: Duration::from_millis(50),
        ..ChatSettings::default()
    };
    let chat = h.orchestrator(Arc::new(engine), None, settings);

    let err = chat
        .send_message("RID001", request("RID001", "conv_2", "Are you there?", None))
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "got {:?}", err);

    let page = h.ledger.history("RID001", Some("conv_2"), 50, 0).unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.messages[0].role, Role::User);
}

#[tokio::test]
async fn engine_failure_is_upstream_error_without_assistant_turn() {
    let h = Harness::new();
    let engine = ScriptedEngine {
        fail: true,
        ..Default::default()
    };
    let chat = h.orchestrator(Arc::new(engine), None, ChatSettings::default());
    let err = chat
        .send_message("RID001", request("RID001", "conv_f", "hi", None))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "upstream_error");
    assert_eq!(h.ledger.history("RID001", Some("conv_f"), 50, 0).unwrap().total, 1);
}

#[tokio::test]
async fn caller_cannot_act_as_another_research_id() {
    let h = Harness::new();
    h.ledger
        .append(vera_core::NewMessage::new("RID002", "conv_b", Role::User, "private"))
        .unwrap();
    let engine = Arc::new(ScriptedEngine::replying(&["nope"]));
    let chat = h.orchestrator(engine.clone(), None, ChatSettings::default());
    let caller = chat.authenticate(Some(&h.login("RID001"))).await.unwrap();

    let err = chat
        .send_message(&caller, request("RID002", "conv_b", "let me in", None))
        .await
        .unwrap_err();
    assert!(matches!(err, VeraError::Forbidden(_)));
    assert!(matches!(
        chat.history(&caller, "RID002", Some("conv_b"), 50, 0).await,
        Err(VeraError::Forbidden(_))
    ));
    assert!(engine.last_request().is_none());

    // Declaring itself but writing into RID002's conversation is also refused.
    let err = chat
        .send_message(&caller, request("RID001", "conv_b", "let me in", None))
        .await
        .unwrap_err();
    assert!(matches!(err, VeraError::Forbidden(_)));
    assert_eq!(h.ledger.history("RID002", Some("conv_b"), 50, 0).unwrap().total, 1);
}

#[tokio::test]
async fn speech_failure_is_swallowed_and_success_is_recorded() {
    let h = Harness::new();
    let engine = Arc::new(ScriptedEngine::replying(&["Walking helps."]));

    let broken = h.orchestrator(engine.clone(), Some(Arc::new(FakeSpeech { fail: true })), ChatSettings::default());
    let reply = broken
        .send_message("RID001", request("RID001", "conv_s", "What helps?", None))
        .await
        .unwrap();
    assert_eq!(reply.audio_url, None);

    let working = h.orchestrator(engine, Some(Arc::new(FakeSpeech { fail: false })), ChatSettings::default());
    let reply = working
        .send_message("RID001", request("RID001", "conv_s", "And more?", None))
        .await
        .unwrap();
    assert_eq!(reply.audio_url.as_deref(), Some("/audio/fake.mp3"));
}

#[tokio::test]
async fn context_window_limits_forwarded_turns_and_drops_system_rows() {
    let h = Harness::new();
    for i in 0..6 {
        let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
        h.ledger
            .append(vera_core::NewMessage::new("RID001", "conv_w", role, format!("turn {}", i)))
            .unwrap();
    }
    h.ledger
        .append(vera_core::NewMessage::new("RID001", "conv_w", Role::System, "internal note"))
        .unwrap();
    let engine = Arc::new(ScriptedEngine::replying(&["fine"]));
    let settings = ChatSettings {
        context_window: 4,
        ..ChatSettings::default()
    };
    let chat = h.orchestrator(engine.clone(), None, settings);
    chat.send_message("RID001", request("RID001", "conv_w", "latest", None))
        .await
        .unwrap();

    let turns = engine.last_request().unwrap().turns;
    let texts: Vec<_> = turns.iter().skip(1).map(|t| t.content.as_str()).collect();
    // Window of 4: "turn 4", "turn 5", the system note (dropped), "latest".
    assert_eq!(texts, ["turn 4", "turn 5", "latest"]);
    assert!(turns.iter().skip(1).all(|t| t.role != Role::System));
}

#[tokio::test]
async fn ingest_stores_provider_metadata_under_ownership_rules() {
    let h = Harness::new();
    let chat = h.orchestrator(Arc::new(ScriptedEngine::default()), None, ChatSettings::default());
    let saved = chat
        .ingest(
            "RID001",
            IngestRequest {
                research_id: "RID001".into(),
                conversation_id: "conv_voice".into(),
                role: Role::Assistant,
                content: "Spoken answer".into(),
                provider: Some("elevenlabs".into()),
                provider_conversation_id: Some("el_1".into()),
                provider_message_id: Some("el_msg_9".into()),
            },
        )
        .await
        .unwrap();
    let meta = saved.provider.unwrap();
    assert_eq!(meta.provider, "elevenlabs");
    assert_eq!(meta.message_id.as_deref(), Some("el_msg_9"));

    let err = chat
        .ingest(
            "RID002",
            IngestRequest {
                research_id: "RID002".into(),
                conversation_id: "conv_voice".into(),
                role: Role::User,
                content: "hijack".into(),
                provider: None,
                provider_conversation_id: None,
                provider_message_id: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, VeraError::Forbidden(_)));
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let h = Harness::new();
    let chat = h.orchestrator(Arc::new(ScriptedEngine::default()), None, ChatSettings::default());
    assert!(matches!(chat.authenticate(None).await, Err(VeraError::Unauthorized(_))));
    assert!(matches!(chat.authenticate(Some("  ")).await, Err(VeraError::Unauthorized(_))));
}

#[tokio::test]
async fn history_of_another_identitys_conversation_is_forbidden() {
    let h = Harness::new();
    h.ledger
        .append(vera_core::NewMessage::new("RID001", "conv_a", Role::User, "mine"))
        .unwrap();
    let chat = h.orchestrator(Arc::new(ScriptedEngine::default()), None, ChatSettings::default());
    let caller = chat.authenticate(Some(&h.login("RID002"))).await.unwrap();
    assert_eq!(caller, "RID002");

    let err = chat
        .history(&caller, "RID002", Some("conv_a"), 50, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, VeraError::Forbidden(_)));
    assert_eq!(chat.history(&caller, "RID002", None, 50, 0).await.unwrap().total, 0);
}

/// Holds the SQLite write lock from a plain connection until dropped.
fn hold_write_lock(db: &Database) -> rusqlite::Connection {
    let conn = rusqlite::Connection::open(db.path()).unwrap();
    conn.execute_batch("BEGIN IMMEDIATE").unwrap();
    conn
}

#[tokio::test]
async fn locked_store_aborts_before_the_engine_is_called() {
    let h = Harness::new();
    let engine = Arc::new(ScriptedEngine::replying(&["never sent"]));
    let db = h.db.clone().with_busy_timeout(Duration::from_millis(50));
    let chat = ChatOrchestrator::new(
        h.auth.clone(),
        ConversationLedger::new(db.clone(), LedgerLimits::default()),
        engine.clone(),
        None,
        ChatSettings::default(),
    );

    let lock = hold_write_lock(&db);
    let err = chat
        .send_message("RID001", request("RID001", "conv_locked", "anyone?", None))
        .await
        .unwrap_err();
    drop(lock);

    assert!(matches!(err, VeraError::TransientStore(_)), "got {:?}", err);
    assert!(engine.last_request().is_none());
    assert_eq!(h.ledger.history("RID001", Some("conv_locked"), 50, 0).unwrap().total, 0);
}

#[tokio::test(flavor = "current_thread")]
async fn waiting_on_a_locked_store_leaves_the_runtime_responsive() {
    let h = Harness::new();
    let chat = h.orchestrator(Arc::new(ScriptedEngine::replying(&["ok"])), None, ChatSettings::default());

    let path = h.db.path().to_path_buf();
    let (locked_tx, locked_rx) = std::sync::mpsc::channel();
    let holder = std::thread::spawn(move || {
        let conn = rusqlite::Connection::open(path).unwrap();
        conn.execute_batch("BEGIN IMMEDIATE").unwrap();
        locked_tx.send(()).unwrap();
        std::thread::sleep(Duration::from_millis(500));
        conn.execute_batch("COMMIT").unwrap();
    });
    locked_rx.recv().unwrap();

    let ticks = Arc::new(AtomicUsize::new(0));
    let ticker = {
        let ticks = ticks.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                ticks.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    let reply = chat
        .send_message("RID001", request("RID001", "conv_wait", "still there?", None))
        .await
        .unwrap();
    ticker.abort();
    holder.join().unwrap();

    assert_eq!(reply.content, "ok");
    let ticked = ticks.load(Ordering::SeqCst);
    assert!(ticked >= 10, "runtime stalled while waiting on the store: {} ticks", ticked);
}
