mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeSpeech, Harness, RecordingSink, ScriptedEngine};
use vera_core::{ChannelState, ChatChannel, ChatSettings, OutboundEvent, Role};

fn frame(token: &str, rid: &str, conv: &str, message: &str) -> String {
    serde_json::json!({
        "token": token,
        "research_id": rid,
        "conversation_id": conv,
        "message": message,
        "model": "gpt-4.1",
    })
    .to_string()
}

#[tokio::test]
async fn chunks_then_complete_then_persisted() {
    let h = Harness::new();
    let token = h.login("RID001");
    let chat = h.orchestrator(Arc::new(ScriptedEngine::replying(&["Hel", "lo"])), None, ChatSettings::default());
    let mut channel = ChatChannel::new(chat);
    let mut sink = RecordingSink::default();

    channel
        .handle_text(&frame(&token, "RID001", "conv_s1", "Say hello"), &mut sink)
        .await
        .unwrap();

    assert_eq!(
        sink.events,
        vec![
            OutboundEvent::UserMessageSaved {
                conversation_id: "conv_s1".into()
            },
            OutboundEvent::Chunk { content: "Hel".into() },
            OutboundEvent::Chunk { content: "lo".into() },
            OutboundEvent::Complete {
                full_response: "Hello".into()
            },
        ]
    );
    assert_eq!(channel.state(), ChannelState::Ready);

    let page = h.ledger.history("RID001", Some("conv_s1"), 50, 0).unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.messages[1].content, "Hello");
    assert_eq!(page.messages[1].model_used.as_deref(), Some("gpt-4.1"));
}

#[tokio::test]
async fn audio_event_follows_complete_when_speech_succeeds() {
    let h = Harness::new();
    let token = h.login("RID001");
    let chat = h.orchestrator(
        Arc::new(ScriptedEngine::replying(&["Hi"])),
        Some(Arc::new(FakeSpeech { fail: false })),
        ChatSettings::default(),
    );
    let mut channel = ChatChannel::new(chat);
    let mut sink = RecordingSink::default();
    channel
        .handle_text(&frame(&token, "RID001", "conv_a", "greet me"), &mut sink)
        .await
        .unwrap();

    match sink.events.last() {
        Some(OutboundEvent::Audio { audio_base64, audio_url }) => {
            assert_eq!(audio_url, "/audio/fake.mp3");
            assert_eq!(audio_base64, "SGk=");
        }
        other => panic!("expected audio event, got {:?}", other),
    }
    let page = h.ledger.history("RID001", Some("conv_a"), 50, 0).unwrap();
    assert_eq!(page.messages[1].audio_url.as_deref(), Some("/audio/fake.mp3"));
}

#[tokio::test]
async fn rejected_frames_emit_errors_and_keep_state() {
    let h = Harness::new();
    let token = h.login("RID001");
    let chat = h.orchestrator(Arc::new(ScriptedEngine::replying(&["x"])), None, ChatSettings::default());
    let mut channel = ChatChannel::new(chat);
    let mut sink = RecordingSink::default();

    channel.handle_text("not json", &mut sink).await.unwrap();
    channel
        .handle_text(r#"{"research_id":"RID001","conversation_id":"c","message":"hi"}"#, &mut sink)
        .await
        .unwrap();
    channel
        .handle_text(&frame("v1.bogus.token", "RID001", "c", "hi"), &mut sink)
        .await
        .unwrap();
    channel
        .handle_text(&frame(&token, "RID002", "c", "hi"), &mut sink)
        .await
        .unwrap();

    let errors: Vec<_> = sink
        .events
        .iter()
        .map(|e| match e {
            OutboundEvent::Error { error } => error.as_str(),
            other => panic!("unexpected event {:?}", other),
        })
        .collect();
    assert_eq!(
        errors,
        ["Invalid message format", "Missing token", "Invalid token", "Research ID mismatch"]
    );
    assert_eq!(channel.state(), ChannelState::AwaitingAuth);
    assert_eq!(h.ledger.history("RID001", None, 50, 0).unwrap().total, 0);
    assert_eq!(h.ledger.history("RID002", None, 50, 0).unwrap().total, 0);
}

#[tokio::test]
async fn disconnect_mid_stream_discards_the_assistant_reply() {
    let h = Harness::new();
    let token = h.login("RID001");
    let engine = ScriptedEngine {
        chunks: vec!["Hel".into(), "lo".into()],
        gap: Some(Duration::from_millis(200)),
        ..Default::default()
    };
    let chat = h.orchestrator(Arc::new(engine), None, ChatSettings::default());
    let mut channel = ChatChannel::new(chat);
    let mut sink = RecordingSink {
        close_after_chunks: Some(1),
        ..Default::default()
    };

    let result = channel
        .handle_text(&frame(&token, "RID001", "conv_gone", "Say hello"), &mut sink)
        .await;
    assert!(result.is_err());
    assert_eq!(channel.state(), ChannelState::Closed);
    assert_eq!(sink.chunk_count(), 1);

    let page = h.ledger.history("RID001", Some("conv_gone"), 50, 0).unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.messages[0].role, Role::User);
}

#[tokio::test]
async fn engine_failure_reports_error_and_returns_to_ready() {
    let h = Harness::new();
    let token = h.login("RID001");
    let engine = ScriptedEngine {
        fail: true,
        ..Default::default()
    };
    let chat = h.orchestrator(Arc::new(engine), None, ChatSettings::default());
    let mut channel = ChatChannel::new(chat);
    let mut sink = RecordingSink::default();
    channel
        .handle_text(&frame(&token, "RID001", "conv_e", "hi"), &mut sink)
        .await
        .unwrap();

    assert!(matches!(sink.events[0], OutboundEvent::UserMessageSaved { .. }));
    assert!(matches!(sink.events[1], OutboundEvent::Error { .. }));
    assert_eq!(channel.state(), ChannelState::Ready);
    assert_eq!(h.ledger.history("RID001", Some("conv_e"), 50, 0).unwrap().total, 1);
}

#[tokio::test]
async fn deactivated_caller_is_refused_on_the_next_frame() {
    let h = Harness::new();
    let token = h.login("RID001");
    let chat = h.orchestrator(Arc::new(ScriptedEngine::replying(&["ok"])), None, ChatSettings::default());
    let mut channel = ChatChannel::new(chat);
    let mut sink = RecordingSink::default();
    channel
        .handle_text(&frame(&token, "RID001", "conv_x", "first"), &mut sink)
        .await
        .unwrap();

    h.ids.set_active("RID001", false).unwrap();
    sink.events.clear();
    channel
        .handle_text(&frame(&token, "RID001", "conv_x", "second"), &mut sink)
        .await
        .unwrap();
    assert_eq!(
        sink.events,
        vec![OutboundEvent::Error {
            error: "Research ID is deactivated".into()
        }]
    );
    assert_eq!(h.ledger.history("RID001", Some("conv_x"), 50, 0).unwrap().total, 2);
}

#[tokio::test]
async fn engine_breaking_off_mid_stream_stores_no_assistant_reply() {
    let h = Harness::new();
    let token = h.login("RID001");
    let engine = ScriptedEngine {
        chunks: vec!["Half an ".into()],
        fail_mid_stream: true,
        ..Default::default()
    };
    let chat = h.orchestrator(Arc::new(engine), None, ChatSettings::default());
    let mut channel = ChatChannel::new(chat);
    let mut sink = RecordingSink::default();
    channel
        .handle_text(&frame(&token, "RID001", "conv_cut", "Tell me more"), &mut sink)
        .await
        .unwrap();

    assert_eq!(sink.events.len(), 3);
    assert!(matches!(sink.events[0], OutboundEvent::UserMessageSaved { .. }));
    assert_eq!(sink.events[1], OutboundEvent::Chunk { content: "Half an ".into() });
    match &sink.events[2] {
        OutboundEvent::Error { error } => assert!(error.starts_with("The answer engine failed"), "{}", error),
        other => panic!("expected error event, got {:?}", other),
    }
    assert_eq!(channel.state(), ChannelState::Ready);

    let page = h.ledger.history("RID001", Some("conv_cut"), 50, 0).unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.messages[0].role, Role::User);
}

#[tokio::test]
async fn authenticated_but_incomplete_frame_moves_to_ready() {
    let h = Harness::new();
    let token = h.login("RID001");
    let chat = h.orchestrator(Arc::new(ScriptedEngine::replying(&["x"])), None, ChatSettings::default());
    let mut channel = ChatChannel::new(chat);
    let mut sink = RecordingSink::default();

    let no_conversation = serde_json::json!({ "token": token, "research_id": "RID001", "message": "hi" });
    channel
        .handle_text(&no_conversation.to_string(), &mut sink)
        .await
        .unwrap();
    assert_eq!(
        sink.events,
        vec![OutboundEvent::Error {
            error: "Missing conversation_id".into()
        }]
    );
    assert_eq!(channel.state(), ChannelState::Ready);
    assert_eq!(h.ledger.history("RID001", None, 50, 0).unwrap().total, 0);
}
