//! Integration tests for the engine lifecycle.
//!
//! One engine instance per process, explicit `start()`/`stop()`, join/leave
//! emissions around the active conversation, and error handling around the
//! initial snapshot load.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use murmur_proto::conversation::{
    ConversationId, ConversationKind, ConversationPage, ConversationSnapshot, Participant,
    ParticipantRole, UserId,
};
use murmur_proto::event::{ClientEvent, PushEvent};
use murmur_proto::message::{MessageId, MessageSnapshot, Timestamp};
use murmur_sync::config::SyncConfig;
use murmur_sync::engine::{EngineError, SyncEngine, SyncEvent};
use murmur_sync::transport::loopback::{LoopbackPush, PushHarness, ScriptedRest, loopback_push};
use murmur_sync::transport::{ConnectionState, RestError};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn participant(id: &str, name: &str) -> Participant {
    Participant {
        user_id: UserId::new(id),
        role: ParticipantRole::Member,
        joined_at: Timestamp::from_millis(0),
        display_name: name.into(),
        photo_url: None,
    }
}

fn direct_snapshot(id: &str, unread: u32) -> ConversationSnapshot {
    ConversationSnapshot {
        id: ConversationId::new(id),
        kind: ConversationKind::Direct,
        participants: vec![participant("u-local", "Me"), participant("u-bob", "Bob")],
        display_name: None,
        photo_url: None,
        last_message: None,
        unread_count: unread,
        updated_at: Timestamp::from_millis(100),
    }
}

fn message(conv: &str, id: &str, at: u64) -> MessageSnapshot {
    MessageSnapshot {
        id: MessageId::new(id),
        conversation_id: ConversationId::new(conv),
        sender_id: UserId::new("u-bob"),
        content: Some(format!("msg {id}")),
        media: None,
        created_at: Timestamp::from_millis(at),
        client_tag: None,
    }
}

type TestEngine = Arc<SyncEngine<ScriptedRest, LoopbackPush>>;

fn build_engine(
    rest: Arc<ScriptedRest>,
) -> (TestEngine, mpsc::Receiver<SyncEvent>, PushHarness) {
    let (push, harness) = loopback_push(64);
    let (engine, events) = SyncEngine::new(
        rest,
        Arc::new(push),
        UserId::new("u-local"),
        SyncConfig::default(),
    );
    (engine, events, harness)
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within timeout"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ---------------------------------------------------------------------------
// Start
// ---------------------------------------------------------------------------

#[tokio::test]
async fn start_loads_the_initial_snapshot() {
    let rest = Arc::new(ScriptedRest::new());
    rest.push_page(ConversationPage {
        conversations: vec![direct_snapshot("c1", 2), direct_snapshot("c2", 0)],
        next_cursor: None,
    });
    let (engine, mut events, _harness) = build_engine(rest);

    engine.start().await.expect("start");
    assert!(engine.is_running());
    assert_eq!(engine.conversations().len(), 2);
    assert_eq!(engine.total_unread(), 2);
    assert_eq!(events.recv().await, Some(SyncEvent::ConversationsChanged));
}

#[tokio::test]
async fn start_follows_the_pagination_cursor() {
    let rest = Arc::new(ScriptedRest::new());
    rest.push_page(ConversationPage {
        conversations: vec![direct_snapshot("c1", 0)],
        next_cursor: Some("page-2".into()),
    });
    rest.push_page(ConversationPage {
        conversations: vec![direct_snapshot("c2", 0)],
        next_cursor: None,
    });
    let (engine, _events, _harness) = build_engine(Arc::clone(&rest));

    engine.start().await.expect("start");
    assert_eq!(engine.conversations().len(), 2);
    assert_eq!(rest.fetch_count(), 2);
}

#[tokio::test]
async fn create_conversation_inserts_the_server_snapshot() {
    let rest = Arc::new(ScriptedRest::new());
    rest.push_page(ConversationPage {
        conversations: vec![],
        next_cursor: None,
    });
    let (engine, _events, _harness) = build_engine(rest);
    engine.start().await.expect("start");

    let id = engine
        .create_conversation(&[UserId::new("u-local"), UserId::new("u-bob")])
        .await
        .expect("create");

    let conversations = engine.conversations();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0].id, id);
    assert_eq!(conversations[0].kind, ConversationKind::Direct);
}

#[tokio::test]
async fn start_is_idempotent() {
    let rest = Arc::new(ScriptedRest::new());
    rest.push_page(ConversationPage {
        conversations: vec![direct_snapshot("c1", 0)],
        next_cursor: None,
    });
    let (engine, _events, _harness) = build_engine(Arc::clone(&rest));

    engine.start().await.expect("first start");
    engine.start().await.expect("second start");
    assert_eq!(rest.fetch_count(), 1, "second start must not refetch");
}

#[tokio::test]
async fn unauthorized_initial_fetch_fails_start() {
    let rest = Arc::new(ScriptedRest::new());
    rest.fail_next(RestError::Unauthorized);
    let (engine, _events, _harness) = build_engine(rest);

    let result = engine.start().await;
    assert!(matches!(
        result,
        Err(EngineError::Rest(RestError::Unauthorized))
    ));
    assert!(!engine.is_running());
}

#[tokio::test]
async fn transient_initial_failure_is_tolerated() {
    let rest = Arc::new(ScriptedRest::new());
    rest.fail_next(RestError::Unavailable("cold start".into()));
    let (engine, _events, _harness) = build_engine(rest);

    engine.start().await.expect("start despite transient failure");
    assert!(engine.is_running());
    assert!(engine.conversations().is_empty());
}

// ---------------------------------------------------------------------------
// Active conversation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn opening_a_conversation_joins_loads_and_marks_read() {
    let rest = Arc::new(ScriptedRest::new());
    rest.push_page(ConversationPage {
        conversations: vec![direct_snapshot("c1", 2)],
        next_cursor: None,
    });
    rest.set_messages(
        ConversationId::new("c1"),
        vec![message("c1", "m2", 200), message("c1", "m1", 100)],
    );
    let (engine, _events, harness) = build_engine(Arc::clone(&rest));
    engine.start().await.expect("start");
    let conv = ConversationId::new("c1");

    engine.set_active_conversation(Some(conv.clone())).await;

    assert_eq!(
        harness.next_emitted().await,
        Some(ClientEvent::JoinConversation {
            conversation_id: conv.clone(),
        })
    );
    // Page arrives ascending after the engine reverses it.
    let ids: Vec<String> = engine.messages(&conv).iter().map(|m| m.id.to_string()).collect();
    assert_eq!(ids, vec!["m1", "m2"]);
    assert_eq!(rest.mark_read_calls(), vec![conv]);
    assert_eq!(engine.total_unread(), 0);
}

#[tokio::test]
async fn switching_conversations_leaves_the_previous_one() {
    let rest = Arc::new(ScriptedRest::new());
    rest.push_page(ConversationPage {
        conversations: vec![direct_snapshot("c1", 0), direct_snapshot("c2", 0)],
        next_cursor: None,
    });
    let (engine, _events, harness) = build_engine(rest);
    engine.start().await.expect("start");

    engine
        .set_active_conversation(Some(ConversationId::new("c1")))
        .await;
    engine
        .set_active_conversation(Some(ConversationId::new("c2")))
        .await;

    let emissions = harness.drain_emitted().await;
    assert_eq!(
        emissions,
        vec![
            ClientEvent::JoinConversation {
                conversation_id: ConversationId::new("c1"),
            },
            ClientEvent::LeaveConversation {
                conversation_id: ConversationId::new("c1"),
            },
            ClientEvent::JoinConversation {
                conversation_id: ConversationId::new("c2"),
            },
        ]
    );
}

#[tokio::test]
async fn reselecting_the_same_conversation_is_a_no_op() {
    let rest = Arc::new(ScriptedRest::new());
    rest.push_page(ConversationPage {
        conversations: vec![direct_snapshot("c1", 0)],
        next_cursor: None,
    });
    let (engine, _events, harness) = build_engine(rest);
    engine.start().await.expect("start");
    let conv = ConversationId::new("c1");

    engine.set_active_conversation(Some(conv.clone())).await;
    let _ = harness.drain_emitted().await;
    engine.set_active_conversation(Some(conv)).await;
    assert!(harness.drain_emitted().await.is_empty());
}

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

#[tokio::test]
async fn load_older_messages_widens_the_window() {
    let rest = Arc::new(ScriptedRest::new());
    rest.push_page(ConversationPage {
        conversations: vec![direct_snapshot("c1", 0)],
        next_cursor: None,
    });
    let conv = ConversationId::new("c1");
    rest.set_messages(conv.clone(), vec![message("c1", "m3", 300)]);
    let (engine, _events, _harness) = build_engine(Arc::clone(&rest));
    engine.start().await.expect("start");

    engine.set_active_conversation(Some(conv.clone())).await;
    wait_until(|| engine.messages(&conv).len() == 1).await;

    // Older history becomes available server-side.
    rest.set_messages(
        conv.clone(),
        vec![
            message("c1", "m3", 300),
            message("c1", "m2", 200),
            message("c1", "m1", 100),
        ],
    );
    engine.load_older_messages(&conv).await.expect("load older");

    let ids: Vec<String> = engine.messages(&conv).iter().map(|m| m.id.to_string()).collect();
    assert_eq!(ids, vec!["m1", "m2", "m3"]);
}

// ---------------------------------------------------------------------------
// Stop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stop_leaves_the_active_conversation_and_halts_ingest() {
    let rest = Arc::new(ScriptedRest::new());
    rest.push_page(ConversationPage {
        conversations: vec![direct_snapshot("c1", 0)],
        next_cursor: None,
    });
    let (engine, _events, harness) = build_engine(rest);
    engine.start().await.expect("start");
    let conv = ConversationId::new("c1");

    engine.set_active_conversation(Some(conv.clone())).await;
    let _ = harness.drain_emitted().await;

    engine.stop().await;
    assert!(!engine.is_running());
    assert_eq!(
        harness.drain_emitted().await,
        vec![ClientEvent::LeaveConversation {
            conversation_id: conv.clone(),
        }]
    );

    // Events injected after stop are not processed.
    harness
        .inject(PushEvent::NewMessage(message("c1", "m1", 500)))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(engine.messages(&conv).is_empty());
}

#[tokio::test]
async fn stop_is_idempotent() {
    let rest = Arc::new(ScriptedRest::new());
    rest.push_page(ConversationPage {
        conversations: vec![direct_snapshot("c1", 0)],
        next_cursor: None,
    });
    let (engine, _events, _harness) = build_engine(rest);
    engine.start().await.expect("start");

    engine.stop().await;
    engine.stop().await;
    assert!(!engine.is_running());
}

// ---------------------------------------------------------------------------
// Connection state surface
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connection_state_is_observable() {
    let rest = Arc::new(ScriptedRest::new());
    rest.push_page(ConversationPage {
        conversations: vec![direct_snapshot("c1", 0)],
        next_cursor: None,
    });
    let (engine, mut events, harness) = build_engine(rest);
    engine.start().await.expect("start");

    harness.set_state(ConnectionState::Disconnected).await;

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Some(SyncEvent::ConnectionChanged(ConnectionState::Disconnected)) => break,
                Some(_) => {}
                None => panic!("event stream ended"),
            }
        }
    })
    .await
    .expect("connection change surfaced");

    let state = engine.connection_state();
    assert_eq!(*state.borrow(), ConnectionState::Disconnected);
}
