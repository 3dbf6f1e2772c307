//! Integration tests for optimistic actions.
//!
//! Sends appear instantly as pending and collapse to one confirmed entry,
//! falling back to REST while the push channel is down and to a visible
//! `Failed` state when both transports are out. Likes, shares and mark-read
//! roll back exactly on failure, and duplicate in-flight actions are
//! suppressed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use murmur_proto::conversation::{
    ConversationId, ConversationKind, ConversationPage, ConversationSnapshot, Participant,
    ParticipantRole, UserId,
};
use murmur_proto::event::{ClientEvent, PushEvent};
use murmur_proto::message::{MessageDraft, MessageId, MessageSnapshot, Timestamp};
use murmur_sync::actions::{ActionError, ActionKind};
use murmur_sync::config::SyncConfig;
use murmur_sync::engine::{SyncEngine, SyncEvent};
use murmur_sync::store::MessageStatus;
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

fn message(conv: &str, id: &str, sender: &str, at: u64) -> MessageSnapshot {
    MessageSnapshot {
        id: MessageId::new(id),
        conversation_id: ConversationId::new(conv),
        sender_id: UserId::new(sender),
        content: Some(format!("msg {id}")),
        media: None,
        created_at: Timestamp::from_millis(at),
        client_tag: None,
    }
}

fn draft(text: &str) -> MessageDraft {
    MessageDraft {
        content: Some(text.into()),
        media: None,
    }
}

type TestEngine = Arc<SyncEngine<ScriptedRest, LoopbackPush>>;

async fn start_engine(
    rest: Arc<ScriptedRest>,
    unread: u32,
) -> (TestEngine, mpsc::Receiver<SyncEvent>, PushHarness) {
    rest.push_page(ConversationPage {
        conversations: vec![direct_snapshot("c1", unread)],
        next_cursor: None,
    });
    let (push, harness) = loopback_push(64);
    let (engine, events) = SyncEngine::new(
        rest,
        Arc::new(push),
        UserId::new("u-local"),
        SyncConfig::default(),
    );
    engine.start().await.expect("engine start");
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

async fn wait_for(
    events: &mut mpsc::Receiver<SyncEvent>,
    pred: impl Fn(&SyncEvent) -> bool,
) -> SyncEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => {}
                None => panic!("event stream ended"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Seeds a confirmed message from Bob via the push channel.
async fn seed_message(engine: &TestEngine, harness: &PushHarness, id: &str) -> MessageId {
    harness
        .inject(PushEvent::NewMessage(message("c1", id, "u-bob", 500)))
        .await;
    let conv = ConversationId::new("c1");
    wait_until(|| engine.messages(&conv).iter().any(|m| m.id.as_str() == id)).await;
    MessageId::new(id)
}

// ---------------------------------------------------------------------------
// Send pipeline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_appears_pending_then_confirms_via_echo() {
    let rest = Arc::new(ScriptedRest::new());
    let (engine, _events, harness) = start_engine(rest, 0).await;
    let conv = ConversationId::new("c1");

    // The message appears instantly under a provisional id.
    let provisional = engine
        .send_message(conv.clone(), draft("hello"))
        .await
        .expect("send");
    let pending = engine.messages(&conv);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, provisional);
    assert_eq!(pending[0].status, MessageStatus::Pending);

    // The emission carries a correlation token the server echoes back.
    let emitted = harness.next_emitted().await.expect("send emission");
    let ClientEvent::SendMessage { client_tag, .. } = emitted else {
        panic!("expected SendMessage emission, got {emitted:?}");
    };

    let mut echo = message("c1", "srv-42", "u-local", 600);
    echo.content = Some("hello".into());
    echo.client_tag = Some(client_tag);
    harness.inject(PushEvent::NewMessage(echo)).await;

    // One entry, server id, confirmed — never two.
    wait_until(|| {
        engine
            .messages(&conv)
            .iter()
            .any(|m| m.id.as_str() == "srv-42" && m.status == MessageStatus::Confirmed)
    })
    .await;
    assert_eq!(engine.messages(&conv).len(), 1);
}

#[tokio::test]
async fn offline_send_falls_back_to_rest() {
    let rest = Arc::new(ScriptedRest::new());
    let (engine, _events, harness) = start_engine(Arc::clone(&rest), 0).await;
    let conv = ConversationId::new("c1");

    harness.set_state(ConnectionState::Disconnected).await;

    engine
        .send_message(conv.clone(), draft("hello"))
        .await
        .expect("send via fallback");

    let thread = engine.messages(&conv);
    assert_eq!(thread.len(), 1);
    assert_eq!(thread[0].status, MessageStatus::Confirmed);
    assert!(thread[0].id.as_str().starts_with("srv-"));
    assert_eq!(rest.sent_messages().len(), 1);
    // Nothing went over the push channel.
    assert!(harness.try_next_emitted().await.is_none());
}

#[tokio::test]
async fn failed_send_stays_visible_and_retry_succeeds() {
    let rest = Arc::new(ScriptedRest::new());
    let (engine, _events, harness) = start_engine(Arc::clone(&rest), 0).await;
    let conv = ConversationId::new("c1");

    harness.set_state(ConnectionState::Disconnected).await;
    rest.fail_next(RestError::Unavailable("gateway down".into()));

    let result = engine.send_message(conv.clone(), draft("hold on to this")).await;
    assert!(matches!(result, Err(ActionError::Rest(_))));

    // The user's content is still there, marked failed, not dropped.
    let thread = engine.messages(&conv);
    assert_eq!(thread.len(), 1);
    assert_eq!(thread[0].status, MessageStatus::Failed);
    assert_eq!(thread[0].content.as_deref(), Some("hold on to this"));
    let failed_id = thread[0].id.clone();

    // Retry once the backend recovers, reusing the correlation token.
    engine
        .retry_send(conv.clone(), failed_id)
        .await
        .expect("retry");
    let thread = engine.messages(&conv);
    assert_eq!(thread.len(), 1);
    assert_eq!(thread[0].status, MessageStatus::Confirmed);

    let sent = rest.sent_messages();
    assert_eq!(sent.len(), 2);
    let tags: Vec<_> = sent
        .iter()
        .map(|event| match event {
            ClientEvent::SendMessage { client_tag, .. } => client_tag.clone(),
            other => panic!("unexpected emission {other:?}"),
        })
        .collect();
    assert_eq!(tags[0], tags[1], "retry must reuse the original token");
}

#[tokio::test]
async fn discarding_a_failed_send_removes_it() {
    let rest = Arc::new(ScriptedRest::new());
    let (engine, _events, harness) = start_engine(Arc::clone(&rest), 0).await;
    let conv = ConversationId::new("c1");

    harness.set_state(ConnectionState::Disconnected).await;
    rest.fail_next(RestError::Unavailable("gateway down".into()));
    let _ = engine.send_message(conv.clone(), draft("give up")).await;

    let failed_id = engine.messages(&conv)[0].id.clone();
    assert!(engine.discard_failed(&conv, &failed_id));
    assert!(engine.messages(&conv).is_empty());
}

#[tokio::test]
async fn empty_send_is_rejected_before_any_store_mutation() {
    let rest = Arc::new(ScriptedRest::new());
    let (engine, _events, harness) = start_engine(rest, 0).await;
    let conv = ConversationId::new("c1");

    let result = engine
        .send_message(
            conv.clone(),
            MessageDraft {
                content: Some("   ".into()),
                media: None,
            },
        )
        .await;
    assert!(matches!(result, Err(ActionError::Validation(_))));
    assert!(engine.messages(&conv).is_empty());
    assert!(harness.try_next_emitted().await.is_none());
}

// ---------------------------------------------------------------------------
// Likes and shares
// ---------------------------------------------------------------------------

#[tokio::test]
async fn successful_like_persists_optimistic_state() {
    let rest = Arc::new(ScriptedRest::new());
    let (engine, _events, harness) = start_engine(Arc::clone(&rest), 0).await;
    let conv = ConversationId::new("c1");
    let id = seed_message(&engine, &harness, "m1").await;

    let liked = engine.toggle_like(conv.clone(), id.clone()).await.expect("like");
    assert!(liked);

    let msg = engine
        .messages(&conv)
        .into_iter()
        .find(|m| m.id == id)
        .expect("message present");
    assert_eq!(msg.likes_count, 1);
    assert!(msg.is_liked);
    assert_eq!(rest.like_calls(), vec![(conv, id, true)]);
}

#[tokio::test]
async fn failed_like_restores_prior_state_exactly() {
    let rest = Arc::new(ScriptedRest::new());
    let (engine, mut events, harness) = start_engine(Arc::clone(&rest), 0).await;
    let conv = ConversationId::new("c1");
    let id = seed_message(&engine, &harness, "m1").await;

    rest.fail_next(RestError::Unavailable("backend down".into()));
    let result = engine.toggle_like(conv.clone(), id.clone()).await;
    assert!(matches!(result, Err(ActionError::Rest(_))));

    let msg = engine
        .messages(&conv)
        .into_iter()
        .find(|m| m.id == id)
        .expect("message present");
    assert_eq!(msg.likes_count, 0);
    assert!(!msg.is_liked);

    // The failure surfaces as toast material.
    let failed = wait_for(&mut events, |e| {
        matches!(e, SyncEvent::ActionFailed { kind: ActionKind::Like, .. })
    })
    .await;
    let SyncEvent::ActionFailed { entity, .. } = failed else {
        unreachable!();
    };
    assert_eq!(entity, "m1");
}

#[tokio::test]
async fn double_tap_like_is_suppressed() {
    let rest = Arc::new(ScriptedRest::new());
    let (engine, _events, harness) = start_engine(Arc::clone(&rest), 0).await;
    let conv = ConversationId::new("c1");
    let id = seed_message(&engine, &harness, "m1").await;

    rest.set_delay(Duration::from_millis(100));

    let first = {
        let engine = Arc::clone(&engine);
        let conv = conv.clone();
        let id = id.clone();
        tokio::spawn(async move { engine.toggle_like(conv, id).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let second = engine.toggle_like(conv.clone(), id.clone()).await;
    assert!(matches!(second, Err(ActionError::InFlight)));

    first.await.expect("join").expect("first like succeeds");
    assert_eq!(rest.like_calls().len(), 1);
    let msg = engine
        .messages(&conv)
        .into_iter()
        .find(|m| m.id == id)
        .expect("message present");
    assert_eq!(msg.likes_count, 1);
}

#[tokio::test]
async fn failed_share_restores_counter() {
    let rest = Arc::new(ScriptedRest::new());
    let (engine, _events, harness) = start_engine(Arc::clone(&rest), 0).await;
    let conv = ConversationId::new("c1");
    let id = seed_message(&engine, &harness, "m1").await;

    rest.fail_next(RestError::Unavailable("backend down".into()));
    let result = engine.share(conv.clone(), id.clone()).await;
    assert!(matches!(result, Err(ActionError::Rest(_))));

    let msg = engine
        .messages(&conv)
        .into_iter()
        .find(|m| m.id == id)
        .expect("message present");
    assert_eq!(msg.share_count, 0);
}

// ---------------------------------------------------------------------------
// Mark-read
// ---------------------------------------------------------------------------

fn unread_of(engine: &TestEngine, id: &str) -> u32 {
    engine
        .conversations()
        .into_iter()
        .find(|c| c.id == ConversationId::new(id))
        .map_or(0, |c| c.unread_count)
}

#[tokio::test]
async fn mark_read_zeroes_immediately_and_calls_rest() {
    let rest = Arc::new(ScriptedRest::new());
    let (engine, _events, _harness) = start_engine(Arc::clone(&rest), 3).await;
    let conv = ConversationId::new("c1");

    engine.mark_read(conv.clone()).await.expect("mark read");
    assert_eq!(unread_of(&engine, "c1"), 0);
    assert_eq!(rest.mark_read_calls(), vec![conv]);
}

#[tokio::test]
async fn mark_read_failure_rolls_back_counter() {
    let rest = Arc::new(ScriptedRest::new());
    let (engine, _events, _harness) = start_engine(Arc::clone(&rest), 3).await;
    let conv = ConversationId::new("c1");

    rest.fail_next(RestError::Unavailable("backend down".into()));
    let result = engine.mark_read(conv).await;
    assert!(matches!(result, Err(ActionError::Rest(_))));
    assert_eq!(unread_of(&engine, "c1"), 3);
}

#[tokio::test]
async fn mark_read_conflict_removes_stale_conversation() {
    let rest = Arc::new(ScriptedRest::new());
    let (engine, _events, _harness) = start_engine(Arc::clone(&rest), 3).await;
    let conv = ConversationId::new("c1");

    rest.fail_next(RestError::Conflict("no longer a participant".into()));
    engine
        .mark_read(conv.clone())
        .await
        .expect("conflict resolves by removal");
    assert!(engine.conversations().is_empty());
    assert!(engine.messages(&conv).is_empty());
}

#[tokio::test]
async fn mark_read_rollback_yields_to_newer_messages() {
    let rest = Arc::new(ScriptedRest::new());
    let (engine, _events, harness) = start_engine(Arc::clone(&rest), 3).await;
    let conv = ConversationId::new("c1");

    rest.set_delay(Duration::from_millis(100));
    rest.fail_next(RestError::Unavailable("backend down".into()));

    let call = {
        let engine = Arc::clone(&engine);
        let conv = conv.clone();
        tokio::spawn(async move { engine.mark_read(conv).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // A message lands while the mark-read is in flight.
    harness
        .inject(PushEvent::NewMessage(message("c1", "m9", "u-bob", 900)))
        .await;
    wait_until(|| !engine.messages(&conv).is_empty()).await;

    let result = call.await.expect("join");
    assert!(matches!(result, Err(ActionError::Rest(_))));
    // The stale rollback must not clobber the newer count.
    assert_eq!(unread_of(&engine, "c1"), 1);
}

#[tokio::test]
async fn duplicate_mark_read_requests_are_suppressed() {
    let rest = Arc::new(ScriptedRest::new());
    let (engine, _events, _harness) = start_engine(Arc::clone(&rest), 3).await;
    let conv = ConversationId::new("c1");

    rest.set_delay(Duration::from_millis(100));

    let first = {
        let engine = Arc::clone(&engine);
        let conv = conv.clone();
        tokio::spawn(async move { engine.mark_read(conv).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let second = engine.mark_read(conv).await;
    assert!(matches!(second, Err(ActionError::InFlight)));

    first.await.expect("join").expect("first mark-read succeeds");
    assert_eq!(rest.mark_read_calls().len(), 1);
}
