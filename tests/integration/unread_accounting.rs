//! Integration tests for unread accounting.
//!
//! The counter must never go negative, must equal the number of not-yet-read
//! non-self messages since the last mark-read, and must respect the
//! configured view-suppression policy.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use murmur_proto::conversation::{
    ConversationId, ConversationKind, ConversationPage, ConversationSnapshot, Participant,
    ParticipantRole, UserId,
};
use murmur_proto::event::PushEvent;
use murmur_proto::message::{MessageId, MessageSnapshot, Timestamp};
use murmur_sync::config::{SyncConfig, UnreadPolicy};
use murmur_sync::engine::{SyncEngine, SyncEvent};
use murmur_sync::ingest::Reconciler;
use murmur_sync::transport::loopback::{LoopbackPush, PushHarness, ScriptedRest, loopback_push};
use murmur_sync::typing::TypingTracker;

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

fn direct_snapshot(id: &str, updated_at: u64, unread: u32) -> ConversationSnapshot {
    ConversationSnapshot {
        id: ConversationId::new(id),
        kind: ConversationKind::Direct,
        participants: vec![participant("u-local", "Me"), participant("u-bob", "Bob")],
        display_name: None,
        photo_url: None,
        last_message: None,
        unread_count: unread,
        updated_at: Timestamp::from_millis(updated_at),
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

type TestEngine = Arc<SyncEngine<ScriptedRest, LoopbackPush>>;

async fn start_engine_with(
    config: SyncConfig,
    snapshots: Vec<ConversationSnapshot>,
) -> (TestEngine, mpsc::Receiver<SyncEvent>, PushHarness) {
    let rest = Arc::new(ScriptedRest::new());
    rest.push_page(ConversationPage {
        conversations: snapshots,
        next_cursor: None,
    });
    let (push, harness) = loopback_push(64);
    let (engine, events) = SyncEngine::new(rest, Arc::new(push), UserId::new("u-local"), config);
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

fn unread_of(engine: &TestEngine, id: &str) -> u32 {
    engine
        .conversations()
        .into_iter()
        .find(|c| c.id == ConversationId::new(id))
        .map_or(0, |c| c.unread_count)
}

// ---------------------------------------------------------------------------
// Counting invariants (reconciler level)
// ---------------------------------------------------------------------------

#[test]
fn unread_equals_unseen_non_self_messages_since_last_mark_read() {
    let mut rec = Reconciler::new(
        UserId::new("u-local"),
        UnreadPolicy::ActiveDetailOnly,
        TypingTracker::default(),
    );
    rec.load_conversation_page(vec![direct_snapshot("c1", 100, 0)]);
    let conv = ConversationId::new("c1");
    let now = Timestamp::from_millis(0);

    // Interleave self and remote messages with reads; track the expectation.
    let script: &[(&str, &str)] = &[
        ("msg", "u-bob"),
        ("msg", "u-local"),
        ("msg", "u-bob"),
        ("read", ""),
        ("msg", "u-bob"),
        ("msg", "u-bob"),
        ("read", ""),
        ("read", ""),
        ("msg", "u-local"),
    ];
    let mut expected: u32 = 0;
    for (i, (op, sender)) in script.iter().enumerate() {
        match *op {
            "msg" => {
                let at = 200 + u64::try_from(i).unwrap();
                rec.ingest(
                    PushEvent::NewMessage(message("c1", &format!("m{i}"), sender, at)),
                    now,
                );
                if *sender != "u-local" {
                    expected += 1;
                }
            }
            _ => {
                rec.ingest(
                    PushEvent::NotificationRead {
                        conversation_id: conv.clone(),
                        user_id: UserId::new("u-local"),
                    },
                    now,
                );
                expected = 0;
            }
        }
        assert_eq!(
            rec.conversations().unread_count(&conv),
            Some(expected),
            "after step {i}"
        );
    }
}

#[test]
fn redundant_reads_never_go_negative() {
    let mut rec = Reconciler::new(
        UserId::new("u-local"),
        UnreadPolicy::ActiveDetailOnly,
        TypingTracker::default(),
    );
    rec.load_conversation_page(vec![direct_snapshot("c1", 100, 1)]);
    let conv = ConversationId::new("c1");
    let read = PushEvent::NotificationRead {
        conversation_id: conv.clone(),
        user_id: UserId::new("u-local"),
    };

    for _ in 0..3 {
        rec.ingest(read.clone(), Timestamp::from_millis(0));
        assert_eq!(rec.conversations().unread_count(&conv), Some(0));
    }
}

// ---------------------------------------------------------------------------
// View suppression policies (engine level)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn active_view_suppresses_counting_but_preview_updates() {
    let (engine, _events, harness) =
        start_engine_with(SyncConfig::default(), vec![direct_snapshot("c1", 100, 0)]).await;
    let conv = ConversationId::new("c1");

    engine.set_active_conversation(Some(conv.clone())).await;
    harness
        .inject(PushEvent::NewMessage(message("c1", "m1", "u-bob", 500)))
        .await;

    wait_until(|| !engine.messages(&conv).is_empty()).await;
    let entry = engine
        .conversations()
        .into_iter()
        .find(|c| c.id == conv)
        .expect("conversation present");
    assert_eq!(entry.unread_count, 0, "active view must not count");
    let preview = entry.last_message.expect("preview updated");
    assert_eq!(preview.content, "msg m1");
    assert_eq!(preview.sender_name, "Bob");
}

#[tokio::test]
async fn background_conversation_still_counts() {
    let (engine, _events, harness) = start_engine_with(
        SyncConfig::default(),
        vec![direct_snapshot("c1", 100, 0), direct_snapshot("c2", 90, 0)],
    )
    .await;

    engine
        .set_active_conversation(Some(ConversationId::new("c1")))
        .await;
    harness
        .inject(PushEvent::NewMessage(message("c2", "m1", "u-bob", 500)))
        .await;

    wait_until(|| !engine.messages(&ConversationId::new("c2")).is_empty()).await;
    assert_eq!(unread_of(&engine, "c2"), 1);
    assert_eq!(unread_of(&engine, "c1"), 0);
}

#[tokio::test]
async fn visible_pane_counts_under_default_policy() {
    let (engine, _events, harness) =
        start_engine_with(SyncConfig::default(), vec![direct_snapshot("c1", 100, 0)]).await;

    engine.set_visible_conversations([ConversationId::new("c1")].into_iter().collect());
    harness
        .inject(PushEvent::NewMessage(message("c1", "m1", "u-bob", 500)))
        .await;

    wait_until(|| !engine.messages(&ConversationId::new("c1")).is_empty()).await;
    assert_eq!(unread_of(&engine, "c1"), 1);
}

#[tokio::test]
async fn visible_pane_suppresses_under_split_view_policy() {
    let config = SyncConfig {
        unread_policy: UnreadPolicy::AnyVisiblePane,
        ..SyncConfig::default()
    };
    let (engine, _events, harness) =
        start_engine_with(config, vec![direct_snapshot("c1", 100, 0)]).await;

    engine.set_visible_conversations([ConversationId::new("c1")].into_iter().collect());
    harness
        .inject(PushEvent::NewMessage(message("c1", "m1", "u-bob", 500)))
        .await;

    wait_until(|| !engine.messages(&ConversationId::new("c1")).is_empty()).await;
    assert_eq!(unread_of(&engine, "c1"), 0);
}

#[tokio::test]
async fn own_messages_never_count() {
    let (engine, _events, harness) =
        start_engine_with(SyncConfig::default(), vec![direct_snapshot("c1", 100, 0)]).await;

    harness
        .inject(PushEvent::NewMessage(message("c1", "m1", "u-local", 500)))
        .await;

    wait_until(|| !engine.messages(&ConversationId::new("c1")).is_empty()).await;
    assert_eq!(unread_of(&engine, "c1"), 0);
    assert_eq!(engine.total_unread(), 0);
}

#[tokio::test]
async fn total_unread_aggregates_across_conversations() {
    let (engine, _events, harness) = start_engine_with(
        SyncConfig::default(),
        vec![direct_snapshot("c1", 100, 0), direct_snapshot("c2", 90, 0)],
    )
    .await;

    harness
        .inject(PushEvent::NewMessage(message("c1", "m1", "u-bob", 500)))
        .await;
    harness
        .inject(PushEvent::NewMessage(message("c2", "m2", "u-bob", 600)))
        .await;
    harness
        .inject(PushEvent::NewMessage(message("c2", "m3", "u-bob", 700)))
        .await;

    wait_until(|| engine.total_unread() == 3).await;
}
