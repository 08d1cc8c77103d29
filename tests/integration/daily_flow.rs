use crate::helpers::{at, day, harness, harness_with, reports};
use habitual::gateway::InboundEvent;
use habitual::gateway::memory::SentMessage;
use habitual::inbound::{InboundHandler, InboundOutcome};
use habitual::pending::PendingEvent;
use habitual::registry::SubjectId;
use habitual::schedule::{ScheduleEntry, TimeOfDay};
use habitual::scheduler::{DispatchLedger, Dispatcher};
use habitual::store::FillOutcome;
use std::time::Duration;

fn yes(subject: &SubjectId, area: &str) -> InboundEvent {
    InboundEvent::Answer {
        subject: subject.clone(),
        area: area.to_owned(),
        value: 1,
    }
}

#[tokio::test(start_paused = true)]
async fn unanswered_morning_is_backfilled_and_timed_out_to_zero() {
    let mut h = harness(&["42"]);
    let s = SubjectId::from("42");
    let dispatcher = Dispatcher::new(h.ctx.clone(), reports(), DispatchLedger::in_memory());

    // Process came up after 07:00, so the Body prompt was never sent.
    let tick = dispatcher.tick_at(at("2026-10-19 08:50")).await;
    assert_eq!(tick.prompts_sent, 1);
    assert_eq!(tick.backfilled, 1);
    assert_eq!(
        h.ctx.store.read(&s, day(2026, 10, 19), "Body").await.unwrap(),
        Some(0)
    );

    let event = h
        .next_event(|e| matches!(e, PendingEvent::TimedOut { .. }))
        .await;
    assert_eq!(
        event,
        PendingEvent::TimedOut {
            subject: s.clone(),
            area: "Mind".into(),
            outcome: FillOutcome::Filled,
        }
    );
    assert_eq!(
        h.ctx.store.read(&s, day(2026, 10, 19), "Mind").await.unwrap(),
        Some(0)
    );
    assert!(h.ctx.tracker.is_empty());

    let sent = h.gateway.sent_to(&s);
    assert!(matches!(&sent[0], SentMessage::Prompt { prompt, .. } if prompt.area == "Mind"));
    assert!(matches!(&sent[1], SentMessage::Text { text, .. } if text.contains("No answer for Mind")));
    h.ctx.store.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn answer_before_deadline_wins_over_the_timer() {
    let mut h = harness(&["42"]);
    let s = SubjectId::from("42");
    let dispatcher = Dispatcher::new(h.ctx.clone(), reports(), DispatchLedger::in_memory());
    let handler = InboundHandler::new(h.ctx.clone());

    dispatcher.tick_at(at("2026-10-19 08:50")).await;
    tokio::time::sleep(Duration::from_secs(600)).await;
    let outcome = handler.handle_at(yes(&s, "Mind"), at("2026-10-19 09:00")).await;
    assert_eq!(
        outcome,
        InboundOutcome::Recorded {
            date: day(2026, 10, 19),
            resolved_pending: true,
        }
    );

    h.next_event(|e| matches!(e, PendingEvent::Answered { .. }))
        .await;
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert!(h.events.try_recv().is_err(), "timer fired after an answer");
    assert_eq!(
        h.ctx.store.read(&s, day(2026, 10, 19), "Mind").await.unwrap(),
        Some(1)
    );
    assert!(
        h.gateway
            .sent_to(&s)
            .iter()
            .all(|m| !matches!(m, SentMessage::Text { text, .. } if text.starts_with("No answer")))
    );
    h.ctx.tracker.shutdown().await;
    h.ctx.store.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn answer_racing_the_deadline_always_ends_recorded() {
    let h = harness(&["42"]);
    let s = SubjectId::from("42");
    let handler = InboundHandler::new(h.ctx.clone());
    let armed = at("2026-10-19 21:05");
    let grace = Duration::from_secs(60);
    h.ctx
        .tracker
        .arm(&s, "Mind", armed.date(), armed, grace);

    tokio::time::sleep(grace - Duration::from_millis(1)).await;
    let (outcome, ()) = tokio::join!(
        handler.handle_at(yes(&s, "Mind"), at("2026-10-19 21:06")),
        tokio::time::sleep(Duration::from_millis(5)),
    );
    assert!(matches!(outcome, InboundOutcome::Recorded { .. }));

    // Whichever side committed first, the real answer is the one kept.
    tokio::time::sleep(Duration::from_secs(5)).await;
    let snapshot = h.ctx.store.snapshot(&s).await.unwrap();
    assert_eq!(snapshot.get(day(2026, 10, 19), "Mind"), Some(1));
    assert!(h.ctx.tracker.is_empty());
    h.ctx.store.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn late_answer_replaces_an_auto_filled_zero() {
    let mut h = harness(&["42"]);
    let s = SubjectId::from("42");
    let handler = InboundHandler::new(h.ctx.clone());
    let armed = at("2026-10-19 21:15");
    h.ctx
        .tracker
        .arm(&s, "Leisure", armed.date(), armed, Duration::from_secs(1800));
    h.next_event(|e| matches!(e, PendingEvent::TimedOut { .. }))
        .await;
    assert_eq!(
        h.ctx.store.read(&s, armed.date(), "Leisure").await.unwrap(),
        Some(0)
    );

    let outcome = handler.handle_at(yes(&s, "Leisure"), at("2026-10-19 22:30")).await;
    assert_eq!(
        outcome,
        InboundOutcome::Recorded {
            date: armed.date(),
            resolved_pending: false,
        }
    );
    assert_eq!(
        h.ctx.store.read(&s, armed.date(), "Leisure").await.unwrap(),
        Some(1)
    );
    h.ctx.store.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn evening_block_backfills_every_earlier_area_once() {
    let h = harness(&["7"]);
    let s = SubjectId::from("7");
    let dispatcher = Dispatcher::new(h.ctx.clone(), reports(), DispatchLedger::in_memory());
    let handler = InboundHandler::new(h.ctx.clone());
    handler
        .handle_at(yes(&s, "Work/Resources"), at("2026-10-19 19:02"))
        .await;

    let tick = dispatcher.tick_at(at("2026-10-19 21:15")).await;
    assert_eq!(tick.prompts_sent, 1);
    let d = day(2026, 10, 19);
    assert_eq!(h.ctx.store.read(&s, d, "Work/Resources").await.unwrap(), Some(1));
    for area in ["Body", "Mind", "Spirit", "Soul", "Relationships"] {
        assert_eq!(
            h.ctx.store.read(&s, d, area).await.unwrap(),
            Some(0),
            "{area} should be backfilled"
        );
    }
    assert!(h.ctx.tracker.pending(&s, "Leisure").is_some());
    h.ctx.tracker.shutdown().await;
    h.ctx.store.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn scale_answer_before_its_deadline_is_kept() {
    let entries = vec![
        ScheduleEntry::binary(
            TimeOfDay::from_hm(10, 0).unwrap(),
            "Body",
            "Did you move today?",
            "",
        ),
        ScheduleEntry::scale(
            TimeOfDay::from_hm(10, 5).unwrap(),
            "Mind",
            "How focused were you?",
        ),
    ];
    let mut h = harness_with(entries, &["42"]);
    let s = SubjectId::from("42");
    let dispatcher = Dispatcher::new(h.ctx.clone(), reports(), DispatchLedger::in_memory());
    let handler = InboundHandler::new(h.ctx.clone());

    dispatcher.tick_at(at("2026-10-19 10:05")).await;
    let answer = InboundEvent::Answer {
        subject: s.clone(),
        area: "Mind".into(),
        value: 7,
    };
    let outcome = handler.handle_at(answer, at("2026-10-19 10:06")).await;
    assert!(matches!(
        outcome,
        InboundOutcome::Recorded {
            resolved_pending: true,
            ..
        }
    ));
    assert_eq!(
        h.next_event(|e| matches!(e, PendingEvent::Answered { .. } | PendingEvent::TimedOut { .. }))
            .await,
        PendingEvent::Answered {
            subject: s.clone(),
            area: "Mind".into(),
        }
    );

    tokio::time::sleep(Duration::from_secs(7200)).await;
    let d = day(2026, 10, 19);
    assert_eq!(h.ctx.store.read(&s, d, "Body").await.unwrap(), Some(0));
    assert_eq!(h.ctx.store.read(&s, d, "Mind").await.unwrap(), Some(7));
    assert_eq!(
        h.ctx.store.aggregate(&s, 2026, 10, "Mind").await.unwrap(),
        Some(70)
    );
    assert!(h.gateway.sent_to(&s).iter().any(
        |m| matches!(m, SentMessage::Text { text, .. } if text == "Score recorded for Mind: 7")
    ));
    h.ctx.store.shutdown().await;
}
