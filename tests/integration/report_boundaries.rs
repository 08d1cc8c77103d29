use crate::helpers::{at, day, harness, harness_in, reports};
use habitual::gateway::memory::SentMessage;
use habitual::registry::SubjectId;
use habitual::scheduler::{DispatchLedger, Dispatcher};

fn documents(sent: &[SentMessage]) -> Vec<(String, String)> {
    sent.iter()
        .filter_map(|m| match m {
            SentMessage::Document { path, caption, .. } => Some((
                path.file_name()?.to_string_lossy().into_owned(),
                caption.clone(),
            )),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn month_end_sends_exactly_one_report_across_restarts() {
    let h = harness(&["42"]);
    let s = SubjectId::from("42");
    let store = &h.ctx.store;
    store.write(&s, day(2026, 9, 30), "Body", 1).await.unwrap();
    store.write(&s, day(2026, 10, 1), "Body", 1).await.unwrap();
    store.write(&s, day(2026, 10, 2), "Body", 0).await.unwrap();
    store.write(&s, day(2026, 11, 1), "Body", 1).await.unwrap();

    let ledger_path = h.dir.path().join("dispatch.jsonl");
    let dispatcher = Dispatcher::new(
        h.ctx.clone(),
        reports(),
        DispatchLedger::open(&ledger_path).await.unwrap(),
    );

    // The day before the boundary at the same minute is quiet.
    assert_eq!(dispatcher.tick_at(at("2026-10-30 23:59")).await.reports_sent, 0);
    let tick = dispatcher.tick_at(at("2026-10-31 23:59")).await;
    assert_eq!(tick.reports_sent, 1);
    assert!(dispatcher.tick_at(at("2026-10-31 23:59")).await.skipped);

    let docs = documents(&h.gateway.sent());
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].0, "report_42_2026-10.json");
    assert!(docs[0].1.starts_with("Monthly report 2026-10\nBody: 5 (2/31 days)"));

    let report_file = h.dir.path().join("reports").join("report_42_2026-10.json");
    let doc: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&report_file).unwrap()).unwrap();
    assert_eq!(doc["first_day"], "2026-10-01");
    assert_eq!(doc["last_day"], "2026-10-31");
    store.shutdown().await;

    // A restarted process re-reads the ledger and does not resend.
    let restarted = harness_in(h.dir, &["42"]);
    let dispatcher = Dispatcher::new(
        restarted.ctx.clone(),
        reports(),
        DispatchLedger::open(&ledger_path).await.unwrap(),
    );
    let tick = dispatcher.tick_at(at("2026-10-31 23:59")).await;
    assert_eq!(tick.reports_sent, 0);
    assert_eq!(tick.reports_deduped, 1);
    assert!(documents(&restarted.gateway.sent()).is_empty());
}

#[tokio::test]
async fn saturday_night_sends_the_week_ending_today() {
    let h = harness(&["42", "43"]);
    let s = SubjectId::from("42");
    h.ctx.store.write(&s, day(2026, 10, 17), "Mind", 1).await.unwrap();
    h.ctx.store.write(&s, day(2026, 10, 18), "Mind", 1).await.unwrap();

    let dispatcher = Dispatcher::new(h.ctx.clone(), reports(), DispatchLedger::in_memory());
    // The 21:05 Mind prompt of the last day is answered before the report.
    assert_eq!(dispatcher.tick_at(at("2026-10-24 21:05")).await.prompts_sent, 2);
    h.ctx.store.write(&s, day(2026, 10, 24), "Mind", 1).await.unwrap();
    let tick = dispatcher.tick_at(at("2026-10-24 23:59")).await;
    assert_eq!(tick.reports_sent, 2);
    assert_eq!(tick.prompts_sent, 0);

    let docs = documents(&h.gateway.sent_to(&s));
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].0, "report_42_week-2026-10-18.json");
    let caption = &docs[0].1;
    assert!(caption.starts_with("Weekly report 2026-10-18 to 2026-10-24"));
    assert!(caption.contains("Mind: 10 (2/7 days)"));
    h.ctx.tracker.shutdown().await;
    h.ctx.store.shutdown().await;
}

#[tokio::test]
async fn failed_report_is_retried_on_a_later_run() {
    let h = harness(&["42"]);
    let s = SubjectId::from("42");
    h.gateway.fail_for(&s);
    let ledger_path = h.dir.path().join("dispatch.jsonl");
    let dispatcher = Dispatcher::new(
        h.ctx.clone(),
        reports(),
        DispatchLedger::open(&ledger_path).await.unwrap(),
    );
    let tick = dispatcher.tick_at(at("2026-10-31 23:59")).await;
    assert_eq!(tick.reports_failed, 1);
    h.ctx.store.shutdown().await;

    let restarted = harness_in(h.dir, &["42"]);
    let dispatcher = Dispatcher::new(
        restarted.ctx.clone(),
        reports(),
        DispatchLedger::open(&ledger_path).await.unwrap(),
    );
    let tick = dispatcher.tick_at(at("2026-10-31 23:59")).await;
    assert_eq!(tick.reports_sent, 1);
    assert_eq!(documents(&restarted.gateway.sent()).len(), 1);
}
