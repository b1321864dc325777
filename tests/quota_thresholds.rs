// tests/quota_thresholds.rs
//
// Threshold notifications must be edge-triggered: one event per crossing,
// silence while usage stays above a level.

use video_scout::quota::{AdmissionController, OperationKind, QuotaEvent, ThresholdLevel};

fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<QuotaEvent>) -> Vec<QuotaEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

#[tokio::test]
async fn warning_fires_exactly_once_per_crossing() {
    let ctrl = AdmissionController::ephemeral(1_000);
    let mut rx = ctrl.subscribe();

    // 79% — below the default 80% warning line.
    assert!(ctrl.try_consume(OperationKind::VideoDetails, 790));
    assert!(drain(&mut rx).is_empty());

    // Crossing fires one Warning.
    assert!(ctrl.try_consume(OperationKind::VideoDetails, 20));
    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        QuotaEvent::ThresholdReached {
            level: ThresholdLevel::Warning,
            ..
        }
    ));

    // Still above warning: repeated consumption must stay silent.
    for _ in 0..5 {
        assert!(ctrl.try_consume(OperationKind::VideoDetails, 10));
    }
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn critical_and_exhausted_fire_on_their_own_crossings() {
    let ctrl = AdmissionController::ephemeral(1_000);
    let mut rx = ctrl.subscribe();

    assert!(ctrl.try_consume(OperationKind::VideoDetails, 800)); // warning
    assert!(ctrl.try_consume(OperationKind::VideoDetails, 150)); // critical
    let events = drain(&mut rx);
    assert_eq!(events.len(), 2);
    assert!(matches!(
        events[1],
        QuotaEvent::ThresholdReached {
            level: ThresholdLevel::Critical,
            ..
        }
    ));

    assert!(ctrl.try_consume(OperationKind::VideoDetails, 50)); // 100%
    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    match &events[0] {
        QuotaEvent::Exhausted {
            snapshot,
            next_reset_at,
        } => {
            assert_eq!(snapshot.used, 1_000);
            assert!(*next_reset_at > chrono::Utc::now());
        }
        other => panic!("expected Exhausted, got {other:?}"),
    }

    // Fully exhausted: further denied attempts fire nothing new.
    assert!(!ctrl.try_consume(OperationKind::VideoDetails, 1));
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn one_jump_can_cross_several_levels_at_once() {
    let ctrl = AdmissionController::ephemeral(1_000);
    let mut rx = ctrl.subscribe();

    // 0 → 100% in one consume: warning, critical, exhausted — one each.
    assert!(ctrl.try_consume(OperationKind::SearchVideos, 10));
    let events = drain(&mut rx);
    assert_eq!(events.len(), 3);
    assert!(matches!(
        events[0],
        QuotaEvent::ThresholdReached {
            level: ThresholdLevel::Warning,
            ..
        }
    ));
    assert!(matches!(
        events[1],
        QuotaEvent::ThresholdReached {
            level: ThresholdLevel::Critical,
            ..
        }
    ));
    assert!(matches!(events[2], QuotaEvent::Exhausted { .. }));
}

#[tokio::test]
async fn reservations_alone_do_not_fire_usage_thresholds() {
    let ctrl = AdmissionController::ephemeral(1_000);
    let mut rx = ctrl.subscribe();

    let mut plan = std::collections::BTreeMap::new();
    plan.insert(OperationKind::VideoDetails, 900u64);
    let grant = ctrl.reserve(&plan).granted().unwrap();
    // Holds are not consumption; thresholds watch confirmed usage only.
    assert!(drain(&mut rx).is_empty());

    assert!(ctrl.confirm(&grant.token));
    let events = drain(&mut rx);
    assert_eq!(events.len(), 1, "confirm crossed the warning line");
}
