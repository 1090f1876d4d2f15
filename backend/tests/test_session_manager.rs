//! The `tokio`-backed session lifecycle: pause/resume/stop semantics,
//! manual single-stepping, and determinism of the event stream a
//! session publishes.

use systemic_risk_sim_core::config::{BankConfig, BankInit, SessionConfig};
use systemic_risk_sim_core::events::Event;
use systemic_risk_sim_core::session::{ControlCommand, SessionState};
use systemic_risk_sim_core::{BankId, Kernel, SessionManager};

fn config(seed: u64, total_steps: u64) -> SessionConfig {
    SessionConfig {
        seed,
        total_steps,
        use_game_theory: true,
        oracle_enabled: false,
        banks: vec![
            BankConfig {
                name: "Bank_0".to_string(),
                balance: BankInit::Explicit { cash: 100.0, investments: 0.0, loans_given: 0.0, borrowed: 0.0 },
                target_leverage: 3.0,
                target_liquidity: 0.3,
                target_market_exposure: 0.2,
                risk_appetite: 0.5,
            },
            BankConfig {
                name: "Bank_1".to_string(),
                balance: BankInit::Explicit { cash: 80.0, investments: 0.0, loans_given: 0.0, borrowed: 10.0 },
                target_leverage: 3.0,
                target_liquidity: 0.3,
                target_market_exposure: 0.2,
                risk_appetite: 0.5,
            },
        ],
        markets: vec![],
        connections: vec![],
    }
}

/// Pausing stops the auto-run loop; a manual `step` then advances
/// exactly one step, and the session's reported bank state after that
/// step matches an independently-run `Kernel` stepped the same number
/// of times from the same seed — pausing and manual-stepping can never
/// perturb the deterministic trajectory.
#[tokio::test]
async fn pause_then_manual_steps_track_an_independent_kernel_run() {
    // `total_steps` is generous on purpose: the `Pause` command races
    // the auto-run loop, and this test must not depend on winning that
    // race at any particular step to stay deterministic.
    let cfg = config(17, 500);
    let manager = SessionManager::new();
    let id = manager.init(cfg.clone()).unwrap();
    let mut rx = manager.subscribe(id, 256).unwrap();
    manager.start(id).unwrap();
    manager.control(id, ControlCommand::Pause).await.unwrap();

    let mut paused_at = None;
    let mut saw_step_start_after_pause = false;
    loop {
        match rx.recv().await.unwrap() {
            Event::Paused { step } => {
                paused_at = Some(step);
                break;
            }
            Event::StepStart { .. } => {} // may race ahead of the pause command
            _ => {}
        }
    }
    let paused_at = paused_at.unwrap();
    assert_eq!(manager.status(id).unwrap().state, SessionState::Paused);

    // Three manual steps while paused; the auto-run loop must stay idle.
    let mut last_bank_states = Vec::new();
    for expected_step in (paused_at + 1)..=(paused_at + 3) {
        let events = manager.step(id).await.unwrap();
        assert!(matches!(events.first(), Some(Event::StepStart { step }) if *step == expected_step));
        match events.last() {
            Some(Event::StepEnd { step, bank_states, .. }) => {
                assert_eq!(*step, expected_step);
                last_bank_states = bank_states.clone();
            }
            other => panic!("expected step_end, got {other:?}"),
        }
    }

    // No event belonging to a later step can have leaked through the
    // control/step channels while the worker sat paused.
    while let Ok(event) = rx.try_recv() {
        if let Some(step) = event.step() {
            assert!(step <= paused_at + 3, "auto-run loop advanced while paused");
        }
        if matches!(event, Event::StepStart { .. }) {
            saw_step_start_after_pause = true;
        }
    }
    // Any step_start observed here must belong to one of our own manual
    // steps (already checked above) rather than a phantom auto-advance.
    let _ = saw_step_start_after_pause;

    manager.control(id, ControlCommand::Resume).await.unwrap();

    let mut kernel = Kernel::new(&cfg).unwrap();
    for _ in 0..(paused_at + 3) {
        kernel.step().unwrap();
    }
    for snapshot in &last_bank_states {
        let bank = kernel.bank(snapshot.bank_id).unwrap();
        assert!((bank.balance_sheet.equity() - snapshot.equity).abs() < 1e-9);
        assert_eq!(bank.is_defaulted, snapshot.is_defaulted);
    }
}

/// Stopping a session is terminal and idempotent: a second `stop`
/// command is a no-op at the session-manager layer (the worker has
/// already exited), and exactly one `stopped` event reaches the stream.
#[tokio::test]
async fn stop_is_terminal_and_produces_exactly_one_stopped_event() {
    let manager = SessionManager::new();
    let id = manager.init(config(4, 500)).unwrap();
    let mut rx = manager.subscribe(id, 256).unwrap();
    manager.start(id).unwrap();

    manager.control(id, ControlCommand::Stop).await.unwrap();

    let mut stopped_count = 0;
    while let Some(event) = rx.recv().await {
        if matches!(event, Event::Stopped { .. }) {
            stopped_count += 1;
        }
    }
    assert_eq!(stopped_count, 1);
    assert_eq!(manager.status(id).unwrap().state, SessionState::Stopped);

    // The worker task has already exited and dropped its control
    // receiver; a second Stop fails because the channel is closed, not
    // because of any explicit double-stop guard.
    assert!(manager.control(id, ControlCommand::Stop).await.is_err());
}

/// P10 at the session level: two sessions built from byte-identical
/// configs and run to completion with the oracle disabled produce
/// byte-identical serialized event streams.
#[tokio::test]
async fn identical_config_produces_identical_session_event_streams() {
    async fn run_to_completion(cfg: SessionConfig) -> Vec<String> {
        let manager = SessionManager::new();
        let id = manager.init(cfg).unwrap();
        let mut rx = manager.subscribe(id, 1024).unwrap();
        manager.start(id).unwrap();
        let mut lines = Vec::new();
        while let Some(event) = rx.recv().await {
            lines.push(event.to_line().unwrap());
            if matches!(event, Event::Complete { .. }) {
                break;
            }
        }
        lines
    }

    let cfg = config(99, 8);
    let lines_a = run_to_completion(cfg.clone()).await;
    let lines_b = run_to_completion(cfg).await;
    assert_eq!(lines_a, lines_b);
    assert!(!lines_a.is_empty());
}

/// `delete_bank` forces an immediate default and is visible both as its
/// own event and in the next `step_end` snapshot.
#[tokio::test]
async fn delete_bank_forces_default_and_is_reflected_in_the_next_step_end() {
    let manager = SessionManager::new();
    let id = manager.init(config(2, 500)).unwrap();
    let mut rx = manager.subscribe(id, 256).unwrap();
    manager.start(id).unwrap();

    manager.control(id, ControlCommand::DeleteBank(BankId::new(1))).await.unwrap();

    let mut saw_bank_deleted = false;
    let mut saw_default_flag_in_step_end = false;
    while let Some(event) = rx.recv().await {
        match event {
            Event::BankDeleted { bank_id } if bank_id == BankId::new(1) => saw_bank_deleted = true,
            Event::StepEnd { bank_states, .. } => {
                if bank_states.iter().any(|b| b.bank_id == BankId::new(1) && b.is_defaulted) {
                    saw_default_flag_in_step_end = true;
                }
            }
            Event::Complete { .. } => break,
            _ => {}
        }
    }
    assert!(saw_bank_deleted);
    assert!(saw_default_flag_in_step_end);
}
