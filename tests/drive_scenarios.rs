//! End-to-end drive scenarios against the simulated drive

use std::time::Duration;

use tokio_test::{assert_err, assert_ok};
use vfd_modbus::catalog::names;
use vfd_modbus::engine;
use vfd_modbus::{
    Catalog, CatalogError, DriveEvent, DriveSession, ExceptionCode, InjectedFault, Request,
    RetryPolicy, SessionConfig, SessionState, SimulatedDrive, SimulatorConfig, SimulatorHandle,
    TransactionEngine, TransactionError,
};

const TIMEOUT: Duration = Duration::from_millis(30);

fn session_config(max_retries: u32) -> SessionConfig {
    SessionConfig::default().with_retry(RetryPolicy::new(TIMEOUT, max_retries))
}

async fn connected(max_retries: u32) -> (DriveSession, SimulatorHandle) {
    let profile = Catalog::builtin().unwrap().profile("CDE550").unwrap();
    let (transport, sim) = SimulatedDrive::new(profile.clone(), SimulatorConfig::default()).spawn();
    let mut session = DriveSession::new(profile, session_config(max_retries)).unwrap();
    session.connect(transport).await.unwrap();
    (session, sim)
}

#[tokio::test]
async fn test_read_scaled_frequency() {
    let (mut session, sim) = connected(0).await;
    assert!(sim.set_register(0x0001, 500));

    let hz = assert_ok!(session.read_parameter(names::OUTPUT_FREQUENCY).await);
    assert_eq!(hz, 50.0);
    session.disconnect().await;
}

#[tokio::test]
async fn test_poll_publishes_scaled_frequency() {
    let profile = Catalog::builtin().unwrap().profile("CDE400").unwrap();
    let (transport, sim) = SimulatedDrive::new(profile.clone(), SimulatorConfig::default()).spawn();
    let mut session = DriveSession::new(profile, session_config(0)).unwrap();
    session.connect(transport).await.unwrap();
    assert!(sim.set_register(0x0001, 500));

    assert_ok!(session.poll().await);
    let snapshot = session.snapshot();
    assert_eq!(snapshot.get(names::OUTPUT_FREQUENCY), Some(50.0));
    let parameter = snapshot.parameter(names::OUTPUT_FREQUENCY).unwrap();
    assert_eq!(parameter.address, 0x0001);
    assert_eq!(parameter.raw, 500);
    assert_eq!(parameter.unit, "Hz");
    assert_eq!(session.state(), SessionState::Connected);
    session.disconnect().await;
}

#[tokio::test]
async fn test_write_scaled_setpoint() {
    let (mut session, sim) = connected(0).await;

    let raw = session.set_frequency(25.5).await.unwrap();
    assert_eq!(raw, 255);
    assert_eq!(sim.register(0x0002), Some(255));
    assert_eq!(sim.parameter(names::FREQUENCY_SETPOINT), Some(25.5));
    session.disconnect().await;
}

#[tokio::test]
async fn test_accel_time_governs_polled_ramp() {
    let profile = Catalog::builtin().unwrap().profile("CDE550").unwrap();
    let sim_config = SimulatorConfig::default().with_animation(1.0);
    let (transport, sim) = SimulatedDrive::new(profile.clone(), sim_config).spawn();
    let mut session = DriveSession::new(profile, session_config(0)).unwrap();
    session.connect(transport).await.unwrap();

    assert_ok!(session.write_parameter(names::ACCEL_TIME, 600.0).await);
    assert_ok!(session.set_frequency(50.0).await);
    assert_ok!(session.start().await);

    for _ in 0..4 {
        assert_ok!(session.poll().await);
    }
    // 600 s to 50 Hz: a few milliseconds of polling barely moves the output
    let hz = session.snapshot().get(names::OUTPUT_FREQUENCY).unwrap();
    assert!(hz < 1.0, "output ramped to {hz} Hz");
    assert!(sim.is_running());
    assert!(!sim.is_tripped());
    session.disconnect().await;
}

#[tokio::test]
async fn test_illegal_address_reaches_drive_once() {
    let (mut session, sim) = connected(3).await;
    let before = sim.stats();

    let err = assert_err!(session.read_registers(0x00FF, 1).await);
    assert!(matches!(
        err.as_transaction(),
        Some(TransactionError::DeviceException(code)) if *code == ExceptionCode::ILLEGAL_DATA_ADDRESS
    ));

    let after = sim.stats();
    assert_eq!(after.requests - before.requests, 1);
    assert_eq!(after.exceptions - before.exceptions, 1);
    assert_eq!(session.state(), SessionState::Connected);
    session.disconnect().await;
}

#[tokio::test]
async fn test_silent_drive_exhausts_retries() {
    let (mut session, sim) = connected(3).await;
    let before = sim.stats();
    sim.set_silent(true);

    let err = session.read_parameter(names::OUTPUT_FREQUENCY).await.unwrap_err();
    assert!(matches!(
        err.as_transaction(),
        Some(TransactionError::NoResponse { attempts: 4 })
    ));
    assert_eq!(sim.stats().dropped - before.dropped, 4);
    session.disconnect().await;
}

#[tokio::test]
async fn test_corrupt_reply_is_retried() {
    let (mut session, sim) = connected(3).await;
    let before = sim.stats();
    sim.inject(InjectedFault::CorruptCrc);

    let hz = session.read_parameter(names::OUTPUT_FREQUENCY).await.unwrap();
    assert_eq!(hz, 0.0);

    let after = sim.stats();
    assert_eq!(after.requests - before.requests, 2);
    assert_eq!(after.corrupted - before.corrupted, 1);
    session.disconnect().await;
}

#[tokio::test]
async fn test_persistent_corruption_is_invalid_frame() {
    let (mut session, sim) = connected(1).await;
    sim.inject(InjectedFault::CorruptCrc);
    sim.inject(InjectedFault::CorruptCrc);

    let err = session.read_parameter(names::OUTPUT_FREQUENCY).await.unwrap_err();
    assert!(matches!(
        err.as_transaction(),
        Some(TransactionError::InvalidFrame { attempts: 2, .. })
    ));
    session.disconnect().await;
}

#[tokio::test]
async fn test_fault_threshold_then_recovery() {
    let (mut session, sim) = connected(0).await;
    let mut events = session.subscribe_events();
    let mut states = session.subscribe_state();

    sim.set_silent(true);
    for _ in 0..3 {
        assert!(session.poll().await.is_err());
    }
    assert_eq!(session.state(), SessionState::Faulted);
    assert_eq!(*states.borrow_and_update(), SessionState::Faulted);

    sim.set_silent(false);
    session.poll().await.unwrap();
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(session.snapshot().get(names::DC_BUS_VOLTAGE), Some(540.0));

    let mut entered = false;
    let mut cleared = false;
    while let Ok(event) = events.try_recv() {
        match event {
            DriveEvent::FaultEntered { .. } => entered = true,
            DriveEvent::FaultCleared => cleared = entered,
            _ => {}
        }
    }
    assert!(entered && cleared);
    session.disconnect().await;
}

#[tokio::test]
async fn test_read_only_write_never_reaches_drive() {
    let (mut session, sim) = connected(0).await;
    let before = sim.stats().requests;

    let err = session
        .write_parameter(names::OUTPUT_CURRENT, 1.0)
        .await
        .unwrap_err();
    assert!(matches!(
        err.as_catalog(),
        Some(CatalogError::AccessViolation { .. })
    ));
    assert_eq!(sim.stats().requests, before);
    session.disconnect().await;
}

#[tokio::test]
async fn test_queue_preserves_submission_order() {
    let profile = Catalog::builtin().unwrap().profile("CDE550").unwrap();
    let (transport, sim) = SimulatedDrive::new(profile, SimulatorConfig::default()).spawn();
    let (handle, task) = engine::spawn(TransactionEngine::new(transport, 1), 8);
    let policy = RetryPolicy::new(TIMEOUT, 0);

    let (a, b, c) = tokio::join!(
        handle.execute(Request::write(0x0002, 100), policy),
        handle.execute(Request::write(0x0002, 200), policy),
        handle.execute(Request::write(0x0002, 300), policy),
    );
    assert_ok!(a);
    assert_ok!(b);
    assert_ok!(c);
    assert_eq!(sim.register(0x0002), Some(300));

    let stats = task.shutdown().await.unwrap();
    assert_eq!(stats.frames_sent, 3);

    let err = assert_err!(handle.execute(Request::read(0x0000, 1), policy).await);
    assert!(matches!(err, TransactionError::EngineStopped));
    assert!(handle.is_closed());
}

#[tokio::test]
async fn test_disconnect_twice() {
    let (mut session, _sim) = connected(0).await;
    let mut events = session.subscribe_events();

    session.disconnect().await;
    session.disconnect().await;
    assert_eq!(session.state(), SessionState::Disconnected);

    let mut disconnects = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, DriveEvent::Disconnected { .. }) {
            disconnects += 1;
        }
    }
    assert_eq!(disconnects, 1);
}
