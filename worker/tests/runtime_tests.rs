use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use task_broker_core::{Command, CommandCodec, ComputationEngine, EngineError};
use task_broker_worker::runtime::{ExitReason, WorkerRuntime};
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

type ManagerSide = Framed<DuplexStream, CommandCodec>;

/// Spawn a runtime on one end of an in-memory stream and hand back the
/// manager's end plus the runtime's exit handle.
fn spawn_runtime<E: ComputationEngine>(engine: E) -> (ManagerSide, JoinHandle<ExitReason>) {
    let (manager_side, worker_side) = tokio::io::duplex(64 * 1024);
    let exit = tokio::spawn(WorkerRuntime::new(engine).run(worker_side));
    (Framed::new(manager_side, CommandCodec::new()), exit)
}

async fn recv(manager: &mut ManagerSide) -> Command {
    tokio::time::timeout(Duration::from_secs(5), manager.next())
        .await
        .expect("timed out waiting for a command")
        .expect("stream ended unexpectedly")
        .expect("protocol error")
}

/// Receive, skipping a given number of milliseconds of silence means None.
async fn try_recv(manager: &mut ManagerSide, wait: Duration) -> Option<Command> {
    match tokio::time::timeout(wait, manager.next()).await {
        Ok(Some(Ok(command))) => Some(command),
        Ok(Some(Err(e))) => panic!("protocol error: {}", e),
        Ok(None) => None,
        Err(_) => None,
    }
}

/// Engine that echoes its configured blob after a fixed delay.
struct EchoEngine {
    blob: Vec<u8>,
    delay: Duration,
}

impl EchoEngine {
    fn new(delay: Duration) -> Self {
        Self {
            blob: Vec::new(),
            delay,
        }
    }
}

#[async_trait]
impl ComputationEngine for EchoEngine {
    fn configure(&mut self, blob: &[u8]) -> Result<(), EngineError> {
        self.blob = blob.to_vec();
        Ok(())
    }

    async fn compute(&mut self) -> Result<Bytes, EngineError> {
        tokio::time::sleep(self.delay).await;
        Ok(Bytes::from(self.blob.clone()))
    }
}

/// Engine whose compute fails on every odd invocation.
struct FlakyEngine {
    calls: u32,
}

#[async_trait]
impl ComputationEngine for FlakyEngine {
    fn configure(&mut self, _blob: &[u8]) -> Result<(), EngineError> {
        Ok(())
    }

    async fn compute(&mut self) -> Result<Bytes, EngineError> {
        self.calls += 1;
        tokio::time::sleep(Duration::from_millis(5)).await;
        if self.calls % 2 == 1 {
            Err(EngineError::Failed("flaky".into()))
        } else {
            Ok(Bytes::from_static(b"ok"))
        }
    }
}

#[tokio::test]
async fn announces_ready_on_connect() {
    let (mut manager, exit) = spawn_runtime(EchoEngine::new(Duration::from_millis(5)));
    assert_eq!(recv(&mut manager).await, Command::Ready);

    drop(manager);
    assert_eq!(exit.await.unwrap(), ExitReason::Disconnected);
}

#[tokio::test]
async fn posts_are_tagged_with_the_configured_version() {
    let (mut manager, exit) = spawn_runtime(EchoEngine::new(Duration::from_millis(5)));
    assert_eq!(recv(&mut manager).await, Command::Ready);

    manager
        .send(Command::Configure {
            version: 1001,
            blob: Bytes::from_static(b"7"),
        })
        .await
        .unwrap();
    manager.send(Command::Work).await.unwrap();

    for _ in 0..3 {
        match recv(&mut manager).await {
            Command::Post { version, data } => {
                assert_eq!(version, 1001);
                assert_eq!(data.as_ref(), b"7");
            }
            other => panic!("Expected Post, got {:?}", other),
        }
    }

    manager.send(Command::Die).await.unwrap();
    assert_eq!(exit.await.unwrap(), ExitReason::Terminated);
}

#[tokio::test]
async fn versions_follow_the_configure_sequence() {
    let (mut manager, exit) = spawn_runtime(EchoEngine::new(Duration::from_millis(5)));
    assert_eq!(recv(&mut manager).await, Command::Ready);

    manager
        .send(Command::Configure {
            version: 1001,
            blob: Bytes::from_static(b"first"),
        })
        .await
        .unwrap();
    manager.send(Command::Work).await.unwrap();

    // Let the first loop produce something, then reconfigure.
    loop {
        if let Command::Post { version, .. } = recv(&mut manager).await {
            assert_eq!(version, 1001);
            break;
        }
    }

    manager
        .send(Command::Configure {
            version: 1002,
            blob: Bytes::from_static(b"second"),
        })
        .await
        .unwrap();
    manager.send(Command::Work).await.unwrap();

    // Versions on the wire never go backwards, and results produced
    // under the new configuration carry the new version and blob.
    let mut last_version = 1001;
    loop {
        match recv(&mut manager).await {
            Command::Post { version, data } => {
                assert!(version >= last_version, "version went backwards");
                last_version = version;
                if version == 1002 {
                    assert_eq!(data.as_ref(), b"second");
                    break;
                }
                assert_eq!(data.as_ref(), b"first");
            }
            other => panic!("Expected Post, got {:?}", other),
        }
    }

    manager.send(Command::Die).await.unwrap();
    assert_eq!(exit.await.unwrap(), ExitReason::Terminated);
}

#[tokio::test]
async fn stop_before_work_is_a_noop() {
    let (mut manager, exit) = spawn_runtime(EchoEngine::new(Duration::from_millis(5)));
    assert_eq!(recv(&mut manager).await, Command::Ready);

    manager.send(Command::Stop).await.unwrap();
    manager.send(Command::Stop).await.unwrap();

    // The connection survives and work still starts afterwards.
    manager
        .send(Command::Configure {
            version: 1001,
            blob: Bytes::from_static(b"x"),
        })
        .await
        .unwrap();
    manager.send(Command::Work).await.unwrap();
    match recv(&mut manager).await {
        Command::Post { version, .. } => assert_eq!(version, 1001),
        other => panic!("Expected Post, got {:?}", other),
    }

    manager.send(Command::Die).await.unwrap();
    assert_eq!(exit.await.unwrap(), ExitReason::Terminated);
}

#[tokio::test]
async fn work_before_configure_is_ignored() {
    let (mut manager, exit) = spawn_runtime(EchoEngine::new(Duration::from_millis(5)));
    assert_eq!(recv(&mut manager).await, Command::Ready);

    manager.send(Command::Work).await.unwrap();
    assert!(
        try_recv(&mut manager, Duration::from_millis(150)).await.is_none(),
        "an unconfigured worker must not produce"
    );

    manager
        .send(Command::Configure {
            version: 1001,
            blob: Bytes::from_static(b"x"),
        })
        .await
        .unwrap();
    manager.send(Command::Work).await.unwrap();
    match recv(&mut manager).await {
        Command::Post { version, .. } => assert_eq!(version, 1001),
        other => panic!("Expected Post, got {:?}", other),
    }

    manager.send(Command::Die).await.unwrap();
    assert_eq!(exit.await.unwrap(), ExitReason::Terminated);
}

#[tokio::test]
async fn stop_fully_quiesces_production() {
    let (mut manager, exit) = spawn_runtime(EchoEngine::new(Duration::from_millis(10)));
    assert_eq!(recv(&mut manager).await, Command::Ready);

    manager
        .send(Command::Configure {
            version: 1001,
            blob: Bytes::from_static(b"x"),
        })
        .await
        .unwrap();
    manager.send(Command::Work).await.unwrap();

    // Production is live.
    match recv(&mut manager).await {
        Command::Post { .. } => {}
        other => panic!("Expected Post, got {:?}", other),
    }

    manager.send(Command::Stop).await.unwrap();
    // A second WORK earlier would be ignored; a second STOP is harmless.
    manager.send(Command::Stop).await.unwrap();

    // Drain whatever was already in flight when STOP was processed, then
    // require silence: the loop is joined, nothing may trickle in later.
    while let Some(command) = try_recv(&mut manager, Duration::from_millis(100)).await {
        match command {
            Command::Post { version, .. } => assert_eq!(version, 1001),
            other => panic!("Expected Post, got {:?}", other),
        }
    }
    assert!(
        try_recv(&mut manager, Duration::from_millis(200)).await.is_none(),
        "no results may arrive after STOP has quiesced the loop"
    );

    manager.send(Command::Die).await.unwrap();
    assert_eq!(exit.await.unwrap(), ExitReason::Terminated);
}

#[tokio::test]
async fn compute_failures_do_not_kill_the_loop() {
    let (mut manager, exit) = spawn_runtime(FlakyEngine { calls: 0 });
    assert_eq!(recv(&mut manager).await, Command::Ready);

    manager
        .send(Command::Configure {
            version: 1001,
            blob: Bytes::new(),
        })
        .await
        .unwrap();
    manager.send(Command::Work).await.unwrap();

    // Every other compute fails; the loop keeps delivering regardless.
    for _ in 0..2 {
        match recv(&mut manager).await {
            Command::Post { data, .. } => assert_eq!(data.as_ref(), b"ok"),
            other => panic!("Expected Post, got {:?}", other),
        }
    }

    manager.send(Command::Die).await.unwrap();
    assert_eq!(exit.await.unwrap(), ExitReason::Terminated);
}

#[tokio::test]
async fn worker_only_commands_are_fatal() {
    let (mut manager, exit) = spawn_runtime(EchoEngine::new(Duration::from_millis(5)));
    assert_eq!(recv(&mut manager).await, Command::Ready);

    manager
        .send(Command::Post {
            version: 1,
            data: Bytes::from_static(b"bogus"),
        })
        .await
        .unwrap();
    assert_eq!(exit.await.unwrap(), ExitReason::Disconnected);
}

#[tokio::test]
async fn die_terminates_immediately() {
    let (mut manager, exit) = spawn_runtime(EchoEngine::new(Duration::from_millis(5)));
    assert_eq!(recv(&mut manager).await, Command::Ready);

    manager.send(Command::Die).await.unwrap();
    assert_eq!(exit.await.unwrap(), ExitReason::Terminated);
}
