//! Capture workflow orchestration
//!
//! Composes the capture device, timed recorder, payload codec and
//! verification client into the end-to-end capture → seal → submit →
//! interpret sequence, and exposes the observable state machine:
//! `Idle → AwaitingPermission → Ready → Recording → Processing →
//! Complete | Failed`.

pub mod state;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::capture::{CaptureDevice, DeviceError, StreamHandle};
use crate::client::{VerificationOutcome, Verifier};
use crate::codec::{CodecError, PayloadCodec};
use crate::recorder::timed::{RecorderError, RecorderEvent, TimedRecorder};
use crate::store::{CredentialStore, CREDENTIAL_KEY};

pub use state::{WorkflowConfig, WorkflowEvent, WorkflowState};

/// User-facing notification messages, one per outcome class.
pub mod messages {
    pub const PERMISSION_DENIED: &str =
        "Camera permission denied. Check your browser or system settings.";
    pub const USER_OR_FACE_NOT_FOUND: &str = "No matching user or enrolled face was found.";
    pub const MULTIPLE_SUBJECTS: &str =
        "More than one face was detected. Try again with only yourself in frame.";
    pub const SERVER_ERROR: &str = "Verification failed. Please try again.";

    pub fn welcome(display_name: &str) -> String {
        format!("Welcome back, {display_name}!")
    }

    pub fn liveness_failed(reason: &str) -> String {
        format!("Liveness check failed: {reason}")
    }
}

/// Workflow errors
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(#[from] DeviceError),

    /// The requested operation is invalid in the current state. The
    /// request is a no-op: no state change, no side effects.
    #[error("capture request invalid in state {0:?}")]
    NotReady(WorkflowState),

    #[error(transparent)]
    Recorder(#[from] RecorderError),

    #[error(transparent)]
    Encoding(#[from] CodecError),
}

/// Orchestrating state machine for one biometric capture surface.
///
/// Holds the only reference to the live stream; the stream is released on
/// every exit path, exactly once.
pub struct CaptureWorkflow {
    config: WorkflowConfig,
    device: Arc<dyn CaptureDevice>,
    verifier: Arc<dyn Verifier>,
    store: Arc<dyn CredentialStore>,
    codec: PayloadCodec,
    state: Arc<RwLock<WorkflowState>>,
    stream: Mutex<Option<Arc<StreamHandle>>>,
    active_recorder: Mutex<Option<Arc<TimedRecorder>>>,
    torn_down: AtomicBool,
    event_tx: broadcast::Sender<WorkflowEvent>,
}

impl CaptureWorkflow {
    /// Create a workflow over its collaborators. The verifier is long
    /// lived; the bearer credential is injected per call from the store.
    pub fn new(
        config: WorkflowConfig,
        device: Arc<dyn CaptureDevice>,
        verifier: Arc<dyn Verifier>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            config,
            device,
            verifier,
            store,
            codec: PayloadCodec::new(),
            state: Arc::new(RwLock::new(WorkflowState::Idle)),
            stream: Mutex::new(None),
            active_recorder: Mutex::new(None),
            torn_down: AtomicBool::new(false),
            event_tx,
        }
    }

    /// Get the current workflow state
    pub fn state(&self) -> WorkflowState {
        *self.state.read()
    }

    /// Subscribe to workflow events
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.event_tx.subscribe()
    }

    /// Acquire the camera stream: `Idle → AwaitingPermission → Ready`.
    ///
    /// A refused permission prompt is terminal; the recorder is never
    /// started.
    pub async fn open(&self) -> Result<(), WorkflowError> {
        {
            let mut state = self.state.write();
            if *state != WorkflowState::Idle {
                return Err(WorkflowError::NotReady(*state));
            }
            *state = WorkflowState::AwaitingPermission;
        }

        tracing::info!("requesting camera access");
        match self.device.acquire().await {
            Ok(stream) => {
                tracing::info!(stream = %stream.id(), "camera stream acquired");
                *self.stream.lock() = Some(Arc::new(stream));
                *self.state.write() = WorkflowState::Ready;
                let _ = self.event_tx.send(WorkflowEvent::PermissionGranted);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "camera acquisition failed");
                *self.state.write() = WorkflowState::Failed;
                let _ = self.event_tx.send(WorkflowEvent::PermissionDenied);
                let _ = self.event_tx.send(WorkflowEvent::Resolved {
                    message: messages::PERMISSION_DENIED.to_string(),
                    success: false,
                });
                Err(e.into())
            }
        }
    }

    /// Run one capture attempt end to end: record for the configured
    /// duration, seal the clip, submit it and resolve the outcome.
    ///
    /// Valid only from `Ready`; in any other state (including an attempt
    /// still `Processing`) the request is rejected without side effects.
    pub async fn start_capture(&self) -> Result<(), WorkflowError> {
        {
            let mut state = self.state.write();
            if *state != WorkflowState::Ready {
                tracing::debug!(state = ?*state, "capture request rejected");
                return Err(WorkflowError::NotReady(*state));
            }
            *state = WorkflowState::Recording;
        }

        // The slot is always populated in Ready; a missing stream means a
        // release raced us, which ends the session.
        let stream = match self.stream.lock().clone() {
            Some(stream) => stream,
            None => {
                self.fail(messages::SERVER_ERROR.to_string());
                return Err(WorkflowError::NotReady(WorkflowState::Idle));
            }
        };

        let recorder = Arc::new(TimedRecorder::new());
        *self.active_recorder.lock() = Some(recorder.clone());
        let _ = self.event_tx.send(WorkflowEvent::RecordingStarted);

        // Surface countdown ticks as workflow events.
        let mut recorder_events = recorder.subscribe();
        let event_tx = self.event_tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Ok(event) = recorder_events.recv().await {
                if let RecorderEvent::CountdownTick(remaining) = event {
                    let _ = event_tx.send(WorkflowEvent::CountdownTick(remaining));
                }
            }
        });

        let duration = Duration::from_millis(self.config.record_duration_ms);
        let result = recorder
            .record(&stream, duration, self.config.preferred_format)
            .await;
        forwarder.abort();
        *self.active_recorder.lock() = None;

        let clip = match result {
            Ok(clip) => clip,
            Err(RecorderError::Cancelled) => {
                // Teardown already released the stream; the session just
                // ends, with nothing to report.
                return Err(RecorderError::Cancelled.into());
            }
            Err(e) => {
                self.fail(messages::SERVER_ERROR.to_string());
                return Err(e.into());
            }
        };

        *self.state.write() = WorkflowState::Processing;
        let _ = self.event_tx.send(WorkflowEvent::Processing);

        let payload = match self.codec.seal(&clip) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "clip could not be sealed");
                self.fail(messages::SERVER_ERROR.to_string());
                return Err(e.into());
            }
        };

        let bearer = self.store.get(CREDENTIAL_KEY);
        let outcome = self.verifier.submit(&payload, bearer.as_deref()).await;
        self.resolve(outcome);
        Ok(())
    }

    /// Tear the workflow down: cancel any active recording and release the
    /// stream, regardless of state. Synchronous. A submission already in
    /// flight completes on its own; its result is discarded.
    pub fn teardown(&self) {
        self.torn_down.store(true, Ordering::SeqCst);
        if let Some(recorder) = self.active_recorder.lock().take() {
            let _ = recorder.cancel();
        }
        self.release_stream();
        tracing::debug!("workflow torn down");
    }

    fn release_stream(&self) {
        if let Some(stream) = self.stream.lock().take() {
            stream.release();
        }
    }

    /// Terminal failure path: release first, then notify.
    fn fail(&self, message: String) {
        self.release_stream();
        *self.state.write() = WorkflowState::Failed;
        let _ = self.event_tx.send(WorkflowEvent::Resolved {
            message,
            success: false,
        });
    }

    /// Map the submission outcome onto a terminal state and exactly one
    /// user notification. The stream is released before the user hears
    /// anything.
    fn resolve(&self, outcome: VerificationOutcome) {
        self.release_stream();
        if self.torn_down.load(Ordering::SeqCst) {
            tracing::debug!("workflow torn down, submission result discarded");
            return;
        }

        match outcome {
            VerificationOutcome::Success {
                display_name,
                credential,
            } => {
                self.store.set(CREDENTIAL_KEY, &credential);
                *self.state.write() = WorkflowState::Complete;
                tracing::info!(user = %display_name, "verification succeeded");
                let _ = self.event_tx.send(WorkflowEvent::Resolved {
                    message: messages::welcome(&display_name),
                    success: true,
                });
                let _ = self.event_tx.send(WorkflowEvent::NavigateHome);
            }
            VerificationOutcome::UserOrFaceNotFound => {
                self.fail_resolved(messages::USER_OR_FACE_NOT_FOUND.to_string());
            }
            VerificationOutcome::LivenessFailed { reason } => {
                self.fail_resolved(messages::liveness_failed(&reason));
            }
            VerificationOutcome::MultipleSubjectsDetected => {
                self.fail_resolved(messages::MULTIPLE_SUBJECTS.to_string());
            }
            VerificationOutcome::ServerError { message } => {
                tracing::warn!(%message, "verification server error");
                self.fail_resolved(messages::SERVER_ERROR.to_string());
            }
        }
    }

    fn fail_resolved(&self, message: String) {
        *self.state.write() = WorkflowState::Failed;
        let _ = self.event_tx.send(WorkflowEvent::Resolved {
            message,
            success: false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::StreamSource;
    use crate::codec::EncodedPayload;
    use crate::recorder::state::ClipFormat;
    use crate::store::SessionStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    struct MockDevice {
        grant: bool,
        sources: Mutex<Vec<StreamSource>>,
    }

    impl MockDevice {
        fn granting() -> Arc<Self> {
            Arc::new(Self {
                grant: true,
                sources: Mutex::new(Vec::new()),
            })
        }

        fn denying() -> Arc<Self> {
            Arc::new(Self {
                grant: false,
                sources: Mutex::new(Vec::new()),
            })
        }

        fn source(&self) -> StreamSource {
            self.sources.lock().pop().expect("no stream acquired")
        }
    }

    #[async_trait]
    impl CaptureDevice for MockDevice {
        async fn acquire(&self) -> Result<StreamHandle, DeviceError> {
            if !self.grant {
                return Err(DeviceError::PermissionDenied("denied by user".to_string()));
            }
            let (handle, source) = StreamHandle::pair(vec![ClipFormat::Raw]);
            self.sources.lock().push(source);
            Ok(handle)
        }
    }

    struct MockVerifier {
        outcome: VerificationOutcome,
        calls: AtomicUsize,
        bearers: Mutex<Vec<Option<String>>>,
        gate: Option<Arc<Notify>>,
    }

    impl MockVerifier {
        fn resolving(outcome: VerificationOutcome) -> Arc<Self> {
            Arc::new(Self {
                outcome,
                calls: AtomicUsize::new(0),
                bearers: Mutex::new(Vec::new()),
                gate: None,
            })
        }

        fn gated(outcome: VerificationOutcome, gate: Arc<Notify>) -> Arc<Self> {
            Arc::new(Self {
                outcome,
                calls: AtomicUsize::new(0),
                bearers: Mutex::new(Vec::new()),
                gate: Some(gate),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Verifier for MockVerifier {
        async fn submit(
            &self,
            _payload: &EncodedPayload,
            credential: Option<&str>,
        ) -> VerificationOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.bearers.lock().push(credential.map(str::to_string));
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.outcome.clone()
        }
    }

    fn workflow(
        device: Arc<MockDevice>,
        verifier: Arc<MockVerifier>,
    ) -> (Arc<CaptureWorkflow>, Arc<SessionStore>) {
        let store = Arc::new(SessionStore::new());
        let workflow = Arc::new(CaptureWorkflow::new(
            WorkflowConfig::default(),
            device,
            verifier,
            store.clone(),
        ));
        (workflow, store)
    }

    fn drain(events: &mut broadcast::Receiver<WorkflowEvent>) -> Vec<WorkflowEvent> {
        let mut collected = Vec::new();
        while let Ok(event) = events.try_recv() {
            collected.push(event);
        }
        collected
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn successful_capture_stores_the_credential() {
        let device = MockDevice::granting();
        let verifier = MockVerifier::resolving(VerificationOutcome::Success {
            display_name: "alice".to_string(),
            credential: "tok1".to_string(),
        });
        let (workflow, store) = workflow(device.clone(), verifier.clone());
        let mut events = workflow.subscribe();

        workflow.open().await.unwrap();
        assert_eq!(workflow.state(), WorkflowState::Ready);
        let source = device.source();

        let task = {
            let workflow = workflow.clone();
            tokio::spawn(async move { workflow.start_capture().await })
        };
        settle().await;
        source.push_chunk(vec![0xab; 32]);

        task.await.unwrap().unwrap();
        assert_eq!(workflow.state(), WorkflowState::Complete);
        assert_eq!(store.get(CREDENTIAL_KEY), Some("tok1".to_string()));
        assert!(source.is_released());
        assert_eq!(verifier.calls(), 1);

        let events = drain(&mut events);
        assert!(events.iter().any(|e| matches!(
            e,
            WorkflowEvent::Resolved { message, success: true } if message.contains("alice")
        )));
        assert!(events
            .iter()
            .any(|e| matches!(e, WorkflowEvent::NavigateHome)));
    }

    #[tokio::test]
    async fn denied_permission_is_terminal_without_recording() {
        let device = MockDevice::denying();
        let verifier = MockVerifier::resolving(VerificationOutcome::UserOrFaceNotFound);
        let (workflow, _store) = workflow(device, verifier.clone());
        let mut events = workflow.subscribe();

        let result = workflow.open().await;
        assert!(matches!(result, Err(WorkflowError::DeviceUnavailable(_))));
        assert_eq!(workflow.state(), WorkflowState::Failed);

        // Capture cannot start from the terminal state.
        let capture = workflow.start_capture().await;
        assert!(matches!(capture, Err(WorkflowError::NotReady(_))));
        assert_eq!(verifier.calls(), 0);

        let events = drain(&mut events);
        assert!(events
            .iter()
            .any(|e| matches!(e, WorkflowEvent::PermissionDenied)));
        assert!(!events
            .iter()
            .any(|e| matches!(e, WorkflowEvent::RecordingStarted)));
    }

    #[tokio::test(start_paused = true)]
    async fn multiple_subjects_failure_releases_the_stream_first() {
        let device = MockDevice::granting();
        let verifier = MockVerifier::resolving(VerificationOutcome::MultipleSubjectsDetected);
        let (workflow, _store) = workflow(device.clone(), verifier.clone());
        let mut events = workflow.subscribe();

        workflow.open().await.unwrap();
        let source = device.source();

        let task = {
            let workflow = workflow.clone();
            tokio::spawn(async move { workflow.start_capture().await })
        };
        settle().await;
        source.push_chunk(vec![1; 8]);

        task.await.unwrap().unwrap();
        assert_eq!(workflow.state(), WorkflowState::Failed);
        assert!(source.is_released());

        let events = drain(&mut events);
        assert!(events.iter().any(|e| matches!(
            e,
            WorkflowEvent::Resolved { message, success: false }
                if message == messages::MULTIPLE_SUBJECTS
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn second_capture_during_processing_is_rejected() {
        let device = MockDevice::granting();
        let gate = Arc::new(Notify::new());
        let verifier = MockVerifier::gated(
            VerificationOutcome::Success {
                display_name: "alice".to_string(),
                credential: "tok1".to_string(),
            },
            gate.clone(),
        );
        let (workflow, _store) = workflow(device.clone(), verifier.clone());

        workflow.open().await.unwrap();
        let source = device.source();

        let task = {
            let workflow = workflow.clone();
            tokio::spawn(async move { workflow.start_capture().await })
        };
        settle().await;
        source.push_chunk(vec![2; 8]);

        // Let the recording window elapse and the submission block on the
        // gated verifier.
        tokio::time::sleep(Duration::from_millis(2100)).await;
        settle().await;
        assert_eq!(workflow.state(), WorkflowState::Processing);

        let second = workflow.start_capture().await;
        assert!(matches!(second, Err(WorkflowError::NotReady(_))));

        gate.notify_waiters();
        task.await.unwrap().unwrap();
        assert_eq!(verifier.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_mid_recording_releases_synchronously() {
        let device = MockDevice::granting();
        let verifier = MockVerifier::resolving(VerificationOutcome::UserOrFaceNotFound);
        let (workflow, _store) = workflow(device.clone(), verifier.clone());

        workflow.open().await.unwrap();
        let source = device.source();

        let task = {
            let workflow = workflow.clone();
            tokio::spawn(async move { workflow.start_capture().await })
        };
        settle().await;
        source.push_chunk(vec![3; 8]);
        settle().await;

        workflow.teardown();
        assert!(source.is_released());

        let result = task.await.unwrap();
        assert!(matches!(
            result,
            Err(WorkflowError::Recorder(RecorderError::Cancelled))
        ));
        assert_eq!(verifier.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn liveness_reason_reaches_the_notification() {
        let device = MockDevice::granting();
        let verifier = MockVerifier::resolving(VerificationOutcome::LivenessFailed {
            reason: "blink failed".to_string(),
        });
        let (workflow, _store) = workflow(device.clone(), verifier);
        let mut events = workflow.subscribe();

        workflow.open().await.unwrap();
        let source = device.source();

        let task = {
            let workflow = workflow.clone();
            tokio::spawn(async move { workflow.start_capture().await })
        };
        settle().await;
        source.push_chunk(vec![4; 8]);
        task.await.unwrap().unwrap();

        let events = drain(&mut events);
        assert!(events.iter().any(|e| matches!(
            e,
            WorkflowEvent::Resolved { message, success: false }
                if message == "Liveness check failed: blink failed"
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn stored_credential_is_injected_as_bearer() {
        let device = MockDevice::granting();
        let verifier = MockVerifier::resolving(VerificationOutcome::UserOrFaceNotFound);
        let (workflow, store) = workflow(device.clone(), verifier.clone());
        store.set(CREDENTIAL_KEY, "prior-token");

        workflow.open().await.unwrap();
        let source = device.source();

        let task = {
            let workflow = workflow.clone();
            tokio::spawn(async move { workflow.start_capture().await })
        };
        settle().await;
        source.push_chunk(vec![5; 8]);
        task.await.unwrap().unwrap();

        assert_eq!(
            verifier.bearers.lock().as_slice(),
            &[Some("prior-token".to_string())]
        );
    }

    #[tokio::test]
    async fn capture_before_open_is_a_no_op() {
        let device = MockDevice::granting();
        let verifier = MockVerifier::resolving(VerificationOutcome::UserOrFaceNotFound);
        let (workflow, _store) = workflow(device, verifier.clone());
        let mut events = workflow.subscribe();

        let result = workflow.start_capture().await;
        assert!(matches!(
            result,
            Err(WorkflowError::NotReady(WorkflowState::Idle))
        ));
        assert_eq!(workflow.state(), WorkflowState::Idle);
        assert!(drain(&mut events).is_empty());
        assert_eq!(verifier.calls(), 0);
    }
}
