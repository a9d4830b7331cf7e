use async_trait::async_trait;
use callsig::calls::{
    CallRegistry, Collaborators, Coordinator, CoordinatorError, IncomingCallAlert, PushNotifier,
};
use callsig::config::CoordinatorConfig;
use callsig::socket::ConnectionHub;
use callsig::store::{
    CallRecordStore, MemoryCallRecordStore, MemoryPendingCallStore, MemoryProfileDirectory,
    PendingCallStore, StoreError,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use sigcore::protocol::{
    AnswerData, CallEndedData, CallRef, CandidateData, ClientMessage, OfferData, ServerMessage,
};
use sigcore::types::{
    CallId, CallKind, CallRecord, CallStats, CallStatus, CallerProfile, EndReason, HistoryCursor,
    PendingCall, ProfileId,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::Receiver;

#[derive(Default)]
struct RecordingPush {
    alerts: Mutex<Vec<IncomingCallAlert>>,
}

#[async_trait]
impl PushNotifier for RecordingPush {
    async fn notify_incoming_call(&self, alert: &IncomingCallAlert) -> anyhow::Result<bool> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(true)
    }
}

/// Wraps a memory store and stalls its writes, so other events can
/// interleave with an in-flight offer.
struct Slow<S> {
    inner: Arc<S>,
    delay: Duration,
}

type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
impl CallRecordStore for Slow<MemoryCallRecordStore> {
    async fn create_call(&self, record: &CallRecord) -> StoreResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.create_call(record).await
    }

    async fn get_call(&self, call_id: &CallId) -> StoreResult<Option<CallRecord>> {
        self.inner.get_call(call_id).await
    }

    async fn mark_answered(
        &self,
        call_id: &CallId,
        started_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.inner.mark_answered(call_id, started_at).await
    }

    async fn finalize(
        &self,
        call_id: &CallId,
        reason: EndReason,
        ended_at: DateTime<Utc>,
        duration: Option<u64>,
    ) -> StoreResult<bool> {
        self.inner
            .finalize(call_id, reason, ended_at, duration)
            .await
    }

    async fn list_calls(
        &self,
        viewer: &ProfileId,
        before: Option<&HistoryCursor>,
        limit: usize,
    ) -> StoreResult<Vec<CallRecord>> {
        self.inner.list_calls(viewer, before, limit).await
    }

    async fn call_stats(&self, viewer: &ProfileId) -> StoreResult<CallStats> {
        self.inner.call_stats(viewer).await
    }

    async fn delete_call(&self, viewer: &ProfileId, call_id: &CallId) -> StoreResult<bool> {
        self.inner.delete_call(viewer, call_id).await
    }

    async fn delete_all_calls(&self, viewer: &ProfileId) -> StoreResult<u64> {
        self.inner.delete_all_calls(viewer).await
    }
}

#[async_trait]
impl PendingCallStore for Slow<MemoryPendingCallStore> {
    async fn put_pending(&self, recipient: &ProfileId, pending: &PendingCall) -> StoreResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.put_pending(recipient, pending).await
    }

    async fn get_pending(&self, recipient: &ProfileId) -> StoreResult<Option<PendingCall>> {
        self.inner.get_pending(recipient).await
    }

    async fn delete_pending(&self, recipient: &ProfileId) -> StoreResult<()> {
        self.inner.delete_pending(recipient).await
    }
}

struct Server {
    coordinator: Arc<Coordinator>,
    hub: Arc<ConnectionHub>,
    records: Arc<MemoryCallRecordStore>,
    pending: Arc<MemoryPendingCallStore>,
    profiles: Arc<MemoryProfileDirectory>,
    push: Arc<RecordingPush>,
}

impl Server {
    fn new() -> Self {
        Self::with_config(CoordinatorConfig::default())
    }

    fn with_config(config: CoordinatorConfig) -> Self {
        Self::build(config, None)
    }

    /// Record and pending-offer writes each take `delay`.
    fn with_slow_writes(delay: Duration) -> Self {
        Self::build(CoordinatorConfig::default(), Some(delay))
    }

    fn build(config: CoordinatorConfig, write_delay: Option<Duration>) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let records = Arc::new(MemoryCallRecordStore::new());
        let pending = Arc::new(MemoryPendingCallStore::new(config.pending_ttl));
        let profiles = Arc::new(MemoryProfileDirectory::new());
        let push = Arc::new(RecordingPush::default());
        let hub = Arc::new(ConnectionHub::new());
        let (record_store, pending_store): (Arc<dyn CallRecordStore>, Arc<dyn PendingCallStore>) =
            match write_delay {
                Some(delay) => (
                    Arc::new(Slow {
                        inner: records.clone(),
                        delay,
                    }) as Arc<dyn CallRecordStore>,
                    Arc::new(Slow {
                        inner: pending.clone(),
                        delay,
                    }) as Arc<dyn PendingCallStore>,
                ),
                None => (
                    records.clone() as Arc<dyn CallRecordStore>,
                    pending.clone() as Arc<dyn PendingCallStore>,
                ),
            };
        let coordinator = Coordinator::new(
            config,
            CallRegistry::new(),
            hub.clone(),
            Collaborators {
                records: record_store,
                pending: pending_store,
                profiles: profiles.clone(),
                push: push.clone(),
            },
        );
        Self {
            coordinator,
            hub,
            records,
            pending,
            profiles,
            push,
        }
    }

    /// A second coordinator over the same stores, as after a process restart.
    fn restarted(&self) -> Arc<Coordinator> {
        Coordinator::new(
            CoordinatorConfig::default(),
            CallRegistry::new(),
            self.hub.clone(),
            Collaborators {
                records: self.records.clone(),
                pending: self.pending.clone(),
                profiles: self.profiles.clone(),
                push: self.push.clone(),
            },
        )
    }

    fn connect(&self, name: &str) -> (ProfileId, Receiver<ServerMessage>) {
        let profile = ProfileId::new(name);
        let (_, rx) = self.hub.register(&profile);
        (profile, rx)
    }

    async fn offer(
        &self,
        caller: &ProfileId,
        callee: &ProfileId,
        kind: CallKind,
    ) -> Result<CallId, CoordinatorError> {
        self.coordinator
            .offer(
                caller,
                OfferData {
                    thread_id: "thread-1".into(),
                    callee_id: callee.clone(),
                    kind,
                    sdp: "caller-offer".into(),
                },
            )
            .await
    }

    async fn answer(&self, callee: &ProfileId, call_id: &CallId) -> Result<(), CoordinatorError> {
        self.coordinator
            .answer(
                callee,
                AnswerData {
                    call_id: call_id.clone(),
                    sdp: "callee-answer".into(),
                },
            )
            .await
    }

    async fn status(&self, call_id: &CallId) -> CallStatus {
        self.records
            .get_call(call_id)
            .await
            .unwrap()
            .expect("call record")
            .status
    }
}

fn ended(rx: &mut Receiver<ServerMessage>) -> CallEndedData {
    match rx.try_recv() {
        Ok(ServerMessage::Ended(data)) => data,
        other => panic!("expected call:ended, got {other:?}"),
    }
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn offer_rings_caller_and_delivers_to_callee() {
    let server = Server::new();
    server.profiles.insert(CallerProfile {
        id: ProfileId::new("alice"),
        handle: "alice".into(),
        display_name: Some("Alice".into()),
        avatar_url: Some("https://cdn/alice.png".into()),
    });
    let (alice, mut alice_rx) = server.connect("alice");
    let (bob, mut bob_rx) = server.connect("bob");

    let call_id = server.offer(&alice, &bob, CallKind::Video).await.unwrap();

    assert_eq!(
        alice_rx.try_recv().unwrap(),
        ServerMessage::Ringing(CallRef {
            call_id: call_id.clone()
        })
    );
    match bob_rx.try_recv().unwrap() {
        ServerMessage::Incoming(incoming) => {
            assert_eq!(incoming.call_id, call_id);
            assert_eq!(incoming.kind, CallKind::Video);
            assert_eq!(incoming.sdp, "caller-offer");
            assert_eq!(incoming.caller.display_name.as_deref(), Some("Alice"));
        }
        other => panic!("expected call:incoming, got {other:?}"),
    }

    assert_eq!(server.status(&call_id).await, CallStatus::Ringing);
    assert!(server.coordinator.is_in_call(&alice));
    assert!(server.coordinator.is_in_call(&bob));
    assert!(server.push.alerts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn busy_callee_refuses_new_caller_without_a_record() {
    let server = Server::new();
    let (alice, _alice_rx) = server.connect("alice");
    let (bob, mut bob_rx) = server.connect("bob");
    let (carol, mut carol_rx) = server.connect("carol");

    let call_id = server.offer(&alice, &bob, CallKind::Audio).await.unwrap();
    server.answer(&bob, &call_id).await.unwrap();
    bob_rx.try_recv().unwrap();

    let err = server.offer(&carol, &bob, CallKind::Audio).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::Busy(p) if p == bob));
    assert_eq!(carol_rx.try_recv().unwrap(), ServerMessage::busy());
    assert!(bob_rx.try_recv().is_err());
    assert_eq!(server.records.len(), 1);
    assert!(!server.coordinator.is_in_call(&carol));
}

#[tokio::test]
async fn busy_caller_cannot_place_a_second_call() {
    let server = Server::new();
    let (alice, mut alice_rx) = server.connect("alice");
    let (bob, _bob_rx) = server.connect("bob");
    let (carol, mut carol_rx) = server.connect("carol");

    server.offer(&alice, &bob, CallKind::Audio).await.unwrap();
    alice_rx.try_recv().unwrap();

    assert!(server.offer(&alice, &carol, CallKind::Audio).await.is_err());
    let busy = ended(&mut alice_rx);
    assert_eq!(busy.reason, EndReason::Busy);
    assert!(busy.call_id.is_empty());
    assert!(carol_rx.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_offers_admit_one_call() {
    let server = Arc::new(Server::new());
    let (bob, _bob_rx) = server.connect("bob");
    let mut receivers = Vec::new();
    let mut tasks = Vec::new();
    for i in 0..16 {
        let (caller, rx) = server.connect(&format!("caller-{i}"));
        receivers.push(rx);
        let server = server.clone();
        let bob = bob.clone();
        tasks.push(tokio::spawn(async move {
            server.offer(&caller, &bob, CallKind::Audio).await.is_ok()
        }));
    }

    let mut admitted = 0;
    for task in tasks {
        if task.await.unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 1);
    assert_eq!(server.records.len(), 1);
    assert_eq!(server.coordinator.registry().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn unanswered_call_is_missed_once() {
    let server = Server::new();
    let (alice, mut alice_rx) = server.connect("alice");
    let (bob, mut bob_rx) = server.connect("bob");

    let call_id = server.offer(&alice, &bob, CallKind::Audio).await.unwrap();
    alice_rx.try_recv().unwrap();
    bob_rx.try_recv().unwrap();

    tokio::time::sleep(Duration::from_secs(89)).await;
    assert!(alice_rx.try_recv().is_err());
    assert_eq!(server.status(&call_id).await, CallStatus::Ringing);

    let start = tokio::time::Instant::now();
    let message = alice_rx.recv().await.unwrap();
    assert!(start.elapsed() >= Duration::from_secs(1));
    let expected = ServerMessage::Ended(CallEndedData {
        call_id: call_id.clone(),
        reason: EndReason::Missed,
        duration: None,
    });
    assert_eq!(message, expected);
    assert_eq!(bob_rx.try_recv().unwrap(), expected);

    assert_eq!(server.status(&call_id).await, CallStatus::Missed);
    assert!(!server.coordinator.is_in_call(&alice));
    assert!(!server.coordinator.is_in_call(&bob));

    // A late answer after the timeout changes nothing.
    assert!(matches!(
        server.answer(&bob, &call_id).await,
        Err(CoordinatorError::NotFound(_))
    ));
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(alice_rx.try_recv().is_err());
    assert_eq!(server.status(&call_id).await, CallStatus::Missed);
}

#[tokio::test(start_paused = true)]
async fn answer_just_before_timeout_wins() {
    let server = Server::new();
    let (alice, mut alice_rx) = server.connect("alice");
    let (bob, mut bob_rx) = server.connect("bob");

    let call_id = server.offer(&alice, &bob, CallKind::Video).await.unwrap();
    alice_rx.try_recv().unwrap();
    bob_rx.try_recv().unwrap();

    tokio::time::sleep(Duration::from_millis(89_999)).await;
    server.answer(&bob, &call_id).await.unwrap();
    assert_eq!(
        alice_rx.try_recv().unwrap(),
        ServerMessage::Answered(AnswerData {
            call_id: call_id.clone(),
            sdp: "callee-answer".into(),
        })
    );

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(alice_rx.try_recv().is_err());
    assert!(bob_rx.try_recv().is_err());
    assert_eq!(server.status(&call_id).await, CallStatus::Ongoing);
    assert!(server.coordinator.is_in_call(&bob));
}

#[tokio::test]
async fn answer_preconditions_are_enforced() {
    let server = Server::new();
    let (alice, mut alice_rx) = server.connect("alice");
    let (bob, _bob_rx) = server.connect("bob");
    let call_id = server.offer(&alice, &bob, CallKind::Audio).await.unwrap();
    alice_rx.try_recv().unwrap();

    assert!(matches!(
        server.answer(&alice, &call_id).await,
        Err(CoordinatorError::NotParticipant { .. })
    ));
    assert!(matches!(
        server.answer(&bob, &CallId::new("nope")).await,
        Err(CoordinatorError::NotFound(_))
    ));
    server.answer(&bob, &call_id).await.unwrap();
    assert!(matches!(
        server.answer(&bob, &call_id).await,
        Err(CoordinatorError::NotRinging(_))
    ));

    // Exactly one answered notification reached the caller.
    assert!(matches!(alice_rx.try_recv(), Ok(ServerMessage::Answered(_))));
    assert!(alice_rx.try_recv().is_err());
}

#[tokio::test]
async fn hangup_is_reported_identically_to_both() {
    let server = Server::new();
    let (alice, mut alice_rx) = server.connect("alice");
    let (bob, mut bob_rx) = server.connect("bob");
    let call_id = server.offer(&alice, &bob, CallKind::Video).await.unwrap();
    server.answer(&bob, &call_id).await.unwrap();
    while alice_rx.try_recv().is_ok() {}
    while bob_rx.try_recv().is_ok() {}

    assert!(server.coordinator.end(&bob, &call_id).await.unwrap());

    let to_alice = ended(&mut alice_rx);
    let to_bob = ended(&mut bob_rx);
    assert_eq!(to_alice, to_bob);
    assert_eq!(to_alice.reason, EndReason::Ended);
    assert!(to_alice.duration.is_some());

    let record = server.records.get_call(&call_id).await.unwrap().unwrap();
    assert_eq!(record.status, CallStatus::Ended);
    assert_eq!(record.duration, to_alice.duration);
    assert!(record.started_at.is_some() && record.ended_at.is_some());

    // A second hangup finds nothing to end.
    assert!(matches!(
        server.coordinator.end(&alice, &call_id).await,
        Err(CoordinatorError::NotFound(_))
    ));
    assert!(alice_rx.try_recv().is_err());
}

#[tokio::test]
async fn reject_while_ringing_has_no_duration() {
    let server = Server::new();
    let (alice, mut alice_rx) = server.connect("alice");
    let (bob, mut bob_rx) = server.connect("bob");
    let call_id = server.offer(&alice, &bob, CallKind::Audio).await.unwrap();
    alice_rx.try_recv().unwrap();
    bob_rx.try_recv().unwrap();

    assert!(server.coordinator.reject(&bob, &call_id).await.unwrap());

    let expected = CallEndedData {
        call_id: call_id.clone(),
        reason: EndReason::Rejected,
        duration: None,
    };
    assert_eq!(ended(&mut alice_rx), expected);
    assert_eq!(ended(&mut bob_rx), expected);
    assert_eq!(server.status(&call_id).await, CallStatus::Rejected);
}

#[tokio::test]
async fn outsiders_cannot_end_a_call() {
    let server = Server::new();
    let (alice, mut alice_rx) = server.connect("alice");
    let (bob, _bob_rx) = server.connect("bob");
    let (mallory, _mallory_rx) = server.connect("mallory");
    let call_id = server.offer(&alice, &bob, CallKind::Audio).await.unwrap();
    alice_rx.try_recv().unwrap();

    assert!(matches!(
        server.coordinator.end(&mallory, &call_id).await,
        Err(CoordinatorError::NotParticipant { .. })
    ));
    assert!(alice_rx.try_recv().is_err());
    assert_eq!(server.status(&call_id).await, CallStatus::Ringing);
}

#[tokio::test]
async fn candidates_are_relayed_verbatim() {
    let server = Server::new();
    let (alice, _alice_rx) = server.connect("alice");
    let (bob, mut bob_rx) = server.connect("bob");
    let (mallory, _mallory_rx) = server.connect("mallory");
    let call_id = server.offer(&alice, &bob, CallKind::Audio).await.unwrap();
    bob_rx.try_recv().unwrap();

    let candidate = CandidateData {
        call_id: call_id.clone(),
        candidate: json!({"candidate": "candidate:1 1 udp 2122260223 10.0.0.2 50000 typ host", "sdpMid": "0", "sdpMLineIndex": 0}),
    };
    server
        .coordinator
        .ice_candidate(&alice, candidate.clone())
        .await
        .unwrap();
    assert_eq!(bob_rx.try_recv().unwrap(), ServerMessage::IceCandidate(candidate.clone()));

    assert!(
        server
            .coordinator
            .ice_candidate(&mallory, candidate)
            .await
            .is_err()
    );
    let unknown = CandidateData {
        call_id: CallId::new("unknown"),
        candidate: json!({}),
    };
    assert!(matches!(
        server.coordinator.ice_candidate(&alice, unknown).await,
        Err(CoordinatorError::NotFound(_))
    ));
    assert!(bob_rx.try_recv().is_err());
}

#[tokio::test]
async fn disconnect_ends_the_call_for_the_peer() {
    let server = Server::new();
    let (alice, mut alice_rx) = server.connect("alice");
    let (bob, mut bob_rx) = server.connect("bob");
    let call_id = server.offer(&alice, &bob, CallKind::Audio).await.unwrap();
    server.answer(&bob, &call_id).await.unwrap();
    bob_rx.try_recv().unwrap();
    while alice_rx.try_recv().is_ok() {}

    assert!(server.coordinator.disconnect(&bob).await);
    let data = ended(&mut alice_rx);
    assert_eq!(data.reason, EndReason::Ended);
    assert_eq!(server.status(&call_id).await, CallStatus::Ended);
    assert!(!server.coordinator.disconnect(&bob).await);
}

#[tokio::test]
async fn offline_callee_gets_a_parked_offer_and_a_push() {
    let server = Server::new();
    server.profiles.insert(CallerProfile {
        id: ProfileId::new("alice"),
        handle: "alice_h".into(),
        display_name: None,
        avatar_url: None,
    });
    let (alice, mut alice_rx) = server.connect("alice");
    let bob = ProfileId::new("bob");

    let call_id = server.offer(&alice, &bob, CallKind::Video).await.unwrap();
    assert!(matches!(alice_rx.try_recv(), Ok(ServerMessage::Ringing(_))));

    let parked = server.pending.get_pending(&bob).await.unwrap().unwrap();
    assert_eq!(parked.call_id, call_id);
    assert_eq!(parked.sdp, "caller-offer");

    settle().await;
    let alerts = server.push.alerts.lock().unwrap().clone();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].recipient, bob);
    assert_eq!(alerts[0].caller_name, "alice_h");
    assert_eq!(alerts[0].kind, CallKind::Video);
    assert_eq!(alerts[0].call_id, call_id);

    // The callee comes online and receives the original offer.
    let (_, mut bob_rx) = server.connect("bob");
    assert!(server.coordinator.recover_pending(&bob).await.unwrap());
    match bob_rx.try_recv().unwrap() {
        ServerMessage::Incoming(incoming) => {
            assert_eq!(incoming.call_id, call_id);
            assert_eq!(incoming.sdp, "caller-offer");
            assert_eq!(incoming.thread_id, "thread-1");
        }
        other => panic!("expected call:incoming, got {other:?}"),
    }
    assert!(server.pending.get_pending(&bob).await.unwrap().is_none());

    server.answer(&bob, &call_id).await.unwrap();
    assert_eq!(server.status(&call_id).await, CallStatus::Ongoing);
}

#[tokio::test]
async fn push_can_be_disabled() {
    let server = Server::with_config(CoordinatorConfig::default().without_push());
    let (alice, _alice_rx) = server.connect("alice");
    server
        .offer(&alice, &ProfileId::new("bob"), CallKind::Audio)
        .await
        .unwrap();
    settle().await;
    assert!(server.push.alerts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn parked_offer_is_dropped_when_caller_leaves() {
    let server = Server::new();
    let (alice, _alice_rx) = server.connect("alice");
    let bob = ProfileId::new("bob");
    let call_id = server.offer(&alice, &bob, CallKind::Audio).await.unwrap();

    server.coordinator.disconnect(&alice).await;
    assert_eq!(server.status(&call_id).await, CallStatus::Ended);
    assert!(server.pending.get_pending(&bob).await.unwrap().is_none());

    let (_, mut bob_rx) = server.connect("bob");
    assert!(!server.coordinator.recover_pending(&bob).await.unwrap());
    assert!(bob_rx.try_recv().is_err());
}

#[tokio::test]
async fn parked_offer_for_offline_caller_is_discarded() {
    let server = Server::new();
    let (alice, mut alice_rx) = server.connect("alice");
    let bob = ProfileId::new("bob");
    let call_id = server.offer(&alice, &bob, CallKind::Audio).await.unwrap();
    alice_rx.try_recv().unwrap();

    // The caller's socket vanished without a disconnect being processed yet.
    let (alice_conn, _) = server.hub.register(&alice);
    server.hub.unregister(&alice, alice_conn);

    let (_, mut bob_rx) = server.connect("bob");
    assert!(!server.coordinator.recover_pending(&bob).await.unwrap());
    assert!(bob_rx.try_recv().is_err());
    assert!(server.pending.get_pending(&bob).await.unwrap().is_none());

    // Both participants are free again without waiting for the ring timeout.
    assert!(!server.coordinator.is_in_call(&bob));
    assert!(!server.coordinator.is_in_call(&alice));
    assert_eq!(server.status(&call_id).await, CallStatus::Missed);
    let (carol, _carol_rx) = server.connect("carol");
    server.offer(&carol, &bob, CallKind::Audio).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn disconnect_while_the_record_is_written_ends_the_call() {
    let server = Arc::new(Server::with_slow_writes(Duration::from_millis(50)));
    let (alice, mut alice_rx) = server.connect("alice");
    let (bob, mut bob_rx) = server.connect("bob");

    let offer = tokio::spawn({
        let server = server.clone();
        let (alice, bob) = (alice.clone(), bob.clone());
        async move { server.offer(&alice, &bob, CallKind::Audio).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(server.coordinator.disconnect(&bob).await);

    let call_id = match offer.await.unwrap() {
        Err(CoordinatorError::NotFound(call_id)) => call_id,
        other => panic!("expected the offer to be abandoned, got {other:?}"),
    };
    assert_eq!(server.status(&call_id).await, CallStatus::Ended);
    assert_eq!(ended(&mut alice_rx).reason, EndReason::Ended);
    assert!(alice_rx.try_recv().is_err());
    assert!(matches!(bob_rx.try_recv(), Ok(ServerMessage::Ended(_))));
    assert!(bob_rx.try_recv().is_err());

    // No ring timer is left to touch the record afterwards.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(server.status(&call_id).await, CallStatus::Ended);
    assert!(alice_rx.try_recv().is_err());
    assert!(!server.coordinator.is_in_call(&alice));
    assert!(!server.coordinator.is_in_call(&bob));
}

#[tokio::test(start_paused = true)]
async fn caller_hears_ringing_before_the_offer_is_parked() {
    let server = Arc::new(Server::with_slow_writes(Duration::from_millis(50)));
    let (alice, mut alice_rx) = server.connect("alice");
    let bob = ProfileId::new("bob");

    let offer = tokio::spawn({
        let server = server.clone();
        let (alice, bob) = (alice.clone(), bob.clone());
        async move { server.offer(&alice, &bob, CallKind::Audio).await }
    });

    // Past the record write, still inside the pending write.
    tokio::time::sleep(Duration::from_millis(75)).await;
    assert!(matches!(alice_rx.try_recv(), Ok(ServerMessage::Ringing(_))));
    assert!(server.pending.get_pending(&bob).await.unwrap().is_none());

    let call_id = offer.await.unwrap().unwrap();
    let parked = server.pending.get_pending(&bob).await.unwrap().unwrap();
    assert_eq!(parked.call_id, call_id);
}

#[tokio::test]
async fn finished_calls_show_up_in_both_histories() {
    let server = Server::new();
    let (alice, _alice_rx) = server.connect("alice");
    let (bob, _bob_rx) = server.connect("bob");
    let call_id = server.offer(&alice, &bob, CallKind::Video).await.unwrap();
    assert!(server.coordinator.reject(&bob, &call_id).await.unwrap());

    let history = server.coordinator.history();
    let page = history.list(&alice, None, None).await.unwrap();
    assert_eq!(page.calls.len(), 1);
    assert_eq!(page.calls[0].id, call_id);
    assert!(page.calls[0].is_outgoing);
    assert_eq!(page.calls[0].status, CallStatus::Rejected);

    let page = history.list(&bob, None, None).await.unwrap();
    assert!(!page.calls[0].is_outgoing);

    assert!(history.delete(&bob, &call_id).await.unwrap());
    assert!(history.list(&bob, None, None).await.unwrap().calls.is_empty());
    assert_eq!(history.stats(&alice).await.unwrap().total_calls, 1);
}

#[tokio::test(start_paused = true)]
async fn recovery_after_restart_rearms_the_remaining_window() {
    let server = Server::new();
    let (alice, mut alice_rx) = server.connect("alice");
    let bob = ProfileId::new("bob");
    let call_id = server.offer(&alice, &bob, CallKind::Audio).await.unwrap();
    alice_rx.try_recv().unwrap();

    // Backdate the call by 30 seconds of wall-clock time.
    let mut record = server.records.get_call(&call_id).await.unwrap().unwrap();
    record.created_at -= chrono::Duration::seconds(30);
    server.records.create_call(&record).await.unwrap();

    let restarted = server.restarted();
    let (_, mut bob_rx) = server.connect("bob");
    assert!(restarted.recover_pending(&bob).await.unwrap());
    assert!(matches!(bob_rx.try_recv(), Ok(ServerMessage::Incoming(_))));
    assert!(restarted.is_in_call(&bob));

    tokio::time::sleep(Duration::from_secs(55)).await;
    assert!(bob_rx.try_recv().is_err());

    tokio::time::sleep(Duration::from_secs(10)).await;
    let restarted_end = ended(&mut bob_rx);
    assert_eq!(restarted_end.reason, EndReason::Missed);
    assert_eq!(server.status(&call_id).await, CallStatus::Missed);
}

#[tokio::test]
async fn messages_dispatch_through_the_handler() {
    let server = Server::new();
    let (alice, mut alice_rx) = server.connect("alice");
    let (bob, mut bob_rx) = server.connect("bob");

    server
        .coordinator
        .handle_message(
            &alice,
            ClientMessage::Offer(OfferData {
                thread_id: "t".into(),
                callee_id: bob.clone(),
                kind: CallKind::Audio,
                sdp: "o".into(),
            }),
        )
        .await;
    let call_id = match alice_rx.try_recv().unwrap() {
        ServerMessage::Ringing(CallRef { call_id }) => call_id,
        other => panic!("expected call:ringing, got {other:?}"),
    };
    bob_rx.try_recv().unwrap();

    // Stale or misdirected messages are ignored without side effects.
    server
        .coordinator
        .handle_message(
            &alice,
            ClientMessage::Answer(AnswerData {
                call_id: call_id.clone(),
                sdp: "a".into(),
            }),
        )
        .await;
    assert!(bob_rx.try_recv().is_err());

    server
        .coordinator
        .handle_message(&alice, ClientMessage::End(CallRef { call_id }))
        .await;
    assert_eq!(ended(&mut bob_rx).reason, EndReason::Ended);
}
