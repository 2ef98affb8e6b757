use crate::entity::EntryRepository;
use crate::error::{Error, Result};
use crate::p4rt::pipeconf::{CatalogRef, FwdPipeConfig, PipelineCatalog};
use crate::p4rt::pure::{
    decode_write_errors, new_get_p4info_request, new_master_update_request, new_read_request,
    new_set_forwarding_pipeline_config_request, new_write_request,
};
use crate::p4rt::transport::{GrpcTransport, P4RuntimeTransport, ResponseStream};
use crate::representation::{ElectionId, SessionState};
use crossbeam::atomic::AtomicCell;
use futures::stream::BoxStream;
use futures::{Future, StreamExt};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use rusty_p4_shell_proto::proto::v1::{
    stream_message_response, Entity, MasterArbitrationUpdate, ReadResponse,
    StreamMessageRequest, StreamMessageResponse, Update,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::Code;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionOption {
    pub device_id: u64,
    pub address: String,
    pub election_id: ElectionId,
    pub connect_timeout: Duration,
    pub arbitration_timeout: Duration,
    pub stream_buffer: usize,
}

impl Default for ConnectionOption {
    fn default() -> Self {
        Self {
            device_id: 1,
            address: "127.0.0.1:9559".to_owned(),
            election_id: ElectionId::new(0, 1),
            connect_timeout: Duration::from_secs(5),
            arbitration_timeout: Duration::from_secs(5),
            stream_buffer: 128,
        }
    }
}

impl ConnectionOption {
    /// Reads a JSON file; missing keys keep their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<ConnectionOption> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|error| Error::ConfigFile {
            path: path.display().to_string(),
            error,
        })?;
        serde_json::from_str(&text).map_err(|e| Error::ConfigFile {
            path: path.display().to_string(),
            error: e.into(),
        })
    }
}

/// A controller session on one device.
///
/// Cloning gives another handle on the same session. Once the device ends or
/// breaks the stream every call fails with [`Error::Connection`], and after
/// [`Session::teardown`] with [`Error::SessionClosed`].
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    device_id: u64,
    address: String,
    election_id: ElectionId,
    transport: Mutex<Option<Arc<dyn P4RuntimeTransport>>>,
    catalog: CatalogRef,
    state: watch::Receiver<SessionState>,
    state_sender: Arc<watch::Sender<SessionState>>,
    primary: Arc<AtomicCell<Option<ElectionId>>>,
    stream_sender: AtomicCell<Option<mpsc::Sender<StreamMessageRequest>>>,
    closed: CancellationToken,
    /// Why the stream ended, when the device ended it.
    failure: Arc<Mutex<Option<String>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

fn arbitration_code(update: &MasterArbitrationUpdate) -> Code {
    update
        .status
        .as_ref()
        .map(|s| Code::from(s.code))
        .unwrap_or(Code::Ok)
}

async fn next_arbitration(
    responses: &mut ResponseStream<StreamMessageResponse>,
) -> Option<std::result::Result<MasterArbitrationUpdate, tonic::Status>> {
    while let Some(r) = responses.next().await {
        match r {
            Ok(StreamMessageResponse {
                update: Some(stream_message_response::Update::Arbitration(update)),
            }) => return Some(Ok(update)),
            Ok(other) => {
                debug!(target: "session", "ignoring stream message before arbitration: {:?}", other)
            }
            Err(status) => return Some(Err(status)),
        }
    }
    None
}

impl Session {
    /// Dials `option.address` over gRPC, then runs [`Session::setup`].
    pub async fn connect(option: &ConnectionOption, pipeline: Option<FwdPipeConfig>) -> Result<Session> {
        let transport = GrpcTransport::connect(&option.address, option.connect_timeout).await?;
        Session::setup(Arc::new(transport), option, pipeline).await
    }

    /// Opens the stream channel, arbitrates, and loads the pipeline catalog.
    ///
    /// When `pipeline` is given it is pushed with `VERIFY_AND_COMMIT`, otherwise
    /// the P4Info already on the device is fetched.
    pub async fn setup(
        transport: Arc<dyn P4RuntimeTransport>,
        option: &ConnectionOption,
        pipeline: Option<FwdPipeConfig>,
    ) -> Result<Session> {
        let device_id = option.device_id;
        let election_id = option.election_id;
        let connection_error = |reason: String| Error::Connection {
            address: option.address.clone(),
            reason,
        };
        let (state_sender, state) = watch::channel(SessionState::Connecting);
        info!(target: "session", "connecting to device {} at {} with election id {}", device_id, option.address, election_id);

        let (sender, receiver) = mpsc::channel(option.stream_buffer.max(1));
        sender
            .send(new_master_update_request(device_id, election_id))
            .await
            .map_err(|_| connection_error("stream channel closed".to_owned()))?;
        let mut responses = transport
            .stream_channel(ReceiverStream::new(receiver))
            .await
            .map_err(|s| connection_error(s.message().to_owned()))?;
        state_sender.send_replace(SessionState::Arbitrating);

        let update = match tokio::time::timeout(option.arbitration_timeout, next_arbitration(&mut responses)).await {
            Err(_) => return Err(connection_error("arbitration timed out".to_owned())),
            Ok(None) => return Err(connection_error("stream closed during arbitration".to_owned())),
            Ok(Some(Err(status))) => return Err(connection_error(status.message().to_owned())),
            Ok(Some(Ok(update))) => update,
        };
        let primary = update.election_id.map(ElectionId::from);
        let code = arbitration_code(&update);
        if code != Code::Ok {
            warn!(target: "session", "device {} refused primacy to {}: {:?}", device_id, election_id, code);
            return Err(Error::Arbitration {
                device_id,
                ours: election_id,
                primary,
                message: update.status.map(|s| s.message).unwrap_or_default(),
            });
        }
        state_sender.send_replace(SessionState::Active);
        info!(target: "session", "device {} primary is {}", device_id, election_id);

        let catalog = match pipeline {
            Some(pipeline) => {
                let (p4info, device_config) = pipeline.load().await?;
                let request = new_set_forwarding_pipeline_config_request(
                    device_id,
                    election_id,
                    p4info.clone(),
                    device_config,
                );
                transport
                    .set_forwarding_pipeline_config(request)
                    .await
                    .map_err(|status| Error::Grpc { device_id, status })?;
                info!(target: "session", "pipeline {:?} committed to device {}", pipeline.p4info, device_id);
                p4info
            }
            None => transport
                .get_forwarding_pipeline_config(new_get_p4info_request(device_id))
                .await
                .map_err(|status| Error::Grpc { device_id, status })?
                .config
                .and_then(|c| c.p4info)
                .ok_or_else(|| Error::Pipeline(format!("device {} has no pipeline configured", device_id)))?,
        };
        let catalog = Arc::new(PipelineCatalog::new(catalog));

        let state_sender = Arc::new(state_sender);
        let primary = Arc::new(AtomicCell::new(primary));
        let closed = CancellationToken::new();
        let failure = Arc::new(Mutex::new(None));
        let task = tokio::spawn(watch_stream(
            device_id,
            election_id,
            responses,
            state_sender.clone(),
            primary.clone(),
            failure.clone(),
            closed.clone(),
        ));

        Ok(Session {
            inner: Arc::new(Inner {
                device_id,
                address: option.address.clone(),
                election_id,
                transport: Mutex::new(Some(transport)),
                catalog,
                state,
                state_sender,
                primary,
                stream_sender: AtomicCell::new(Some(sender)),
                closed,
                failure,
                task: Mutex::new(Some(task)),
            }),
        })
    }

    /// Closes the stream and releases the connection. Calling it again is a no-op.
    pub async fn teardown(&self) {
        let sender = self.inner.stream_sender.swap(None);
        self.inner.closed.cancel();
        let task = self.inner.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(target: "session", "stream task of device {} failed: {}", self.inner.device_id, e);
            }
        }
        drop(self.inner.transport.lock().take());
        self.inner.failure.lock().take();
        self.inner.state_sender.send_replace(SessionState::Disconnected);
        if sender.is_some() {
            info!(target: "session", "session on device {} closed", self.inner.device_id);
        }
    }

    pub fn device_id(&self) -> u64 {
        self.inner.device_id
    }

    pub fn election_id(&self) -> ElectionId {
        self.inner.election_id
    }

    /// Election id of the primary as last reported by the device.
    pub fn primary(&self) -> Option<ElectionId> {
        self.inner.primary.load()
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    pub fn catalog(&self) -> &CatalogRef {
        &self.inner.catalog
    }

    pub fn repository(&self) -> EntryRepository {
        EntryRepository::new(self.inner.catalog.clone())
    }

    /// The error every call returns once the session is closed.
    fn closed_error(&self) -> Error {
        match self.inner.failure.lock().clone() {
            Some(reason) => Error::Connection {
                address: self.inner.address.clone(),
                reason,
            },
            None => Error::SessionClosed,
        }
    }

    fn transport(&self) -> Result<Arc<dyn P4RuntimeTransport>> {
        let transport = self.inner.transport.lock().clone();
        transport.ok_or_else(|| self.closed_error())
    }

    /// Resolves `f` unless the session closes first.
    async fn guard<F: Future>(&self, f: F) -> Result<F::Output> {
        tokio::select! {
            biased;
            _ = self.inner.closed.cancelled() => Err(self.closed_error()),
            r = f => Ok(r),
        }
    }

    fn ensure_open(&self) -> Result<SessionState> {
        let state = self.state();
        if self.is_closed() || !state.can_read() {
            return Err(self.closed_error());
        }
        Ok(state)
    }

    fn classify_write_status(&self, status: tonic::Status) -> Error {
        match status.code() {
            Code::PermissionDenied => Error::LostPrimacy {
                device_id: self.inner.device_id,
            },
            Code::Unavailable => Error::Connection {
                address: self.inner.address.clone(),
                reason: status.message().to_owned(),
            },
            code => {
                let errors = decode_write_errors(status.details());
                match errors
                    .iter()
                    .enumerate()
                    .find(|(_, e)| e.canonical_code != Code::Ok as i32)
                {
                    Some((index, e)) => Error::WriteRejected {
                        index,
                        code: Code::from(e.canonical_code),
                        message: e.message.clone(),
                    },
                    None => Error::WriteRejected {
                        index: 0,
                        code,
                        message: status.message().to_owned(),
                    },
                }
            }
        }
    }

    fn classify_read_status(&self, status: tonic::Status) -> Error {
        match status.code() {
            Code::Unavailable => Error::Connection {
                address: self.inner.address.clone(),
                reason: status.message().to_owned(),
            },
            _ => Error::Grpc {
                device_id: self.inner.device_id,
                status,
            },
        }
    }

    /// Sends one `Write` RPC. Only allowed while the session holds primacy.
    pub async fn write(&self, updates: Vec<Update>) -> Result<()> {
        if !self.ensure_open()?.can_write() {
            return Err(Error::LostPrimacy {
                device_id: self.inner.device_id,
            });
        }
        let transport = self.transport()?;
        let request = new_write_request(self.inner.device_id, self.inner.election_id, updates);
        debug!(target: "session", "write request: {:?}", &request);
        self.guard(transport.write(request))
            .await?
            .map(|_| ())
            .map_err(|status| self.classify_write_status(status))
    }

    /// Sends one `Read` RPC when the returned stream is first polled and
    /// yields the entities of every response chunk in order.
    pub fn read(&self, entities: Vec<Entity>) -> BoxStream<'static, Result<Entity>> {
        enum ReadState {
            Start(Session, Vec<Entity>),
            Streaming(Session, ResponseStream<ReadResponse>, VecDeque<Entity>),
            Done,
        }

        futures::stream::unfold(
            ReadState::Start(self.clone(), entities),
            |state| async move {
                let mut state = state;
                loop {
                    state = match state {
                        ReadState::Done => return None,
                        ReadState::Start(session, entities) => {
                            let transport = match session.ensure_open().and_then(|_| session.transport()) {
                                Ok(transport) => transport,
                                Err(e) => return Some((Err(e), ReadState::Done)),
                            };
                            let request = new_read_request(session.inner.device_id, entities);
                            debug!(target: "session", "read request: {:?}", &request);
                            match session.guard(transport.read(request)).await {
                                Err(e) => return Some((Err(e), ReadState::Done)),
                                Ok(Err(status)) => {
                                    let e = session.classify_read_status(status);
                                    return Some((Err(e), ReadState::Done));
                                }
                                Ok(Ok(responses)) => {
                                    ReadState::Streaming(session, responses, VecDeque::new())
                                }
                            }
                        }
                        ReadState::Streaming(session, mut responses, mut queue) => {
                            if let Some(entity) = queue.pop_front() {
                                return Some((Ok(entity), ReadState::Streaming(session, responses, queue)));
                            }
                            match session.guard(responses.next()).await {
                                Err(e) => return Some((Err(e), ReadState::Done)),
                                Ok(None) => return None,
                                Ok(Some(Err(status))) => {
                                    let e = session.classify_read_status(status);
                                    return Some((Err(e), ReadState::Done));
                                }
                                Ok(Some(Ok(response))) => {
                                    queue.extend(response.entities);
                                    ReadState::Streaming(session, responses, queue)
                                }
                            }
                        }
                    }
                }
            },
        )
        .boxed()
    }
}

async fn watch_stream(
    device_id: u64,
    election_id: ElectionId,
    mut responses: ResponseStream<StreamMessageResponse>,
    state: Arc<watch::Sender<SessionState>>,
    primary: Arc<AtomicCell<Option<ElectionId>>>,
    failure: Arc<Mutex<Option<String>>>,
    closed: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = closed.cancelled() => break,
            message = responses.next() => message,
        };
        match message {
            Some(Ok(StreamMessageResponse { update: Some(update) })) => match update {
                stream_message_response::Update::Arbitration(update) => {
                    let next = if arbitration_code(&update) == Code::Ok {
                        SessionState::Active
                    } else {
                        SessionState::Standby
                    };
                    primary.store(update.election_id.map(ElectionId::from));
                    let previous = state.send_replace(next);
                    if previous != next {
                        warn!(target: "session", "device {}: election id {} is now {:?}, primary {:?}", device_id, election_id, next, primary.load());
                    }
                }
                stream_message_response::Update::Error(err) => {
                    warn!(target: "session", "device {} stream error: {:?}", device_id, err);
                }
            },
            Some(Ok(_)) => {}
            Some(Err(status)) => {
                error!(target: "session", "device {} stream failed: {}", device_id, status);
                *failure.lock() = Some(status.message().to_owned());
                break;
            }
            None => {
                warn!(target: "session", "device {} closed the stream", device_id);
                *failure.lock() = Some("device closed the stream".to_owned());
                break;
            }
        }
    }
    state.send_replace(SessionState::Disconnected);
    closed.cancel();
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("device_id", &self.inner.device_id)
            .field("election_id", &self.inner.election_id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{program, SimDevice};
    use async_trait::async_trait;
    use rusty_p4_shell_proto::proto::v1::{
        GetForwardingPipelineConfigRequest, GetForwardingPipelineConfigResponse, ReadRequest,
        SetForwardingPipelineConfigRequest, SetForwardingPipelineConfigResponse, WriteRequest,
        WriteResponse,
    };
    use tonic::Status;

    /// Answers arbitration, then breaks the stream.
    struct ResettingTransport(SimDevice);

    #[async_trait]
    impl P4RuntimeTransport for ResettingTransport {
        async fn stream_channel(
            &self,
            requests: ReceiverStream<StreamMessageRequest>,
        ) -> std::result::Result<ResponseStream<StreamMessageResponse>, Status> {
            let mut responses = self.0.stream_channel(requests).await?;
            let first = responses.next().await;
            let reset = futures::stream::once(async { Err(Status::unavailable("connection reset")) });
            Ok(futures::stream::iter(first).chain(reset).boxed())
        }

        async fn write(&self, request: WriteRequest) -> std::result::Result<WriteResponse, Status> {
            self.0.write(request).await
        }

        async fn read(
            &self,
            request: ReadRequest,
        ) -> std::result::Result<ResponseStream<ReadResponse>, Status> {
            self.0.read(request).await
        }

        async fn set_forwarding_pipeline_config(
            &self,
            request: SetForwardingPipelineConfigRequest,
        ) -> std::result::Result<SetForwardingPipelineConfigResponse, Status> {
            self.0.set_forwarding_pipeline_config(request).await
        }

        async fn get_forwarding_pipeline_config(
            &self,
            request: GetForwardingPipelineConfigRequest,
        ) -> std::result::Result<GetForwardingPipelineConfigResponse, Status> {
            self.0.get_forwarding_pipeline_config(request).await
        }
    }

    fn option() -> ConnectionOption {
        ConnectionOption::default()
    }

    #[test]
    fn test_connection_option_defaults() {
        let o: ConnectionOption = serde_json::from_str(r#"{"device_id": 3}"#).unwrap();
        assert_eq!(o.device_id, 3);
        assert_eq!(o.address, "127.0.0.1:9559");
        assert_eq!(o.election_id, ElectionId::new(0, 1));
    }

    #[tokio::test]
    async fn test_setup_becomes_active() {
        let device = SimDevice::with_pipeline(1, program::p4info());
        let session = Session::setup(Arc::new(device.clone()), &option(), None).await.unwrap();
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.primary(), Some(ElectionId::new(0, 1)));
        assert!(session.catalog().table("ingress.tbl_switching").is_ok());
        session.teardown().await;
    }

    #[tokio::test]
    async fn test_setup_without_pipeline_fails() {
        let device = SimDevice::new(1);
        let err = Session::setup(Arc::new(device), &option(), None).await.unwrap_err();
        assert!(matches!(err, Error::Grpc { .. }));
    }

    #[tokio::test]
    async fn test_arbitration_lost_to_higher_election_id() {
        let device = SimDevice::with_pipeline(1, program::p4info());
        let high = ConnectionOption {
            election_id: ElectionId::new(0, 10),
            ..option()
        };
        let first = Session::setup(Arc::new(device.clone()), &high, None).await.unwrap();
        let err = Session::setup(Arc::new(device.clone()), &option(), None).await.unwrap_err();
        match err {
            Error::Arbitration { ours, primary, .. } => {
                assert_eq!(ours, ElectionId::new(0, 1));
                assert_eq!(primary, Some(ElectionId::new(0, 10)));
            }
            other => panic!("unexpected {:?}", other),
        }
        first.teardown().await;
    }

    #[tokio::test]
    async fn test_wrong_device_id_is_a_connection_error() {
        let device = SimDevice::with_pipeline(1, program::p4info());
        let o = ConnectionOption {
            device_id: 2,
            ..option()
        };
        let err = Session::setup(Arc::new(device), &o, None).await.unwrap_err();
        assert!(matches!(err, Error::Connection { .. }));
    }

    #[tokio::test]
    async fn test_preemption_moves_to_standby() {
        let device = SimDevice::with_pipeline(1, program::p4info());
        let session = Session::setup(Arc::new(device.clone()), &option(), None).await.unwrap();
        let mut state = session.watch_state();
        device.preempt();
        while *state.borrow_and_update() != SessionState::Standby {
            state.changed().await.unwrap();
        }
        assert!(session.write(vec![]).await.unwrap_err().is_lost_primacy());
        session.teardown().await;
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent_and_closes() {
        let device = SimDevice::with_pipeline(1, program::p4info());
        let session = Session::setup(Arc::new(device.clone()), &option(), None).await.unwrap();
        session.teardown().await;
        session.teardown().await;
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(matches!(session.write(vec![]).await, Err(Error::SessionClosed)));
        let mut read = session.read(vec![]);
        assert!(matches!(read.next().await, Some(Err(Error::SessionClosed))));
        assert!(read.next().await.is_none());
    }

    #[tokio::test]
    async fn test_teardown_unblocks_pending_write() {
        let device = SimDevice::with_pipeline(1, program::p4info());
        device.set_write_delay(Some(Duration::from_secs(60)));
        let session = Session::setup(Arc::new(device.clone()), &option(), None).await.unwrap();
        let pending = {
            let session = session.clone();
            tokio::spawn(async move { session.write(vec![]).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        session.teardown().await;
        let result = tokio::time::timeout(Duration::from_secs(5), pending).await.unwrap().unwrap();
        assert!(matches!(result, Err(Error::SessionClosed)));
    }

    #[tokio::test]
    async fn test_broken_stream_is_a_connection_error() {
        let device = SimDevice::with_pipeline(1, program::p4info());
        let session = Session::setup(Arc::new(ResettingTransport(device)), &option(), None)
            .await
            .unwrap();
        let mut state = session.watch_state();
        while *state.borrow_and_update() != SessionState::Disconnected {
            state.changed().await.unwrap();
        }
        assert!(session.is_closed());
        match session.write(vec![]).await {
            Err(Error::Connection { address, reason }) => {
                assert_eq!(address, "127.0.0.1:9559");
                assert_eq!(reason, "connection reset");
            }
            other => panic!("unexpected {:?}", other),
        }
        let mut read = session.read(vec![]);
        assert!(matches!(read.next().await, Some(Err(Error::Connection { .. }))));

        session.teardown().await;
        assert!(matches!(session.write(vec![]).await, Err(Error::SessionClosed)));
    }

    #[tokio::test]
    async fn test_teardown_releases_transport() {
        let transport = Arc::new(SimDevice::with_pipeline(1, program::p4info()));
        let session = Session::setup(transport.clone(), &option(), None).await.unwrap();
        let other = session.clone();
        assert!(Arc::strong_count(&transport) > 1);
        session.teardown().await;
        assert_eq!(Arc::strong_count(&transport), 1);
        assert!(matches!(other.write(vec![]).await, Err(Error::SessionClosed)));
    }

    #[tokio::test]
    async fn test_setup_pushes_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let p4info_path = dir.path().join("p4info.bin");
        let config_path = dir.path().join("out.o");
        std::fs::write(&p4info_path, prost::Message::encode_to_vec(&program::p4info())).unwrap();
        std::fs::write(&config_path, b"\x7fELF").unwrap();
        let pipeline = || Some(FwdPipeConfig::new(&p4info_path, &config_path));

        let device = SimDevice::new(1);
        let high = ConnectionOption {
            election_id: ElectionId::new(0, 10),
            ..option()
        };
        let session = Session::setup(Arc::new(device.clone()), &high, pipeline()).await.unwrap();
        assert_eq!(session.state(), SessionState::Active);

        let entry = session
            .repository()
            .table_entry("egress.tbl_vlan_egress", "strip_vlan")
            .unwrap()
            .with_match("istd.egress_port", "7")
            .unwrap()
            .build()
            .unwrap();
        entry.insert(&session).await.unwrap();
        assert_eq!(device.table_len("egress.tbl_vlan_egress"), 1);
        let filter = session
            .repository()
            .table_entry_without_action("egress.tbl_vlan_egress")
            .unwrap()
            .allow_partial_match()
            .build()
            .unwrap();
        assert_eq!(filter.read_all(&session).await.unwrap(), vec![entry]);

        // a backup never gets to push its pipeline
        let err = Session::setup(Arc::new(device.clone()), &option(), pipeline())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Arbitration { .. }));
        assert_eq!(device.table_len("egress.tbl_vlan_egress"), 1);
        session.teardown().await;
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        let o = ConnectionOption {
            address: "127.0.0.1:1".to_owned(),
            connect_timeout: Duration::from_millis(500),
            ..option()
        };
        match Session::connect(&o, None).await {
            Err(Error::Connection { address, .. }) => assert_eq!(address, "127.0.0.1:1"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
