//! An in-process P4Runtime target.
//!
//! `SimDevice` keeps tables and indirect counters in memory and arbitrates
//! between every session attached to it. Clones share the same device, so
//! several sessions can be set up against one simulated switch.

use crate::p4rt::pipeconf::PipelineCatalog;
use crate::p4rt::pure::encode_write_errors;
use crate::p4rt::transport::{P4RuntimeTransport, ResponseStream};
use crate::representation::ElectionId;
use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, info};
use parking_lot::Mutex;
use rusty_p4_shell_proto::google::rpc;
use rusty_p4_shell_proto::proto::config::v1::P4Info;
use rusty_p4_shell_proto::proto::v1 as p4;
use rusty_p4_shell_proto::proto::v1::{
    get_forwarding_pipeline_config_request::ResponseType,
    set_forwarding_pipeline_config_request::Action as PipelineAction, stream_message_request,
    stream_message_response, update, ForwardingPipelineConfig, GetForwardingPipelineConfigRequest,
    GetForwardingPipelineConfigResponse, MasterArbitrationUpdate, ReadRequest, ReadResponse,
    SetForwardingPipelineConfigRequest, SetForwardingPipelineConfigResponse, StreamMessageRequest,
    StreamMessageResponse, WriteRequest, WriteResponse,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, UnboundedReceiverStream};
use tonic::{Code, Status};

pub mod program;

/// Election id of the controller that takes over on [`SimDevice::preempt`].
pub const PREEMPTING_ELECTION_ID: ElectionId = ElectionId {
    high: u64::MAX,
    low: u64::MAX,
};

type UpdateResult = std::result::Result<(), (Code, String)>;

struct Controller {
    seq: u64,
    election_id: Option<ElectionId>,
    responses: mpsc::UnboundedSender<std::result::Result<StreamMessageResponse, Status>>,
}

struct State {
    device_id: u64,
    config: Option<ForwardingPipelineConfig>,
    catalog: Option<Arc<PipelineCatalog>>,
    controllers: Vec<Controller>,
    next_seq: u64,
    preempted: bool,
    preempt_after: Option<usize>,
    tables: HashMap<u32, BTreeMap<Vec<u8>, p4::TableEntry>>,
    counters: HashMap<u32, Vec<p4::CounterData>>,
    read_chunk: usize,
    write_delay: Option<Duration>,
}

#[derive(Clone)]
pub struct SimDevice {
    inner: Arc<Mutex<State>>,
}

impl SimDevice {
    /// A device with no pipeline; the first session must push one.
    pub fn new(device_id: u64) -> SimDevice {
        SimDevice {
            inner: Arc::new(Mutex::new(State {
                device_id,
                config: None,
                catalog: None,
                controllers: vec![],
                next_seq: 0,
                preempted: false,
                preempt_after: None,
                tables: HashMap::new(),
                counters: HashMap::new(),
                read_chunk: 64,
                write_delay: None,
            })),
        }
    }

    pub fn with_pipeline(device_id: u64, p4info: P4Info) -> SimDevice {
        let device = SimDevice::new(device_id);
        device.inner.lock().install(ForwardingPipelineConfig {
            p4info: Some(p4info),
            p4_device_config: Default::default(),
            cookie: None,
        });
        device
    }

    /// Number of entries currently installed in `table`.
    pub fn table_len(&self, table: &str) -> usize {
        let state = self.inner.lock();
        let id = match state.catalog.as_ref().and_then(|c| c.table(table).ok()) {
            Some(t) => t.id,
            None => return 0,
        };
        state.tables.get(&id).map(|t| t.len()).unwrap_or(0)
    }

    /// Adds traffic to one counter cell, as the data plane would.
    pub fn bump_counter(&self, counter: &str, index: usize, packets: i64, bytes: i64) {
        let mut state = self.inner.lock();
        let id = match state.catalog.as_ref().and_then(|c| c.counter(counter).ok()) {
            Some(c) => c.id,
            None => return,
        };
        if let Some(cell) = state.counters.get_mut(&id).and_then(|c| c.get_mut(index)) {
            cell.packet_count += packets;
            cell.byte_count += bytes;
        }
    }

    pub fn primary(&self) -> Option<ElectionId> {
        self.inner.lock().primary().map(|(_, id)| id)
    }

    pub fn controllers(&self) -> usize {
        self.inner.lock().controllers.len()
    }

    /// A controller with [`PREEMPTING_ELECTION_ID`] takes primacy now.
    pub fn preempt(&self) {
        let mut state = self.inner.lock();
        state.preempted = true;
        state.notify_all();
    }

    /// Preempts once `writes` more `Write` RPCs have been served.
    pub fn preempt_after_writes(&self, writes: usize) {
        let mut state = self.inner.lock();
        if writes == 0 {
            state.preempted = true;
            state.notify_all();
        } else {
            state.preempt_after = Some(writes);
        }
    }

    /// Entities per `ReadResponse`.
    pub fn set_read_chunk(&self, entities: usize) {
        self.inner.lock().read_chunk = entities.max(1);
    }

    /// Holds every `Write` for `delay` before serving it.
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        self.inner.lock().write_delay = delay;
    }
}

impl State {
    fn install(&mut self, config: ForwardingPipelineConfig) {
        let catalog = Arc::new(PipelineCatalog::new(config.p4info.clone().unwrap_or_default()));
        self.tables.clear();
        self.counters = catalog
            .counters()
            .iter()
            .map(|c| (c.id, vec![p4::CounterData::default(); c.size.max(0) as usize]))
            .collect();
        self.catalog = Some(catalog);
        self.config = Some(config);
    }

    /// Sequence number and election id of the primary controller. The highest
    /// election id wins; among equal ids the earliest controller keeps primacy.
    fn primary(&self) -> Option<(Option<u64>, ElectionId)> {
        if self.preempted {
            return Some((None, PREEMPTING_ELECTION_ID));
        }
        let mut best: Option<(u64, ElectionId)> = None;
        for c in self.controllers.iter() {
            if let Some(id) = c.election_id {
                if best.map_or(true, |(_, b)| id > b) {
                    best = Some((c.seq, id));
                }
            }
        }
        best.map(|(seq, id)| (Some(seq), id))
    }

    fn is_primary(&self, election_id: Option<ElectionId>) -> bool {
        match (self.primary(), election_id) {
            (Some((Some(_), primary)), Some(id)) => primary == id,
            _ => false,
        }
    }

    fn notify_all(&self) {
        let primary = self.primary();
        for c in self.controllers.iter().filter(|c| c.election_id.is_some()) {
            let is_primary = matches!(primary, Some((Some(seq), _)) if seq == c.seq);
            let status = if is_primary {
                rpc::Status {
                    code: Code::Ok as i32,
                    message: "primary".to_owned(),
                    details: vec![],
                }
            } else {
                rpc::Status {
                    code: Code::AlreadyExists as i32,
                    message: "another controller is primary".to_owned(),
                    details: vec![],
                }
            };
            let update = MasterArbitrationUpdate {
                device_id: self.device_id,
                election_id: primary.map(|(_, id)| id.into()),
                status: Some(status),
            };
            let _ = c.responses.send(Ok(StreamMessageResponse {
                update: Some(stream_message_response::Update::Arbitration(update)),
            }));
        }
    }

    fn check_device(&self, device_id: u64) -> std::result::Result<(), Status> {
        if device_id != self.device_id {
            return Err(Status::not_found(format!("device {} not found", device_id)));
        }
        Ok(())
    }

    fn catalog(&self) -> std::result::Result<Arc<PipelineCatalog>, Status> {
        self.catalog
            .clone()
            .ok_or_else(|| Status::failed_precondition("no forwarding pipeline config"))
    }

    fn apply(&mut self, catalog: &PipelineCatalog, update: p4::Update) -> UpdateResult {
        let update_type = update::Type::try_from(update.r#type).unwrap_or(update::Type::Unspecified);
        match update.entity.and_then(|e| e.entity) {
            Some(p4::entity::Entity::TableEntry(entry)) => {
                self.apply_table_entry(catalog, update_type, entry)
            }
            Some(p4::entity::Entity::CounterEntry(_)) => {
                Err((Code::Unimplemented, "counter writes are not supported".to_owned()))
            }
            None => Err((Code::InvalidArgument, "empty entity".to_owned())),
        }
    }

    fn apply_table_entry(
        &mut self,
        catalog: &PipelineCatalog,
        update_type: update::Type,
        entry: p4::TableEntry,
    ) -> UpdateResult {
        let table = catalog
            .table_by_id(entry.table_id)
            .ok_or_else(|| (Code::NotFound, format!("table {} not found", entry.table_id)))?;
        for m in entry.r#match.iter() {
            if table.match_field_by_id(m.field_id).is_none() {
                return Err((
                    Code::InvalidArgument,
                    format!("unknown match field {} in {}", m.field_id, table.name),
                ));
            }
        }
        for f in table.match_fields.iter() {
            if f.kind == crate::p4rt::pipeconf::MatchKind::Exact
                && !entry.r#match.iter().any(|m| m.field_id == f.id)
            {
                return Err((Code::InvalidArgument, format!("missing exact match on {}", f.name)));
            }
        }
        if table.needs_priority() != (entry.priority != 0) {
            return Err((Code::InvalidArgument, format!("invalid priority {}", entry.priority)));
        }

        let key = entry_key(&entry);
        let entries = self.tables.entry(table.id).or_default();
        match update_type {
            update::Type::Insert => {
                if entry.action.is_none() {
                    return Err((Code::InvalidArgument, "missing action".to_owned()));
                }
                if entries.contains_key(&key) {
                    return Err((Code::AlreadyExists, "entry already exists".to_owned()));
                }
                if table.size > 0 && entries.len() as i64 >= table.size {
                    return Err((Code::ResourceExhausted, format!("{} is full", table.name)));
                }
                entries.insert(key, entry);
            }
            update::Type::Modify => {
                if entry.action.is_none() {
                    return Err((Code::InvalidArgument, "missing action".to_owned()));
                }
                match entries.get_mut(&key) {
                    Some(existing) => *existing = entry,
                    None => return Err((Code::NotFound, "entry not found".to_owned())),
                }
            }
            update::Type::Delete => {
                if entries.remove(&key).is_none() {
                    return Err((Code::NotFound, "entry not found".to_owned()));
                }
            }
            update::Type::Unspecified => {
                return Err((Code::InvalidArgument, "unspecified update type".to_owned()))
            }
        }
        Ok(())
    }

    fn read_tables(
        &self,
        catalog: &PipelineCatalog,
        filter: &p4::TableEntry,
        out: &mut Vec<p4::Entity>,
    ) -> std::result::Result<(), Status> {
        let mut ids: Vec<u32> = if filter.table_id == 0 {
            catalog.tables().iter().map(|t| t.id).collect()
        } else {
            catalog
                .table_by_id(filter.table_id)
                .map(|t| vec![t.id])
                .ok_or_else(|| Status::not_found(format!("table {} not found", filter.table_id)))?
        };
        ids.sort_unstable();
        for id in ids {
            let entries = match self.tables.get(&id) {
                Some(entries) => entries,
                None => continue,
            };
            let matching = entries.values().filter(|e| {
                filter.r#match.iter().all(|m| e.r#match.contains(m))
                    && (filter.priority == 0 || filter.priority == e.priority)
            });
            out.extend(matching.map(|e| p4::Entity {
                entity: Some(p4::entity::Entity::TableEntry(e.clone())),
            }));
        }
        Ok(())
    }

    fn read_counters(
        &self,
        filter: &p4::CounterEntry,
        out: &mut Vec<p4::Entity>,
    ) -> std::result::Result<(), Status> {
        let mut ids: Vec<u32> = if filter.counter_id == 0 {
            self.counters.keys().copied().collect()
        } else if self.counters.contains_key(&filter.counter_id) {
            vec![filter.counter_id]
        } else {
            return Err(Status::not_found(format!("counter {} not found", filter.counter_id)));
        };
        ids.sort_unstable();
        for id in ids {
            let cells = &self.counters[&id];
            let indices: Vec<usize> = match filter.index.as_ref() {
                Some(p4::Index { index }) => {
                    if *index < 0 || *index as usize >= cells.len() {
                        return Err(Status::out_of_range(format!("index {} out of range", index)));
                    }
                    vec![*index as usize]
                }
                None => (0..cells.len()).collect(),
            };
            out.extend(indices.into_iter().map(|i| p4::Entity {
                entity: Some(p4::entity::Entity::CounterEntry(p4::CounterEntry {
                    counter_id: id,
                    index: Some(p4::Index { index: i as i64 }),
                    data: Some(cells[i].clone()),
                })),
            }));
        }
        Ok(())
    }
}

/// Identity of an entry inside its table: the match key and priority.
fn entry_key(entry: &p4::TableEntry) -> Vec<u8> {
    let mut r#match = entry.r#match.clone();
    r#match.sort_by_key(|m| m.field_id);
    prost::Message::encode_to_vec(&p4::TableEntry {
        table_id: entry.table_id,
        r#match,
        priority: entry.priority,
        ..Default::default()
    })
}

#[async_trait]
impl P4RuntimeTransport for SimDevice {
    async fn stream_channel(
        &self,
        requests: ReceiverStream<StreamMessageRequest>,
    ) -> std::result::Result<ResponseStream<StreamMessageResponse>, Status> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let seq = {
            let mut state = self.inner.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.controllers.push(Controller {
                seq,
                election_id: None,
                responses: sender,
            });
            seq
        };
        let device = self.clone();
        tokio::spawn(async move {
            let mut requests = requests;
            while let Some(request) = requests.next().await {
                let update = match request.update {
                    Some(stream_message_request::Update::Arbitration(update)) => update,
                    None => continue,
                };
                let mut state = device.inner.lock();
                if let Err(status) = state.check_device(update.device_id) {
                    if let Some(c) = state.controllers.iter().find(|c| c.seq == seq) {
                        let _ = c.responses.send(Err(status));
                    }
                    break;
                }
                let election_id = update.election_id.map(ElectionId::from);
                if let Some(c) = state.controllers.iter_mut().find(|c| c.seq == seq) {
                    c.election_id = election_id;
                }
                debug!(target: "sim", "controller {} arbitrates with {:?}", seq, election_id);
                state.notify_all();
            }
            let mut state = device.inner.lock();
            let was_primary = matches!(state.primary(), Some((Some(p), _)) if p == seq);
            state.controllers.retain(|c| c.seq != seq);
            debug!(target: "sim", "controller {} left", seq);
            if was_primary {
                state.notify_all();
            }
        });
        Ok(UnboundedReceiverStream::new(receiver).boxed())
    }

    async fn write(&self, request: WriteRequest) -> std::result::Result<WriteResponse, Status> {
        let delay = self.inner.lock().write_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.inner.lock();
        state.check_device(request.device_id)?;
        if !state.is_primary(request.election_id.map(ElectionId::from)) {
            return Err(Status::permission_denied("not primary"));
        }
        let catalog = state.catalog()?;

        let mut failed = false;
        let mut errors = Vec::with_capacity(request.updates.len());
        for update in request.updates {
            let error = match state.apply(&catalog, update) {
                Ok(()) => p4::Error {
                    canonical_code: Code::Ok as i32,
                    ..Default::default()
                },
                Err((code, message)) => {
                    failed = true;
                    p4::Error {
                        canonical_code: code as i32,
                        message,
                        ..Default::default()
                    }
                }
            };
            errors.push(error);
        }

        if let Some(left) = state.preempt_after {
            if left <= 1 {
                state.preempt_after = None;
                state.preempted = true;
                info!(target: "sim", "device {} preempted", state.device_id);
                state.notify_all();
            } else {
                state.preempt_after = Some(left - 1);
            }
        }

        if failed {
            let details = encode_write_errors(Code::Unknown, "Write failure", errors);
            return Err(Status::with_details(Code::Unknown, "Write failure", details));
        }
        Ok(WriteResponse {})
    }

    async fn read(
        &self,
        request: ReadRequest,
    ) -> std::result::Result<ResponseStream<ReadResponse>, Status> {
        let state = self.inner.lock();
        state.check_device(request.device_id)?;
        let catalog = state.catalog()?;
        let mut entities = vec![];
        for entity in request.entities {
            match entity.entity {
                Some(p4::entity::Entity::TableEntry(filter)) => {
                    state.read_tables(&catalog, &filter, &mut entities)?
                }
                Some(p4::entity::Entity::CounterEntry(filter)) => {
                    state.read_counters(&filter, &mut entities)?
                }
                None => return Err(Status::invalid_argument("empty entity")),
            }
        }
        let responses: Vec<std::result::Result<ReadResponse, Status>> = entities
            .chunks(state.read_chunk)
            .map(|chunk| {
                Ok(ReadResponse {
                    entities: chunk.to_vec(),
                })
            })
            .collect();
        Ok(futures::stream::iter(responses).boxed())
    }

    async fn set_forwarding_pipeline_config(
        &self,
        request: SetForwardingPipelineConfigRequest,
    ) -> std::result::Result<SetForwardingPipelineConfigResponse, Status> {
        let mut state = self.inner.lock();
        state.check_device(request.device_id)?;
        if !state.is_primary(request.election_id.map(ElectionId::from)) {
            return Err(Status::permission_denied("not primary"));
        }
        let config = match request.config {
            Some(config) if config.p4info.is_some() => config,
            _ => return Err(Status::invalid_argument("config without p4info")),
        };
        match PipelineAction::try_from(request.action) {
            Ok(PipelineAction::Verify) | Ok(PipelineAction::VerifyAndSave) => {}
            Ok(PipelineAction::VerifyAndCommit)
            | Ok(PipelineAction::Commit)
            | Ok(PipelineAction::ReconcileAndCommit) => {
                info!(target: "sim", "device {} committed a new pipeline", state.device_id);
                state.install(config);
            }
            _ => return Err(Status::invalid_argument("unspecified action")),
        }
        Ok(SetForwardingPipelineConfigResponse {})
    }

    async fn get_forwarding_pipeline_config(
        &self,
        request: GetForwardingPipelineConfigRequest,
    ) -> std::result::Result<GetForwardingPipelineConfigResponse, Status> {
        let state = self.inner.lock();
        state.check_device(request.device_id)?;
        let mut config = state
            .config
            .clone()
            .ok_or_else(|| Status::failed_precondition("no forwarding pipeline config"))?;
        match ResponseType::try_from(request.response_type) {
            Ok(ResponseType::CookieOnly) => {
                config.p4info = None;
                config.p4_device_config = Default::default();
            }
            Ok(ResponseType::P4infoAndCookie) => config.p4_device_config = Default::default(),
            Ok(ResponseType::DeviceConfigAndCookie) => config.p4info = None,
            _ => {}
        }
        Ok(GetForwardingPipelineConfigResponse {
            config: Some(config),
        })
    }
}
