use crate::entity::UpdateType;
use crate::representation::ElectionId;
use bytes::Bytes;
use rusty_p4_shell_proto::google::protobuf::Any;
use rusty_p4_shell_proto::google::rpc;
use rusty_p4_shell_proto::proto::config::v1::P4Info;
use rusty_p4_shell_proto::proto::v1::{
    get_forwarding_pipeline_config_request, set_forwarding_pipeline_config_request,
    stream_message_request, Entity, ForwardingPipelineConfig, GetForwardingPipelineConfigRequest,
    MasterArbitrationUpdate, ReadRequest, SetForwardingPipelineConfigRequest, StreamMessageRequest,
    Update, WriteRequest,
};

pub const P4_ERROR_TYPE_URL: &str = "type.googleapis.com/p4.v1.Error";

pub fn new_master_update_request(device_id: u64, election_id: ElectionId) -> StreamMessageRequest {
    StreamMessageRequest {
        update: Some(stream_message_request::Update::Arbitration(
            MasterArbitrationUpdate {
                device_id,
                election_id: Some(election_id.into()),
                status: None,
            },
        )),
    }
}

pub fn new_update(update: UpdateType, entity: Entity) -> Update {
    let update_type: rusty_p4_shell_proto::proto::v1::update::Type = update.into();
    Update {
        r#type: update_type as i32,
        entity: Some(entity),
    }
}

pub fn new_write_request(device_id: u64, election_id: ElectionId, updates: Vec<Update>) -> WriteRequest {
    WriteRequest {
        device_id,
        role_id: 0,
        election_id: Some(election_id.into()),
        updates,
        atomicity: 0,
    }
}

pub fn new_read_request(device_id: u64, entities: Vec<Entity>) -> ReadRequest {
    ReadRequest {
        device_id,
        role_id: 0,
        entities,
    }
}

pub fn new_set_forwarding_pipeline_config_request(
    device_id: u64,
    election_id: ElectionId,
    p4info: P4Info,
    device_config: Bytes,
) -> SetForwardingPipelineConfigRequest {
    SetForwardingPipelineConfigRequest {
        device_id,
        role_id: 0,
        election_id: Some(election_id.into()),
        action: set_forwarding_pipeline_config_request::Action::VerifyAndCommit.into(),
        config: Some(ForwardingPipelineConfig {
            p4info: Some(p4info),
            p4_device_config: device_config,
            cookie: None,
        }),
    }
}

pub fn new_get_p4info_request(device_id: u64) -> GetForwardingPipelineConfigRequest {
    GetForwardingPipelineConfigRequest {
        device_id,
        response_type: get_forwarding_pipeline_config_request::ResponseType::P4infoAndCookie.into(),
    }
}

/// Per-update `p4.v1.Error` records carried in the details of a failed write.
///
/// Returns an empty list when the status carries no such details.
pub fn decode_write_errors(details: &[u8]) -> Vec<rusty_p4_shell_proto::proto::v1::Error> {
    let status: rpc::Status = match prost::Message::decode(details) {
        Ok(status) => status,
        Err(_) => return vec![],
    };
    status
        .details
        .iter()
        .filter(|any| any.type_url.ends_with("p4.v1.Error"))
        .filter_map(|any| prost::Message::decode(any.value.as_ref()).ok())
        .collect()
}

/// Inverse of [`decode_write_errors`].
pub fn encode_write_errors(
    code: tonic::Code,
    message: &str,
    errors: Vec<rusty_p4_shell_proto::proto::v1::Error>,
) -> Bytes {
    let status = rpc::Status {
        code: code as i32,
        message: message.to_owned(),
        details: errors
            .into_iter()
            .map(|e| Any {
                type_url: P4_ERROR_TYPE_URL.to_owned(),
                value: Bytes::from(prost::Message::encode_to_vec(&e)),
            })
            .collect(),
    };
    Bytes::from(prost::Message::encode_to_vec(&status))
}
