use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use log::debug;
use rusty_p4_shell_proto::proto::v1::p4_runtime_client::P4RuntimeClient;
use rusty_p4_shell_proto::proto::v1::{
    GetForwardingPipelineConfigRequest, GetForwardingPipelineConfigResponse, ReadRequest,
    ReadResponse, SetForwardingPipelineConfigRequest, SetForwardingPipelineConfigResponse,
    StreamMessageRequest, StreamMessageResponse, WriteRequest, WriteResponse,
};
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Status;

pub type ResponseStream<T> = BoxStream<'static, std::result::Result<T, Status>>;

/// The P4Runtime service as seen by a session. Implemented over gRPC by
/// [`GrpcTransport`] and in-process by [`crate::sim::SimDevice`].
#[async_trait]
pub trait P4RuntimeTransport: Send + Sync + 'static {
    async fn stream_channel(
        &self,
        requests: ReceiverStream<StreamMessageRequest>,
    ) -> std::result::Result<ResponseStream<StreamMessageResponse>, Status>;

    async fn write(&self, request: WriteRequest) -> std::result::Result<WriteResponse, Status>;

    async fn read(
        &self,
        request: ReadRequest,
    ) -> std::result::Result<ResponseStream<ReadResponse>, Status>;

    async fn set_forwarding_pipeline_config(
        &self,
        request: SetForwardingPipelineConfigRequest,
    ) -> std::result::Result<SetForwardingPipelineConfigResponse, Status>;

    async fn get_forwarding_pipeline_config(
        &self,
        request: GetForwardingPipelineConfigRequest,
    ) -> std::result::Result<GetForwardingPipelineConfigResponse, Status>;
}

#[derive(Clone, Debug)]
pub struct GrpcTransport {
    client: P4RuntimeClient,
}

impl GrpcTransport {
    pub async fn connect(address: &str, timeout: Duration) -> Result<GrpcTransport> {
        let unreachable = |reason: String| Error::Connection {
            address: address.to_owned(),
            reason,
        };
        let endpoint = tonic::transport::Endpoint::from_shared(format!("http://{}", address))
            .map_err(|e| unreachable(e.to_string()))?
            .connect_timeout(timeout);
        let channel = endpoint
            .connect()
            .await
            .map_err(|e| unreachable(e.to_string()))?;
        debug!(target: "transport", "connected to {}", address);
        Ok(GrpcTransport {
            client: P4RuntimeClient::new(channel),
        })
    }
}

#[async_trait]
impl P4RuntimeTransport for GrpcTransport {
    async fn stream_channel(
        &self,
        requests: ReceiverStream<StreamMessageRequest>,
    ) -> std::result::Result<ResponseStream<StreamMessageResponse>, Status> {
        let mut client = self.client.clone();
        let response = client.stream_channel(requests).await?;
        Ok(response.into_inner().boxed())
    }

    async fn write(&self, request: WriteRequest) -> std::result::Result<WriteResponse, Status> {
        let mut client = self.client.clone();
        client.write(request).await.map(|r| r.into_inner())
    }

    async fn read(
        &self,
        request: ReadRequest,
    ) -> std::result::Result<ResponseStream<ReadResponse>, Status> {
        let mut client = self.client.clone();
        let response = client.read(request).await?;
        Ok(response.into_inner().boxed())
    }

    async fn set_forwarding_pipeline_config(
        &self,
        request: SetForwardingPipelineConfigRequest,
    ) -> std::result::Result<SetForwardingPipelineConfigResponse, Status> {
        let mut client = self.client.clone();
        client
            .set_forwarding_pipeline_config(request)
            .await
            .map(|r| r.into_inner())
    }

    async fn get_forwarding_pipeline_config(
        &self,
        request: GetForwardingPipelineConfigRequest,
    ) -> std::result::Result<GetForwardingPipelineConfigResponse, Status> {
        let mut client = self.client.clone();
        client
            .get_forwarding_pipeline_config(request)
            .await
            .map(|r| r.into_inner())
    }
}
