//! [`ClientStream`] over a tonic channel for server-streaming calls.

use std::marker::PhantomData;

use async_trait::async_trait;
use prost::Message;
use tonic::client::{Grpc, GrpcService};
use tonic::codegen::http::uri::{InvalidUri, PathAndQuery};
use tonic::codegen::{Body, Bytes, StdError};
use tonic::{Status, Streaming};

use crate::method::CachedMethod;
use crate::stream::ClientStream;

/// A server-streaming call: one request out, a stream of responses back.
///
/// The call is opened by the first `send_msg`; reading before that is an
/// error.
pub struct GrpcServerStream<T, Req, Resp> {
    grpc: Grpc<T>,
    path: PathAndQuery,
    response: Option<Streaming<Resp>>,
    _request: PhantomData<fn(Req)>,
}

impl<T, Req, Resp> GrpcServerStream<T, Req, Resp> {
    pub fn new(inner: T, path: PathAndQuery) -> Self {
        Self {
            grpc: Grpc::new(inner),
            path,
            response: None,
            _request: PhantomData,
        }
    }

    /// Stream for `method` over `inner`.
    pub fn open(inner: T, method: &CachedMethod) -> Result<Self, InvalidUri> {
        let path = PathAndQuery::try_from(method.path())?;
        Ok(Self::new(inner, path))
    }

    pub fn path(&self) -> &str {
        self.path.as_str()
    }
}

#[async_trait]
impl<T, Req, Resp> ClientStream for GrpcServerStream<T, Req, Resp>
where
    T: GrpcService<tonic::body::Body> + Send,
    T::Error: Into<StdError>,
    T::Future: Send,
    T::ResponseBody: Body<Data = Bytes> + Send + 'static,
    <T::ResponseBody as Body>::Error: Into<StdError> + Send,
    Req: Message + Clone + 'static,
    Resp: Message + Default + 'static,
{
    type Request = Req;
    type Response = Resp;

    async fn send_msg(&mut self, request: &Req) -> Result<(), Status> {
        self.grpc
            .ready()
            .await
            .map_err(|e| Status::unknown(format!("Service was not ready: {}", e.into())))?;
        let codec = tonic_prost::ProstCodec::default();
        let response = self
            .grpc
            .server_streaming(tonic::Request::new(request.clone()), self.path.clone(), codec)
            .await?;
        self.response = Some(response.into_inner());
        Ok(())
    }

    async fn recv_msg(&mut self) -> Result<Option<Resp>, Status> {
        match self.response.as_mut() {
            Some(stream) => stream.message().await,
            None => Err(Status::failed_precondition(
                "response stream read before the request was sent",
            )),
        }
    }
}
