//! The client-side stream seam the interceptor wraps.

use async_trait::async_trait;
use prost::Message;
use tonic::Status;

/// One side of an open client call: send requests, read responses.
///
/// Message types are fixed per stream, so a cached reply can only ever be
/// replayed into the response type it was recorded from.
#[async_trait]
pub trait ClientStream: Send {
    type Request: Message + 'static;
    type Response: Message + Default + 'static;

    /// Send one request message.
    async fn send_msg(&mut self, request: &Self::Request) -> Result<(), Status>;

    /// Receive the next response; `Ok(None)` marks end of stream.
    async fn recv_msg(&mut self) -> Result<Option<Self::Response>, Status>;
}
