//! Primary persistence channel
//!
//! The host application owns the preferred write path for positions. The core
//! sends it a request and waits (bounded) for an acknowledgement; anything other
//! than an ack sends the save down the fallback path.

use crate::error::ChannelError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Position save request sent to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavePositionRequest {
    pub request_id: Uuid,
    pub group_id: String,
    pub track_index: usize,
    pub position_ms: u64,
}

impl SavePositionRequest {
    pub fn new(group_id: impl Into<String>, track_index: usize, position_ms: u64) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            group_id: group_id.into(),
            track_index,
            position_ms,
        }
    }
}

/// Request/response save path to the host
///
/// The ack window is enforced by the caller.
#[async_trait]
pub trait PrimaryChannel: Send + Sync {
    async fn save_current_position(&self, request: SavePositionRequest) -> Result<(), ChannelError>;
}

/// One pending call delivered to the host side of a [`HostChannel`]
#[derive(Debug)]
pub struct HostSaveCall {
    pub request: SavePositionRequest,
    /// Host answers here; dropping it counts as a closed channel
    pub reply: oneshot::Sender<Result<(), ChannelError>>,
}

/// In-process [`PrimaryChannel`] backed by an mpsc queue
///
/// The host drains the receiver returned by [`HostChannel::new`] and answers
/// each call through its oneshot.
#[derive(Debug, Clone)]
pub struct HostChannel {
    tx: mpsc::Sender<HostSaveCall>,
}

impl HostChannel {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<HostSaveCall>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl PrimaryChannel for HostChannel {
    async fn save_current_position(&self, request: SavePositionRequest) -> Result<(), ChannelError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(HostSaveCall {
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ChannelError::Closed)?;
        reply_rx.await.map_err(|_| ChannelError::Closed)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_host_ack_round_trip() {
        let (channel, mut calls) = HostChannel::new(4);
        let host = tokio::spawn(async move {
            let call = calls.recv().await.unwrap();
            assert_eq!(call.request.track_index, 3);
            call.reply.send(Ok(())).unwrap();
        });

        let result = channel
            .save_current_position(SavePositionRequest::new("book", 3, 1200))
            .await;
        assert_eq!(result, Ok(()));
        host.await.unwrap();
    }

    #[tokio::test]
    async fn test_host_unimplemented_is_reported() {
        let (channel, mut calls) = HostChannel::new(4);
        tokio::spawn(async move {
            while let Some(call) = calls.recv().await {
                let _ = call.reply.send(Err(ChannelError::Unimplemented));
            }
        });

        let result = channel
            .save_current_position(SavePositionRequest::new("book", 0, 0))
            .await;
        assert_eq!(result, Err(ChannelError::Unimplemented));
    }

    #[tokio::test]
    async fn test_dropped_host_is_closed() {
        let (channel, calls) = HostChannel::new(4);
        drop(calls);

        let result = channel
            .save_current_position(SavePositionRequest::new("book", 0, 0))
            .await;
        assert_eq!(result, Err(ChannelError::Closed));
    }

    #[test]
    fn test_request_ids_are_unique() {
        let a = SavePositionRequest::new("book", 0, 0);
        let b = SavePositionRequest::new("book", 0, 0);
        assert_ne!(a.request_id, b.request_id);
    }
}
