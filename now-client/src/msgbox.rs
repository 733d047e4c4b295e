//! Message box requests awaiting a user response.

use crate::error::ClientError;
use now_proto::session::MsgBoxResponse;
use now_proto::NowStatusError;
use tokio::sync::oneshot;

/// A message box shown in the remote session, waiting for the user.
#[derive(Debug)]
pub struct PendingMsgBox {
    request_id: u32,
    response: oneshot::Receiver<Result<MsgBoxResponse, NowStatusError>>,
}

impl PendingMsgBox {
    pub(crate) fn new(
        request_id: u32,
        response: oneshot::Receiver<Result<MsgBoxResponse, NowStatusError>>,
    ) -> Self {
        Self {
            request_id,
            response,
        }
    }

    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    /// Waits for the button the user pressed.
    ///
    /// A failure reported by the peer is returned as [`ClientError::Status`].
    pub async fn response(self) -> Result<MsgBoxResponse, ClientError> {
        match self.response.await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(status)) => Err(ClientError::Status(status)),
            Err(_) => Err(ClientError::WorkerTerminated),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use now_proto::NowErrorCode;

    #[tokio::test]
    async fn test_response() {
        let (tx, rx) = oneshot::channel();
        let pending = PendingMsgBox::new(4, rx);
        assert_eq!(pending.request_id(), 4);

        tx.send(Ok(MsgBoxResponse::Yes)).unwrap();
        assert_eq!(pending.response().await.unwrap(), MsgBoxResponse::Yes);
    }

    #[tokio::test]
    async fn test_error_status() {
        let (tx, rx) = oneshot::channel();
        tx.send(Err(NowStatusError::now(NowErrorCode::AccessDenied)))
            .unwrap();
        assert!(matches!(
            PendingMsgBox::new(1, rx).response().await,
            Err(ClientError::Status(_))
        ));
    }

    #[tokio::test]
    async fn test_dropped_sender() {
        let (tx, rx) = oneshot::channel();
        drop(tx);
        assert!(matches!(
            PendingMsgBox::new(1, rx).response().await,
            Err(ClientError::WorkerTerminated)
        ));
    }
}
