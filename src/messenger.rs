//! Request/response bridge between the page agent and the background
//! agent.
//!
//! Every request travels in an [`Envelope`] with a correlation id and a
//! [`ReplySlot`]. The slot wraps a `oneshot` sender and is consumed by
//! [`ReplySlot::send`], so a request can be answered at most once; if the
//! handler drops the slot without answering, the caller gets
//! [`MessengerError::NoReply`] instead of waiting forever.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::models::{CaptureRecord, SaveReply};
use crate::notifier::NoticeKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    GetSelection,
    SaveHighlight {
        data: CaptureRecord,
    },
    ShowNotification {
        message: String,
        #[serde(rename = "type")]
        kind: NoticeKind,
    },
}

impl Request {
    pub fn action(&self) -> &'static str {
        match self {
            Request::GetSelection => "getSelection",
            Request::SaveHighlight { .. } => "saveHighlight",
            Request::ShowNotification { .. } => "showNotification",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Selection(CaptureRecord),
    Saved(SaveReply),
    Ack,
    /// The receiving side does not handle this kind of request.
    Unhandled(&'static str),
}

#[derive(Debug, Error)]
pub enum MessengerError {
    #[error("message channel closed")]
    Disconnected,
    #[error("request {0} was dropped without a reply")]
    NoReply(Uuid),
    #[error("unexpected reply to {action}: {response:?}")]
    Unexpected {
        action: &'static str,
        response: Response,
    },
}

/// Single-use reply handle for one request.
#[derive(Debug)]
pub struct ReplySlot {
    id: Uuid,
    tx: oneshot::Sender<Response>,
}

impl ReplySlot {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Answer the request. Consumes the slot.
    pub fn send(self, response: Response) {
        if self.tx.send(response).is_err() {
            tracing::debug!("requester for {} went away before the reply", self.id);
        }
    }
}

#[derive(Debug)]
pub struct Envelope {
    pub id: Uuid,
    pub request: Request,
    pub reply: ReplySlot,
}

/// Sending side of the bridge.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, request: Request) -> Result<Response, MessengerError>;

    async fn get_selection(&self) -> Result<CaptureRecord, MessengerError> {
        match self.send(Request::GetSelection).await? {
            Response::Selection(record) => Ok(record),
            other => Err(MessengerError::Unexpected {
                action: "getSelection",
                response: other,
            }),
        }
    }

    async fn save_highlight(&self, data: CaptureRecord) -> Result<SaveReply, MessengerError> {
        match self.send(Request::SaveHighlight { data }).await? {
            Response::Saved(reply) => Ok(reply),
            other => Err(MessengerError::Unexpected {
                action: "saveHighlight",
                response: other,
            }),
        }
    }

    async fn show_notification(
        &self,
        message: &str,
        kind: NoticeKind,
    ) -> Result<(), MessengerError> {
        match self
            .send(Request::ShowNotification {
                message: message.to_string(),
                kind,
            })
            .await?
        {
            Response::Ack => Ok(()),
            other => Err(MessengerError::Unexpected {
                action: "showNotification",
                response: other,
            }),
        }
    }
}

/// Receiving side of the bridge.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, request: Request) -> Response;
}

/// [`Messenger`] over an in-process `mpsc` queue.
#[derive(Clone)]
pub struct ChannelMessenger {
    tx: mpsc::Sender<Envelope>,
}

pub struct Inbox {
    rx: mpsc::Receiver<Envelope>,
}

impl Inbox {
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }
}

/// Create a connected messenger/inbox pair.
pub fn channel(capacity: usize) -> (ChannelMessenger, Inbox) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ChannelMessenger { tx }, Inbox { rx })
}

#[async_trait]
impl Messenger for ChannelMessenger {
    async fn send(&self, request: Request) -> Result<Response, MessengerError> {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        tracing::debug!("send {} ({})", request.action(), id);
        self.tx
            .send(Envelope {
                id,
                request,
                reply: ReplySlot { id, tx },
            })
            .await
            .map_err(|_| MessengerError::Disconnected)?;
        rx.await.map_err(|_| MessengerError::NoReply(id))
    }
}

/// Drain the inbox, answering each request through `handler` before
/// taking the next one. Returns the number of requests answered once
/// every sender is gone.
pub async fn serve<H>(mut inbox: Inbox, handler: &H) -> usize
where
    H: MessageHandler + ?Sized,
{
    let mut answered = 0;
    while let Some(envelope) = inbox.recv().await {
        let Envelope { id, request, reply } = envelope;
        tracing::debug!("handle {} ({})", request.action(), id);
        let response = handler.handle(request).await;
        reply.send(response);
        answered += 1;
    }
    answered
}
