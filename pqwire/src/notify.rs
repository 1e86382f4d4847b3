//! Asynchronous notification and notice.
use std::{future::poll_fn, task::Poll, time::Duration};

use crate::{
    Connection, Result,
    common::ByteStr,
    postgres::DbError,
};

/// Callback invoked for every `NoticeResponse`.
pub type NoticeHandler = Box<dyn FnMut(&DbError) + Send>;

/// A `NOTIFY` delivered by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Process id of the notifying backend.
    pub process_id: u32,
    pub channel: ByteStr,
    pub payload: ByteStr,
}

/// Notices are logged with `log` feature, otherwise discarded.
pub(crate) fn default_notice_handler(_notice: &DbError) {
    #[cfg(feature = "log")]
    log::info!("{_notice}");
}

impl Connection {
    /// Take the oldest received notification, without reading the socket.
    ///
    /// Call [`consume_input`][Connection::consume_input] first to pick up
    /// notification that arrived since.
    pub fn notifies(&mut self) -> Option<Notification> {
        self.notifies.pop_front()
    }

    /// Wait until a notification arrives.
    ///
    /// Returns `None` when `timeout` elapsed first.
    pub async fn wait_for_notify(&mut self, timeout: Option<Duration>) -> Result<Option<Notification>> {
        let wait = poll_fn(|cx| {
            loop {
                if let Some(err) = self.pending_error.take() {
                    return Poll::Ready(Err(err));
                }
                if let Err(err) = self.parse_input() {
                    return Poll::Ready(Err(self.fail(err)));
                }
                if let Some(notification) = self.notifies.pop_front() {
                    return Poll::Ready(Ok(notification));
                }
                let stream = match self.stream_mut() {
                    Ok(stream) => stream,
                    Err(err) => return Poll::Ready(Err(err)),
                };
                match stream.poll_fill(cx) {
                    Poll::Ready(Ok(())) => {},
                    Poll::Ready(Err(err)) => return Poll::Ready(Err(self.fail(err))),
                    Poll::Pending => return Poll::Pending,
                }
            }
        });

        match timeout {
            #[cfg(feature = "tokio")]
            Some(timeout) => match tokio::time::timeout(timeout, wait).await {
                Ok(notification) => notification.map(Some),
                Err(_) => Ok(None),
            },
            _ => wait.await.map(Some),
        }
    }
}
