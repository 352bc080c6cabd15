//! Streaming handles for partial upload and partial download.
//!
//! Both directions model window credits as channel capacity: a bounded
//! channel of capacity W holds at most W un-acknowledged parts, and
//! receiving a part is the acknowledgement that restores one credit. An
//! unbounded window is an unbounded channel. A dropped receiver is how
//! either side observes the other's death.

use std::fmt;

use bytes::Bytes;
use http::HeaderMap;
use tokio::sync::mpsc;

use crate::error::{HalyardError, HalyardResult};

// ============================================================================
// Upload
// ============================================================================

/// One message from the caller to the upload loop.
pub(crate) enum UploadPart {
    Data(Bytes),
    /// End of body. Chunked uploads write the `0\r\n\r\n` terminator,
    /// identity uploads write nothing.
    Eob,
    /// End of body with trailers; only legal in chunked mode.
    Trailers(HeaderMap),
}

/// Caller side of a streamed upload.
///
/// Sending suspends once `window` parts are in flight and resumes as the
/// worker writes them out. Dropping the handle without [`finish`] aborts
/// the exchange; the error surfaces on the request future.
///
/// [`finish`]: UploadHandle::finish
pub struct UploadHandle {
    tx: mpsc::Sender<UploadPart>,
}

impl UploadHandle {
    /// Queue one body part.
    ///
    /// Fails only when the exchange has already failed; the cause is on the
    /// request future.
    pub async fn send(&self, data: impl Into<Bytes>) -> HalyardResult<()> {
        self.tx
            .send(UploadPart::Data(data.into()))
            .await
            .map_err(|_| HalyardError::ConnectionClosed)
    }

    /// Terminate the body.
    pub async fn finish(self) -> HalyardResult<()> {
        self.tx
            .send(UploadPart::Eob)
            .await
            .map_err(|_| HalyardError::ConnectionClosed)
    }

    /// Terminate the body with trailers. Requires a chunked upload; identity
    /// uploads fail the exchange with `TrailersNotAllowed`.
    pub async fn finish_with_trailers(self, trailers: HeaderMap) -> HalyardResult<()> {
        self.tx
            .send(UploadPart::Trailers(trailers))
            .await
            .map_err(|_| HalyardError::ConnectionClosed)
    }
}

impl fmt::Debug for UploadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadHandle").finish_non_exhaustive()
    }
}

pub(crate) fn upload_channel(window: usize) -> (UploadHandle, mpsc::Receiver<UploadPart>) {
    let (tx, rx) = mpsc::channel(window.max(1));
    (UploadHandle { tx }, rx)
}

// ============================================================================
// Download
// ============================================================================

/// One message from the download loop to the caller.
pub(crate) enum BodyPart {
    Data(Bytes),
    /// End of body, carrying the trailer set (empty when there were none).
    Eob(HeaderMap),
    /// The body failed mid-stream; terminal.
    Failed(HalyardError),
}

pub(crate) enum PartSender {
    Bounded(mpsc::Sender<BodyPart>),
    Unbounded(mpsc::UnboundedSender<BodyPart>),
}

impl PartSender {
    /// Send one part, suspending while the window is exhausted. `Err` means
    /// the caller dropped its reader.
    pub(crate) async fn send(&self, part: BodyPart) -> Result<(), ()> {
        match self {
            PartSender::Bounded(tx) => tx.send(part).await.map_err(|_| ()),
            PartSender::Unbounded(tx) => tx.send(part).map_err(|_| ()),
        }
    }
}

pub(crate) enum PartReceiver {
    Bounded(mpsc::Receiver<BodyPart>),
    Unbounded(mpsc::UnboundedReceiver<BodyPart>),
}

impl PartReceiver {
    async fn recv(&mut self) -> Option<BodyPart> {
        match self {
            PartReceiver::Bounded(rx) => rx.recv().await,
            PartReceiver::Unbounded(rx) => rx.recv().await,
        }
    }
}

/// `window = None` is an unbounded channel; `Some(w)` bounds the un-acked
/// parts in flight to `w`.
pub(crate) fn part_channel(window: Option<usize>) -> (PartSender, PartReceiver) {
    match window {
        Some(w) => {
            let (tx, rx) = mpsc::channel(w.max(1));
            (PartSender::Bounded(tx), PartReceiver::Bounded(rx))
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (PartSender::Unbounded(tx), PartReceiver::Unbounded(rx))
        }
    }
}

/// Caller side of a streamed download.
pub struct BodyReader {
    rx: PartReceiver,
    trailers: Option<HeaderMap>,
    done: bool,
}

impl BodyReader {
    pub(crate) fn new(rx: PartReceiver) -> Self {
        Self {
            rx,
            trailers: None,
            done: false,
        }
    }

    /// Receive the next body part; `None` marks the end of the body, after
    /// which [`trailers`](BodyReader::trailers) is populated. Receiving is
    /// the acknowledgement that hands one window credit back to the worker.
    pub async fn next_part(&mut self) -> HalyardResult<Option<Bytes>> {
        if self.done {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(BodyPart::Data(bytes)) => Ok(Some(bytes)),
            Some(BodyPart::Eob(trailers)) => {
                self.done = true;
                self.trailers = Some(trailers);
                Ok(None)
            }
            Some(BodyPart::Failed(err)) => {
                self.done = true;
                Err(err)
            }
            None => {
                self.done = true;
                Err(HalyardError::ConnectionClosed)
            }
        }
    }

    /// Drain the remaining parts into one buffer.
    pub async fn read_to_end(&mut self) -> HalyardResult<Bytes> {
        let mut out = bytes::BytesMut::new();
        while let Some(part) = self.next_part().await? {
            out.extend_from_slice(&part);
        }
        Ok(out.freeze())
    }

    /// Trailers received after the last chunk. `None` until the end of the
    /// body, and for bodies that carried none.
    pub fn trailers(&self) -> Option<&HeaderMap> {
        self.trailers.as_ref().filter(|t| !t.is_empty())
    }
}

impl fmt::Debug for BodyReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyReader")
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_window_blocks_until_ack() {
        let (tx, rx) = part_channel(Some(2));
        tx.send(BodyPart::Data(Bytes::from_static(b"a")))
            .await
            .unwrap();
        tx.send(BodyPart::Data(Bytes::from_static(b"b")))
            .await
            .unwrap();

        // Window exhausted: the third part must not go through.
        let blocked = timeout(
            Duration::from_millis(50),
            tx.send(BodyPart::Data(Bytes::from_static(b"c"))),
        )
        .await;
        assert!(blocked.is_err());

        // One ack restores exactly one credit.
        let mut reader = BodyReader::new(rx);
        assert_eq!(&reader.next_part().await.unwrap().unwrap()[..], b"a");
        timeout(
            Duration::from_millis(50),
            tx.send(BodyPart::Data(Bytes::from_static(b"c"))),
        )
        .await
        .expect("one credit should be free")
        .unwrap();
    }

    #[tokio::test]
    async fn test_reader_reports_trailers_after_eob() {
        let (tx, rx) = part_channel(None);
        let mut trailers = HeaderMap::new();
        trailers.insert(
            http::header::HeaderName::from_static("x-digest"),
            http::header::HeaderValue::from_static("ok"),
        );
        tx.send(BodyPart::Data(Bytes::from_static(b"x")))
            .await
            .unwrap();
        tx.send(BodyPart::Eob(trailers)).await.unwrap();

        let mut reader = BodyReader::new(rx);
        assert!(reader.trailers().is_none());
        let body = reader.read_to_end().await.unwrap();
        assert_eq!(&body[..], b"x");
        assert_eq!(reader.trailers().unwrap().get("x-digest").unwrap(), "ok");
        // Terminal: further reads stay at end of body.
        assert!(reader.next_part().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dropped_worker_surfaces_as_closed() {
        let (tx, rx) = part_channel(Some(1));
        drop(tx);
        let mut reader = BodyReader::new(rx);
        assert!(matches!(
            reader.next_part().await,
            Err(HalyardError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_upload_handle_send_after_worker_death() {
        let (handle, rx) = upload_channel(1);
        drop(rx);
        assert!(handle.send(Bytes::from_static(b"x")).await.is_err());
    }
}
