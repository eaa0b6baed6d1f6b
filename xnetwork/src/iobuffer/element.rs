//! Queued elements and delivery callbacks.

use std::sync::Arc;

use bytes::Bytes;

/// Delivery event reported to a send callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackStatus {
    /// First transmission of the element.
    Sent,

    /// The peer acknowledged the element.
    AckReceived,

    /// The retry budget ran out; the return value decides what happens next.
    Timeout,

    /// The element was discarded by a flush or at teardown.
    ///
    /// An element discarded before its `Sent` was reported gets only
    /// `Cancel` and `Free`.
    Cancel,

    /// Last event for the element; release any associated resources.
    Free,
}

/// Answer of a send callback.
///
/// Only meaningful for [`CallbackStatus::Timeout`]; ignored otherwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CallbackReturn {
    /// Drop the element.
    #[default]
    Default,

    /// Keep the element and start over with a fresh retry budget.
    Retry,

    /// Drop the element.
    DataPop,

    /// Cancel every element queued on the stream.
    Flush,
}

/// Per-element delivery callback: `(stream_id, data, status)`.
pub type SendCallback = Arc<dyn Fn(u8, &Bytes, CallbackStatus) -> CallbackReturn + Send + Sync>;

/// Wraps a closure into a [`SendCallback`].
pub fn send_callback<F>(f: F) -> SendCallback
where
    F: Fn(u8, &Bytes, CallbackStatus) -> CallbackReturn + Send + Sync + 'static,
{
    Arc::new(f)
}

/// How a received element was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveStatus {
    /// Arrived on an acknowledged stream; an ACK was echoed back.
    Acknowledged,

    /// Arrived on a best-effort stream.
    Received,
}

/// Manager-wide hook invoked for every element queued on an output stream.
pub type ReceiveCallback = Arc<dyn Fn(u8, &[u8], ReceiveStatus) + Send + Sync>;

/// Wraps a closure into a [`ReceiveCallback`].
pub fn receive_callback<F>(f: F) -> ReceiveCallback
where
    F: Fn(u8, &[u8], ReceiveStatus) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Payload handed to `send`.
#[derive(Debug, Clone)]
pub enum SendData<'a> {
    /// Copied into the ring.
    Copy(&'a [u8]),

    /// Ownership moves into the ring; no copy.
    Transfer(Bytes),
}

impl SendData<'_> {
    /// Returns the payload size.
    pub fn len(&self) -> usize {
        match self {
            SendData::Copy(data) => data.len(),
            SendData::Transfer(data) => data.len(),
        }
    }

    /// Returns true for an empty payload.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn into_bytes(self) -> Bytes {
        match self {
            SendData::Copy(data) => Bytes::copy_from_slice(data),
            SendData::Transfer(data) => data,
        }
    }
}

impl<'a> From<&'a [u8]> for SendData<'a> {
    fn from(data: &'a [u8]) -> Self {
        SendData::Copy(data)
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for SendData<'a> {
    fn from(data: &'a [u8; N]) -> Self {
        SendData::Copy(data)
    }
}

impl From<Bytes> for SendData<'_> {
    fn from(data: Bytes) -> Self {
        SendData::Transfer(data)
    }
}

impl From<Vec<u8>> for SendData<'_> {
    fn from(data: Vec<u8>) -> Self {
        SendData::Transfer(Bytes::from(data))
    }
}

/// One callback invocation, collected under a lock and run after it.
pub(crate) struct Notification {
    stream_id: u8,
    data: Bytes,
    status: CallbackStatus,
    callback: SendCallback,
}

impl Notification {
    pub fn dispatch(self) -> CallbackReturn {
        (self.callback)(self.stream_id, &self.data, self.status)
    }
}

/// Runs notifications in order.
pub(crate) fn dispatch_all(notes: impl IntoIterator<Item = Notification>) {
    for note in notes {
        note.dispatch();
    }
}

/// An element queued in an IO buffer ring.
///
/// An element that still holds its callback when dropped reports
/// `Cancel` then `Free`, so every accepted element sees exactly one `Free`.
pub(crate) struct Element {
    stream_id: u8,
    token: u64,
    data: Bytes,
    seq: Option<u8>,
    callback: Option<SendCallback>,
}

impl Element {
    pub fn new(stream_id: u8, token: u64, data: Bytes, callback: Option<SendCallback>) -> Self {
        Self {
            stream_id,
            token,
            data,
            seq: None,
            callback,
        }
    }

    /// ACK echo element; `seq` is the acknowledged sequence number.
    pub fn ack(stream_id: u8, token: u64, seq: u8) -> Self {
        Self {
            stream_id,
            token,
            data: Bytes::new(),
            seq: Some(seq),
            callback: None,
        }
    }

    #[inline]
    pub fn token(&self) -> u64 {
        self.token
    }

    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    #[inline]
    pub fn seq(&self) -> Option<u8> {
        self.seq
    }

    #[inline]
    pub fn callback(&self) -> Option<&SendCallback> {
        self.callback.as_ref()
    }

    /// Event for an element that stays queued.
    pub fn notify(&self, status: CallbackStatus) -> Option<Notification> {
        self.callback.as_ref().map(|callback| Notification {
            stream_id: self.stream_id,
            data: self.data.clone(),
            status,
            callback: callback.clone(),
        })
    }

    /// Retires the element: reports `status` (if any) then `Free`.
    pub fn finish(mut self, status: Option<CallbackStatus>, notes: &mut Vec<Notification>) {
        let Some(callback) = self.callback.take() else {
            return;
        };
        let data = std::mem::take(&mut self.data);
        if let Some(status) = status {
            notes.push(Notification {
                stream_id: self.stream_id,
                data: data.clone(),
                status,
                callback: callback.clone(),
            });
        }
        notes.push(Notification {
            stream_id: self.stream_id,
            data,
            status: CallbackStatus::Free,
            callback,
        });
    }

    /// Gives the payload back without any callback, for elements never accepted.
    pub fn disarm(mut self) -> Bytes {
        self.callback = None;
        std::mem::take(&mut self.data)
    }

    /// Takes the payload of a received element.
    pub fn into_data(self) -> Bytes {
        self.disarm()
    }
}

impl Drop for Element {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback(self.stream_id, &self.data, CallbackStatus::Cancel);
            callback(self.stream_id, &self.data, CallbackStatus::Free);
        }
    }
}

impl std::fmt::Debug for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Element")
            .field("stream_id", &self.stream_id)
            .field("token", &self.token)
            .field("len", &self.data.len())
            .field("seq", &self.seq)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recorder() -> (SendCallback, Arc<Mutex<Vec<CallbackStatus>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let callback = send_callback(move |_, _, status| {
            sink.lock().push(status);
            CallbackReturn::Default
        });
        (callback, events)
    }

    #[test]
    fn test_finish_reports_status_then_free() {
        let (callback, events) = recorder();
        let elem = Element::new(1, 0, Bytes::from_static(b"A"), Some(callback));

        let mut notes = Vec::new();
        if let Some(note) = elem.notify(CallbackStatus::Sent) {
            notes.push(note);
        }
        elem.finish(Some(CallbackStatus::AckReceived), &mut notes);
        assert!(events.lock().is_empty());

        dispatch_all(notes);
        assert_eq!(
            *events.lock(),
            vec![
                CallbackStatus::Sent,
                CallbackStatus::AckReceived,
                CallbackStatus::Free
            ]
        );
    }

    #[test]
    fn test_drop_cancels() {
        let (callback, events) = recorder();
        drop(Element::new(2, 0, Bytes::from_static(b"B"), Some(callback)));
        assert_eq!(
            *events.lock(),
            vec![CallbackStatus::Cancel, CallbackStatus::Free]
        );
    }

    #[test]
    fn test_disarm_is_silent() {
        let (callback, events) = recorder();
        let data = Element::new(3, 0, Bytes::from_static(b"C"), Some(callback)).disarm();
        assert_eq!(&data[..], b"C");
        assert!(events.lock().is_empty());
    }

    #[test]
    fn test_send_data_conversions() {
        let copy: SendData<'_> = b"abc".into();
        assert!(matches!(copy, SendData::Copy(_)));
        assert_eq!(copy.len(), 3);

        let owned: SendData<'_> = vec![1u8, 2].into();
        assert!(matches!(owned, SendData::Transfer(_)));
        assert_eq!(&owned.into_bytes()[..], &[1, 2]);
    }
}
