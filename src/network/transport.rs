use crate::message::submessage::element::Locator;
use std::time::Instant;

/// "send bytes to a locator" capability the engine writes through
pub trait Transport: Send + Sync {
    /// returns false when the datagram could not be handed to the network
    fn send(&self, data: &[u8], locator: &Locator, max_blocking_time_point: Option<Instant>)
        -> bool;

    fn max_message_size(&self) -> usize {
        65500
    }
}

#[cfg(test)]
pub(crate) mod test_transport {
    use super::*;
    use crate::message::message_header::Header;
    use crate::message::submessage::{SubMessage, SubMessageIter};
    use bytes::Bytes;
    use parking_lot::Mutex;

    /// captures every datagram instead of sending it
    #[derive(Default)]
    pub struct RecordingTransport {
        pub sent: Mutex<Vec<(Locator, Bytes)>>,
        pub max_message_size: Option<usize>,
        pub refuse: Mutex<bool>,
        /// every send takes this long, like a congested link
        pub delay: Mutex<Option<core::time::Duration>>,
    }

    impl RecordingTransport {
        pub fn take(&self) -> Vec<(Locator, Bytes)> {
            core::mem::take(&mut *self.sent.lock())
        }

        pub fn datagrams(&self) -> usize {
            self.sent.lock().len()
        }

        /// decoded submessages of every captured datagram, in send order
        pub fn take_submessages(&self) -> Vec<(Locator, SubMessage)> {
            let mut out = Vec::new();
            for (locator, datagram) in self.take() {
                assert!(Header::deserialize(&datagram).is_ok());
                for item in SubMessageIter::new(datagram, Header::LEN) {
                    let (header, body) = item.unwrap();
                    if let Some(submessage) = SubMessage::deserialize(header, &body).unwrap() {
                        out.push((locator, submessage));
                    }
                }
            }
            out
        }
    }

    impl Transport for RecordingTransport {
        fn send(
            &self,
            data: &[u8],
            locator: &Locator,
            _max_blocking_time_point: Option<Instant>,
        ) -> bool {
            if *self.refuse.lock() {
                return false;
            }
            if let Some(delay) = *self.delay.lock() {
                std::thread::sleep(delay);
            }
            self.sent
                .lock()
                .push((*locator, Bytes::copy_from_slice(data)));
            true
        }

        fn max_message_size(&self) -> usize {
            self.max_message_size.unwrap_or(65500)
        }
    }
}
