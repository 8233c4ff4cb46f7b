// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Packing of flushed batches into datagrams and sending them to the current endpoint.
//!
//! Messages are concatenated greedily, in order, into as few datagrams as the transport limit
//! allows. A message that is larger than the limit on its own is dropped rather than fragmented.
//! Each call to [`DatagramPacker::send`] moves the rotation to the next endpoint, whether or not
//! the send succeeded.

use std::io;
use std::net::UdpSocket;

use tracing::{debug, trace};

use crate::errors;
use crate::rotator::{Endpoint, EndpointRotator};

/// Something that can deliver one datagram to an endpoint.
pub trait Transport: Send {
    fn send_to(&mut self, payload: &[u8], endpoint: &Endpoint) -> io::Result<()>;
}

/// Fire-and-forget UDP transport over an unconnected IPv4 socket.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Binds an ephemeral local port.
    pub fn bind() -> Result<Self, errors::Creation> {
        let socket = UdpSocket::bind("0.0.0.0:0").map_err(errors::Creation::Bind)?;
        Ok(Self { socket })
    }
}

impl Transport for UdpTransport {
    fn send_to(&mut self, payload: &[u8], endpoint: &Endpoint) -> io::Result<()> {
        self.socket
            .send_to(payload, (endpoint.host.as_str(), endpoint.port))
            .map(|_| ())
    }
}

/// Result of packing a batch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Packed {
    pub datagrams: Vec<String>,
    /// Messages skipped because they exceed the limit on their own.
    pub dropped: usize,
}

/// Greedily concatenates `messages`, in order, into payloads of at most `limit` bytes.
pub fn pack<S>(messages: &[S], limit: usize) -> Packed
where
    S: AsRef<str>,
{
    let mut packed = Packed::default();
    let mut accumulated = String::new();
    let mut accumulated_size = 0usize;

    for message in messages {
        let message = message.as_ref();
        let size = message.len();
        if size > limit {
            packed.dropped += 1;
            continue;
        }
        accumulated_size += size;
        if accumulated_size <= limit {
            accumulated.push_str(message);
        } else {
            packed
                .datagrams
                .push(std::mem::replace(&mut accumulated, message.to_string()));
            accumulated_size = size;
        }
    }
    if accumulated_size != 0 {
        packed.datagrams.push(accumulated);
    }
    packed
}

/// Sends batches as packed datagrams, rotating endpoints once per batch.
#[derive(Debug)]
pub struct DatagramPacker<T> {
    transport: T,
    rotator: EndpointRotator,
    limit: usize,
    dropped_oversize: u64,
}

impl<T: Transport> DatagramPacker<T> {
    pub fn new(transport: T, rotator: EndpointRotator, limit: usize) -> Self {
        Self {
            transport,
            rotator,
            limit,
            dropped_oversize: 0,
        }
    }

    /// Sends `messages` to the current endpoint, then advances the rotation.
    ///
    /// Returns the number of datagrams sent. The first transport error stops the send.
    pub fn send<S>(&mut self, messages: &[S]) -> Result<usize, errors::Flush>
    where
        S: AsRef<str>,
    {
        let endpoint = self.rotator.current().clone();
        let result = self.transmit(messages, &endpoint);
        self.rotator.advance();
        result
    }

    fn transmit<S>(&mut self, messages: &[S], endpoint: &Endpoint) -> Result<usize, errors::Flush>
    where
        S: AsRef<str>,
    {
        let packed = pack(messages, self.limit);
        if packed.dropped > 0 {
            self.dropped_oversize += packed.dropped as u64;
            debug!(
                "Dropped {} messages larger than the {} byte datagram limit",
                packed.dropped, self.limit
            );
        }

        for datagram in &packed.datagrams {
            trace!("Sending {} byte datagram to {}", datagram.len(), endpoint);
            self.transport
                .send_to(datagram.as_bytes(), endpoint)
                .map_err(|source| errors::Flush::Transport {
                    endpoint: endpoint.to_string(),
                    source,
                })?;
        }
        Ok(packed.datagrams.len())
    }

    /// Total messages dropped so far for exceeding the datagram limit.
    pub fn dropped_oversize(&self) -> u64 {
        self.dropped_oversize
    }

    /// The endpoint the next batch goes to.
    pub fn current_endpoint(&self) -> &Endpoint {
        self.rotator.current()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::{Arc, Mutex};

    /// Records every datagram instead of sending it.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingTransport {
        pub sent: Arc<Mutex<Vec<(String, Endpoint)>>>,
    }

    impl RecordingTransport {
        pub fn take(&self) -> Vec<(String, Endpoint)> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }
    }

    impl Transport for RecordingTransport {
        fn send_to(&mut self, payload: &[u8], endpoint: &Endpoint) -> io::Result<()> {
            self.sent.lock().unwrap().push((
                String::from_utf8(payload.to_vec()).unwrap(),
                endpoint.clone(),
            ));
            Ok(())
        }
    }

    pub(crate) struct FailingTransport;

    impl Transport for FailingTransport {
        fn send_to(&mut self, _payload: &[u8], _endpoint: &Endpoint) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
        }
    }

    fn packer(endpoints: &[(&str, u16)], limit: usize) -> (DatagramPacker<RecordingTransport>, RecordingTransport) {
        let transport = RecordingTransport::default();
        let rotator = EndpointRotator::new(
            endpoints
                .iter()
                .map(|(host, port)| Endpoint::new(*host, *port))
                .collect(),
        )
        .unwrap();
        (DatagramPacker::new(transport.clone(), rotator, limit), transport)
    }

    #[test]
    fn test_simple_sending() {
        let (mut packer, transport) = packer(&[("localhost", 9700)], 9000);
        assert_eq!(packer.send(&["TEST"]).unwrap(), 1);

        let sent = transport.take();
        assert_eq!(sent, [("TEST".to_string(), Endpoint::new("localhost", 9700))]);
    }

    #[test]
    fn test_small_messages_share_a_datagram() {
        let (mut packer, transport) = packer(&[("localhost", 9700)], 9000);
        packer.send(&["a\n", "b\n", "c\n"]).unwrap();
        let sent = transport.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "a\nb\nc\n");
    }

    #[test]
    fn test_over_udp_limit_splits_datagrams() {
        let limit = "TEST1".len() + 1;
        let (mut packer, transport) = packer(&[("localhost", 9700)], limit);
        assert_eq!(packer.send(&["TEST1", "TEST2"]).unwrap(), 2);

        let payloads: Vec<String> = transport.take().into_iter().map(|(p, _)| p).collect();
        assert_eq!(payloads, ["TEST1", "TEST2"]);
    }

    #[test]
    fn test_too_long_message_is_dropped() {
        let (mut packer, transport) = packer(&[("localhost", 9700)], 10);
        assert_eq!(packer.send(&["123456789012345678901234567890"]).unwrap(), 0);
        assert!(transport.take().is_empty());
        assert_eq!(packer.dropped_oversize(), 1);
    }

    #[test]
    fn test_oversized_message_dropped_others_sent() {
        let (mut packer, transport) = packer(&[("localhost", 9700)], 10);
        packer
            .send(&["abc", "this one is far too long", "def"])
            .unwrap();
        let payloads: Vec<String> = transport.take().into_iter().map(|(p, _)| p).collect();
        assert_eq!(payloads, ["abcdef"]);
        assert_eq!(packer.dropped_oversize(), 1);
    }

    #[test]
    fn test_rotated_connection() {
        let (mut packer, transport) = packer(&[("localhost", 9700), ("localhost", 9701)], 9000);
        packer.send(&["TEST1"]).unwrap();
        packer.send(&["TEST2"]).unwrap();
        packer.send(&["TEST3"]).unwrap();

        let sent = transport.take();
        assert_eq!(sent[0], ("TEST1".to_string(), Endpoint::new("localhost", 9700)));
        assert_eq!(sent[1], ("TEST2".to_string(), Endpoint::new("localhost", 9701)));
        assert_eq!(sent[2], ("TEST3".to_string(), Endpoint::new("localhost", 9700)));
    }

    #[test]
    fn test_rotation_is_per_call_not_per_datagram() {
        let (mut packer, transport) = packer(&[("a", 1), ("b", 2)], 3);
        packer.send(&["111", "222", "333"]).unwrap();
        packer.send(&["444"]).unwrap();

        let hosts: Vec<String> = transport.take().into_iter().map(|(_, e)| e.host).collect();
        assert_eq!(hosts, ["a", "a", "a", "b"]);
    }

    #[test]
    fn test_rotation_advances_on_failure() {
        let rotator =
            EndpointRotator::new(vec![Endpoint::new("a", 1), Endpoint::new("b", 2)]).unwrap();
        let mut packer = DatagramPacker::new(FailingTransport, rotator, 100);

        let err = packer.send(&["x"]).unwrap_err();
        assert!(matches!(err, errors::Flush::Transport { ref endpoint, .. } if endpoint == "a:1"));
        assert_eq!(packer.current_endpoint(), &Endpoint::new("b", 2));
    }

    #[test]
    fn test_empty_batch_sends_nothing() {
        let (mut packer, transport) = packer(&[("localhost", 9700)], 100);
        assert_eq!(packer.send::<String>(&[]).unwrap(), 0);
        assert!(transport.take().is_empty());
    }

    proptest! {
        #[test]
        fn prop_packing_preserves_order_and_limit(
            limit in 1usize..64,
            sizes in prop::collection::vec(1usize..80, 0..40),
        ) {
            let messages: Vec<String> = sizes
                .iter()
                .enumerate()
                .map(|(i, size)| {
                    let c = char::from(b'a' + (i % 26) as u8);
                    c.to_string().repeat(*size)
                })
                .collect();
            let packed = pack(&messages, limit);

            let kept: Vec<&String> = messages.iter().filter(|m| m.len() <= limit).collect();
            prop_assert_eq!(packed.dropped, messages.len() - kept.len());
            prop_assert_eq!(
                packed.datagrams.concat(),
                kept.iter().map(|m| m.as_str()).collect::<String>()
            );
            for datagram in &packed.datagrams {
                prop_assert!(!datagram.is_empty());
                prop_assert!(datagram.len() <= limit);
            }
        }
    }
}
