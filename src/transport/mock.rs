//! In-memory coordinator used by tests.
//!
//! [`MockTransport`] decodes every frame the client writes and answers it
//! from a small attribute model, the way a coordinator with a stopped
//! stack would. [`MockNode`] is the test's handle on that model: it seeds
//! attributes, injects indications, holds confirms back, or drops the link.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::{BufMut, Bytes, BytesMut};
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::protocol::frame::Frame;
use crate::protocol::primitive::{IndicationId, Primitive};
use crate::protocol::slip::SlipDecoder;
use crate::transport::{Transport, TransportReader};

type WriteFilter = Box<dyn Fn(u16, Bytes) -> Bytes + Send>;

/// What the reader sees next: bytes or a failed read.
type Link = std::result::Result<Bytes, io::ErrorKind>;

#[derive(Default)]
struct NodeState {
    csap: HashMap<u16, Bytes>,
    msap: HashMap<u16, Bytes>,
    app_config: Option<Bytes>,
    sink_cost: u8,
    write_filter: Option<WriteFilter>,
    silent: HashSet<u8>,
    hold_confirms: bool,
    held: Vec<Frame>,
    queued: VecDeque<(IndicationId, Bytes)>,
    sent: Vec<Frame>,
    link: Option<mpsc::UnboundedSender<Link>>,
    next_indication_id: u8,
}

impl NodeState {
    fn deliver(&self, frame: &Frame) {
        if let Some(link) = &self.link {
            let _ = link.send(Ok(frame.encode()));
        }
    }
}

/// Test handle on the fake coordinator.
#[derive(Clone)]
pub(crate) struct MockNode {
    state: Arc<Mutex<NodeState>>,
}

impl MockNode {
    fn lock(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap()
    }

    /// Seeds a configuration attribute.
    pub fn set_csap(&self, id: u16, value: &[u8]) {
        self.lock().csap.insert(id, Bytes::copy_from_slice(value));
    }

    /// Seeds a management attribute.
    pub fn set_msap(&self, id: u16, value: &[u8]) {
        self.lock().msap.insert(id, Bytes::copy_from_slice(value));
    }

    /// Rewrites values on attribute writes, e.g. to clamp them.
    pub fn set_write_filter(&self, filter: impl Fn(u16, Bytes) -> Bytes + Send + 'static) {
        self.lock().write_filter = Some(Box::new(filter));
    }

    /// Never answers requests with this primitive.
    pub fn silence(&self, primitive: Primitive) {
        self.lock().silent.insert(u8::from(primitive));
    }

    /// Keeps confirms back until [`release_held`](Self::release_held).
    pub fn hold_confirms(&self, hold: bool) {
        self.lock().hold_confirms = hold;
    }

    /// Sends every held confirm.
    pub fn release_held(&self) {
        let mut state = self.lock();
        let held = std::mem::take(&mut state.held);
        for frame in &held {
            state.deliver(frame);
        }
    }

    /// Pushes an indication immediately, without waiting for a poll.
    pub fn push_indication(&self, id: IndicationId, body: &[u8]) {
        let mut state = self.lock();
        let frame_id = state.next_indication_id;
        state.next_indication_id = frame_id.wrapping_add(1);
        let mut payload = vec![0u8];
        payload.extend_from_slice(body);
        state.deliver(&Frame::new(u8::from(id), frame_id, payload));
    }

    /// Queues an indication released on the next poll.
    pub fn queue_indication(&self, id: IndicationId, body: &[u8]) {
        self.lock()
            .queued
            .push_back((id, Bytes::copy_from_slice(body)));
    }

    /// Frames written by the client so far.
    pub fn sent(&self) -> Vec<Frame> {
        self.lock().sent.clone()
    }

    /// Frames written by the client with the given primitive id.
    pub fn sent_with(&self, primitive_id: u8) -> Vec<Frame> {
        self.lock()
            .sent
            .iter()
            .filter(|frame| frame.primitive_id == primitive_id)
            .cloned()
            .collect()
    }

    /// Makes the next read fail with `kind`, leaving the link up.
    pub fn fail_read(&self, kind: io::ErrorKind) {
        if let Some(link) = &self.lock().link {
            let _ = link.send(Err(kind));
        }
    }

    /// Pushes a raw frame as is.
    pub fn push_frame(&self, frame: &Frame) {
        self.lock().deliver(frame);
    }

    /// Drops the link, as if the cable was pulled.
    pub fn drop_link(&self) {
        self.lock().link = None;
    }
}

/// Transport backed by a [`MockNode`].
pub(crate) struct MockTransport {
    state: Arc<Mutex<NodeState>>,
    reader: Option<mpsc::UnboundedReceiver<Link>>,
    decoder: SlipDecoder,
    connected: bool,
    fail_connect: bool,
}

impl MockTransport {
    /// Creates a transport and the handle on its node.
    pub fn new() -> (Self, MockNode) {
        let (link, reader) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(NodeState {
            link: Some(link),
            ..NodeState::default()
        }));
        let transport = Self {
            state: Arc::clone(&state),
            reader: Some(reader),
            decoder: SlipDecoder::new(),
            connected: false,
            fail_connect: false,
        };
        (transport, MockNode { state })
    }

    /// Creates a transport whose `connect` fails.
    pub fn unreachable() -> Self {
        let (mut transport, _) = Self::new();
        transport.fail_connect = true;
        transport
    }

    fn handle(&mut self, data: &[u8]) {
        self.decoder.feed(data);
        while let Ok(Some(raw)) = self.decoder.decode() {
            let Ok(frame) = Frame::parse(&raw) else {
                continue;
            };
            let mut state = self.state.lock().unwrap();
            state.sent.push(frame.clone());
            if let Some(reply) = respond(&mut state, &frame) {
                if state.hold_confirms {
                    state.held.push(reply);
                } else {
                    state.deliver(&reply);
                }
            }
            if frame.primitive_id == u8::from(Primitive::IndicationPoll) {
                release_queued(&mut state);
            }
        }
    }
}

impl Transport for MockTransport {
    fn connect(&mut self) -> BoxFuture<'_, Result<()>> {
        async move {
            if self.fail_connect {
                return Err(Error::TransportFailure(io::Error::new(
                    io::ErrorKind::NotFound,
                    "no such device",
                )));
            }
            self.connected = true;
            Ok(())
        }
        .boxed()
    }

    fn disconnect(&mut self) -> BoxFuture<'_, Result<()>> {
        async move {
            self.connected = false;
            Ok(())
        }
        .boxed()
    }

    fn send(&mut self, data: Bytes) -> BoxFuture<'_, Result<()>> {
        async move {
            if !self.connected {
                return Err(Error::NotConnected);
            }
            self.handle(&data);
            Ok(())
        }
        .boxed()
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn take_reader(&mut self) -> Option<Box<dyn TransportReader>> {
        self.reader
            .take()
            .map(|rx| Box::new(MockReader { rx }) as Box<dyn TransportReader>)
    }
}

struct MockReader {
    rx: mpsc::UnboundedReceiver<Link>,
}

impl TransportReader for MockReader {
    fn recv(&mut self) -> BoxFuture<'_, Result<Bytes>> {
        async move {
            match self.rx.recv().await {
                Some(Ok(bytes)) => Ok(bytes),
                Some(Err(kind)) => Err(Error::TransportFailure(io::Error::from(kind))),
                None => Err(Error::TransportFailure(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "mock link dropped",
                ))),
            }
        }
        .boxed()
    }
}

fn release_queued(state: &mut NodeState) {
    while let Some((id, body)) = state.queued.pop_front() {
        let more = u8::from(!state.queued.is_empty());
        let frame_id = state.next_indication_id;
        state.next_indication_id = frame_id.wrapping_add(1);
        let mut payload = vec![more];
        payload.extend_from_slice(&body);
        state.deliver(&Frame::new(u8::from(id), frame_id, payload));
    }
}

fn attribute_id(payload: &[u8]) -> u16 {
    u16::from_le_bytes([payload[0], payload[1]])
}

fn respond(state: &mut NodeState, frame: &Frame) -> Option<Frame> {
    let primitive = Primitive::from_byte(frame.primitive_id)?;
    if state.silent.contains(&frame.primitive_id) {
        return None;
    }

    let payload = &frame.payload;
    let mut out = BytesMut::new();
    match primitive {
        Primitive::CsapAttributeRead => {
            let id = attribute_id(payload);
            match (id, state.csap.get(&id)) {
                // Keys are write-only
                (13 | 14, value) => {
                    out.put_u8(if value.is_some() { 5 } else { 4 });
                    out.put_u16_le(id);
                }
                (_, Some(value)) => {
                    out.put_u8(0);
                    out.put_u16_le(id);
                    out.put_u8(value.len() as u8);
                    out.put_slice(value);
                }
                (_, None) => {
                    out.put_u8(4);
                    out.put_u16_le(id);
                }
            }
        }
        Primitive::CsapAttributeWrite => {
            let id = attribute_id(payload);
            let len = usize::from(payload[2]);
            let mut value = payload.slice(3..3 + len);
            if let Some(filter) = &state.write_filter {
                value = filter(id, value);
            }
            if (13..=14).contains(&id) && value.iter().all(|&b| b == 0xff) {
                state.csap.remove(&id);
            } else {
                state.csap.insert(id, value);
            }
            out.put_u8(0);
        }
        Primitive::MsapAttributeWrite => {
            let id = attribute_id(payload);
            let len = usize::from(payload[2]);
            state.msap.insert(id, payload.slice(3..3 + len));
            out.put_u8(0);
        }
        Primitive::MsapAttributeRead => {
            let id = attribute_id(payload);
            if let Some(value) = state.msap.get(&id) {
                out.put_u8(0);
                out.put_u16_le(id);
                out.put_u8(value.len() as u8);
                out.put_slice(value);
            } else {
                out.put_u8(4);
                out.put_u16_le(id);
            }
        }
        Primitive::AppConfigRead => match &state.app_config {
            Some(config) => {
                out.put_u8(0);
                out.put_slice(config);
            }
            None => out.put_u8(1),
        },
        Primitive::AppConfigWrite => {
            state.app_config = Some(payload.clone());
            out.put_u8(0);
        }
        Primitive::SinkCostRead => {
            out.put_u8(0);
            out.put_u8(state.sink_cost);
        }
        Primitive::SinkCostWrite => {
            state.sink_cost = payload[0];
            out.put_u8(0);
        }
        Primitive::GetNeighbors => {
            out.put_u8(0);
            out.put_bytes(0, 8 * 13);
        }
        Primitive::IndicationPoll => out.put_u8(u8::from(!state.queued.is_empty())),
        Primitive::DataTx | Primitive::DataTxTt => {
            out.put_slice(&payload[..2]);
            out.put_u8(0);
            out.put_u8(10);
        }
        Primitive::StackStart
        | Primitive::StackStop
        | Primitive::FactoryReset
        | Primitive::ScanNeighbors
        | Primitive::RemoteStatus => out.put_u8(0),
    }
    Some(Frame::new(primitive.confirm_id(), frame.frame_id, out.freeze()))
}
