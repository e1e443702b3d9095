//! Code for talking directly (over an encrypted transport) to a link
//! peer.
//!
//! Channels form the transport layer for circuits: each accepted
//! connection becomes one channel, which multiplexes any number of
//! circuits created by the peer.
//!
//! A channel is driven by its [`Reactor`], which must be spawned as a
//! task; the [`Channel`] handle is the cheap, clonable front end that
//! other code (the router, mostly) keeps hold of.

pub mod auth;
mod circmap;
pub(crate) mod codec;
pub mod handshake;
mod reactor;

pub use reactor::Reactor;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::SinkExt;
use futures::channel::mpsc;

use crate::{Error, Result};
use garnet_cell::chancell::AnyChanCell;
use garnet_llcrypto::pk::rsa::RsaIdentity;

/// A transport, wrapped so that it frames its bytes as cells.
pub(crate) type CellFrame<T> = asynchronous_codec::Framed<T, codec::ChannelCodec>;

/// Operating parameters for a single channel.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct ChannelConfig {
    /// How many outbound cells may be queued before senders see
    /// backpressure.
    pub outbound_queue_len: usize,
    /// Burst size of the circuit-creation rate limiter.
    pub create_burst: u32,
    /// Sustained circuit-creations per second allowed on this channel.
    pub create_rate_per_sec: u32,
    /// Largest number of live circuits one peer may hold open.
    pub max_circuits: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            outbound_queue_len: 128,
            create_burst: 32,
            create_rate_per_sec: 8,
            max_circuits: 4096,
        }
    }
}

/// Counter for allocating unique channel log identifiers.
static NEXT_UNIQ_ID: AtomicUsize = AtomicUsize::new(0);

/// An identifier for a channel, unique within this process.
///
/// Used for logging only; it means nothing on the wire.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub struct UniqId(usize);

impl UniqId {
    /// Construct a new UniqId.
    pub(crate) fn new() -> Self {
        UniqId(NEXT_UNIQ_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for UniqId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Chan {}", self.0)
    }
}

/// A message telling the channel reactor to do something.
#[derive(Debug)]
pub(crate) enum CtrlMsg {
    /// Shut down the reactor, closing the connection and destroying
    /// every circuit on it.
    Shutdown,
}

/// A frontend handle to an open channel.
///
/// All the actual work happens in the channel's [`Reactor`]; this
/// handle lets the rest of the relay queue cells onto the channel or
/// ask it to shut down.
#[derive(Clone)]
pub struct Channel {
    /// Logging identifier for this channel.
    unique_id: UniqId,
    /// The peer's proven RSA identity, if it authenticated.
    peer_id: Option<RsaIdentity>,
    /// The negotiated link protocol version.
    link_protocol: u16,
    /// Sender for control messages to the reactor.
    control: mpsc::UnboundedSender<CtrlMsg>,
    /// Sender for cells to transmit; the reactor drains this.
    cell_tx: mpsc::Sender<AnyChanCell>,
}

impl Channel {
    /// Construct a channel handle and the matching reactor-side
    /// receivers.
    pub(crate) fn new(
        unique_id: UniqId,
        peer_id: Option<RsaIdentity>,
        link_protocol: u16,
        outbound_queue_len: usize,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<CtrlMsg>,
        mpsc::Receiver<AnyChanCell>,
    ) {
        let (control, control_rx) = mpsc::unbounded();
        let (cell_tx, cell_rx) = mpsc::channel(outbound_queue_len);
        let channel = Channel {
            unique_id,
            peer_id,
            link_protocol,
            control,
            cell_tx,
        };
        (channel, control_rx, cell_rx)
    }

    /// Return the logging identifier for this channel.
    pub fn unique_id(&self) -> UniqId {
        self.unique_id
    }

    /// Return the peer's RSA identity, if the peer proved one.
    pub fn peer_rsa_id(&self) -> Option<&RsaIdentity> {
        self.peer_id.as_ref()
    }

    /// Return true if the peer authenticated as a relay.
    pub fn is_authenticated(&self) -> bool {
        self.peer_id.is_some()
    }

    /// Return the negotiated link protocol version.
    pub fn link_protocol(&self) -> u16 {
        self.link_protocol
    }

    /// Queue a cell for transmission on this channel.
    ///
    /// Waits when the channel's outbound queue is full; fails if the
    /// channel has closed.
    pub async fn send_cell(&mut self, cell: AnyChanCell) -> Result<()> {
        self.cell_tx
            .send(cell)
            .await
            .map_err(|_| Error::ChannelClosed)
    }

    /// Ask the reactor to shut down.
    ///
    /// The reactor will close the connection and destroy its circuits.
    pub fn terminate(&self) {
        // An error just means the reactor is already gone.
        let _ = self.control.unbounded_send(CtrlMsg::Shutdown);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn uniq_ids_are_unique() {
        let a = UniqId::new();
        let b = UniqId::new();
        assert_ne!(a, b);
        assert_eq!(format!("{}", a), format!("Chan {}", a.0));
    }

    #[test]
    fn closed_channel_reports_closed() {
        let (mut chan, control_rx, cell_rx) = Channel::new(UniqId::new(), None, 4, 4);
        drop(control_rx);
        drop(cell_rx);
        chan.terminate(); // no panic on a gone reactor
        let r = futures::executor::block_on(chan.send_cell(
            garnet_cell::chancell::msg::Padding::new().into(),
        ));
        assert!(matches!(r, Err(Error::ChannelClosed)));
    }
}
