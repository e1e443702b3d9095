//! One hop of a client's circuit, as seen from the relay that hosts
//! it.
//!
//! A circuit is created by a successful CREATE-family handshake, lives
//! inside the channel that carried it, and holds the two directions of
//! cryptographic state that the handshake produced.  Cells addressed to
//! this hop are "recognized" (see [`crate::crypto::cell`]); cells
//! addressed further along would have to be forwarded on another
//! channel, which a circuit with no next hop cannot do.

use tracing::{debug, info, trace};

use crate::crypto::binding::CircuitBinding;
use crate::crypto::cell::{
    CryptState, InboundRelayLayer, OutboundRelayLayer, RelayCellBody, Tor1RelayCrypto,
};
use crate::{Error, Result};
use garnet_cell::chancell::{AnyChanCell, BoxedCellBody, ChanCell, CircId, msg};
use garnet_cell::relaycell::{self, RelayCmd, RelayHeader, StreamId, extend::Extend2Request};
use garnet_llcrypto::cipher::aes::Aes128Ctr;
use garnet_llcrypto::d::Sha1;

/// The cryptographic state of one direction of a circuit.
pub(crate) type RelayCryptState = CryptState<Aes128Ctr, Sha1>;

/// Initial value of a circuit's delivery window, in cells.
const CIRCWINDOW_START: u16 = 1000;
/// Window increment granted by (or demanded with) one SENDME.
const CIRCWINDOW_INCREMENT: u16 = 100;

/// How many RELAY_EARLY cells may arrive on one circuit.
const MAX_RELAY_EARLY: u8 = 8;

/// The END reason we give when refusing a stream request.
const END_REASON_MISC: u8 = 1;

/// One circuit, terminating at this relay.
pub struct Circuit {
    /// The circuit id, as chosen by the peer that created it.
    id: CircId,
    /// Crypto state for cells moving away from the client.
    fwd: RelayCryptState,
    /// Crypto state for cells moving towards the client.
    back: RelayCryptState,
    /// The binding value tied to this circuit's handshake.
    binding: CircuitBinding,
    /// How many more cells the client may send us before it owes us a
    /// SENDME exchange.
    deliver_window: u16,
    /// How many cells we may originate towards the client.
    package_window: u16,
    /// How many RELAY_EARLY cells we have seen here.
    relay_early_count: u8,
}

impl Circuit {
    /// Wrap a completed handshake's crypto state as a circuit.
    pub(crate) fn new(id: CircId, pair: Tor1RelayCrypto) -> Self {
        let (fwd, back, binding) = pair.split();
        Circuit {
            id,
            fwd,
            back,
            binding,
            deliver_window: CIRCWINDOW_START,
            package_window: CIRCWINDOW_START,
            relay_early_count: 0,
        }
    }

    /// Return this circuit's id.
    pub fn id(&self) -> CircId {
        self.id
    }

    /// Return the binding value tied to this circuit's handshake.
    pub fn binding(&self) -> &CircuitBinding {
        &self.binding
    }

    /// Process one inbound relay cell, advancing the forward crypto
    /// state.
    ///
    /// On success, return any cells to send back to the client.  On
    /// error, the circuit must be destroyed.
    pub(crate) fn handle_relay_cell(
        &mut self,
        early: bool,
        body: BoxedCellBody,
    ) -> Result<Vec<AnyChanCell>> {
        if early {
            self.relay_early_count = self.relay_early_count.saturating_add(1);
            if self.relay_early_count > MAX_RELAY_EARLY {
                return Err(Error::CircProto("too many RELAY_EARLY cells".into()));
            }
        }

        let mut cell = RelayCellBody::from(body);
        if !self.fwd.decrypt_outbound(&mut cell) {
            // The cell is encrypted to a hop beyond us, and this
            // circuit was never extended: there is no next link to
            // forward it on.
            return Err(Error::CircProto(
                "unrecognized relay cell on an unextended circuit".into(),
            ));
        }
        let body = BoxedCellBody::from(cell);
        let header = RelayHeader::decode(&body[..])?;
        let data = header.data(&body[..]);
        trace!(
            circ_id = %self.id,
            cmd = %header.cmd,
            len = header.length,
            "recognized relay cell"
        );

        let mut replies = Vec::new();
        match header.cmd {
            RelayCmd::DROP => {
                // Long-range padding; accounted, then ignored.
                self.note_delivered(&mut replies)?;
            }
            RelayCmd::DATA => {
                self.note_delivered(&mut replies)?;
                let stream = header.stream_id.ok_or_else(|| {
                    Error::CircProto("DATA cell without a stream id".into())
                })?;
                // No stream can exist here: we never accepted one.
                replies.push(self.originate(RelayCmd::END, Some(stream), &[END_REASON_MISC])?);
            }
            RelayCmd::BEGIN | RelayCmd::BEGIN_DIR | RelayCmd::RESOLVE => {
                // Stream creation is an exit's business, not ours.
                let stream = header.stream_id.ok_or_else(|| {
                    Error::CircProto("stream request without a stream id".into())
                })?;
                debug!(circ_id = %self.id, "refusing stream request");
                replies.push(self.originate(RelayCmd::END, Some(stream), &[END_REASON_MISC])?);
            }
            RelayCmd::SENDME => {
                if header.stream_id.is_none() {
                    self.package_window = self
                        .package_window
                        .saturating_add(CIRCWINDOW_INCREMENT)
                        .min(CIRCWINDOW_START);
                }
                // A stream-level SENDME with no stream is harmless;
                // ignore it.
            }
            RelayCmd::EXTEND2 => {
                let request = Extend2Request::decode(data)?;
                info!(
                    circ_id = %self.id,
                    n_specs = request.link_specs().len(),
                    htype = %request.handshake_type(),
                    "cannot extend circuit: no onward connectivity"
                );
                replies.push(self.truncated(msg::DestroyReason::CONNECTFAILED)?);
            }
            RelayCmd::EXTEND => {
                // The deprecated extend format; refused the same way.
                replies.push(self.truncated(msg::DestroyReason::CONNECTFAILED)?);
            }
            RelayCmd::TRUNCATE => {
                // Nothing beyond us to truncate; report success.
                replies.push(self.truncated(msg::DestroyReason::NONE)?);
            }
            _ => {
                // Unknown relay commands are dropped, never answered.
                debug!(circ_id = %self.id, cmd = %header.cmd, "ignoring relay cell");
            }
        }
        Ok(replies)
    }

    /// Account for one delivered cell, demanding a SENDME exchange when
    /// a window's worth has arrived.
    fn note_delivered(&mut self, replies: &mut Vec<AnyChanCell>) -> Result<()> {
        if self.deliver_window == 0 {
            return Err(Error::CircProto("delivery window exceeded".into()));
        }
        self.deliver_window -= 1;
        if self.deliver_window <= CIRCWINDOW_START - CIRCWINDOW_INCREMENT {
            replies.push(self.originate(RelayCmd::SENDME, None, &[])?);
            self.deliver_window += CIRCWINDOW_INCREMENT;
        }
        Ok(())
    }

    /// Build a TRUNCATED reply carrying `reason`.
    fn truncated(&mut self, reason: msg::DestroyReason) -> Result<AnyChanCell> {
        self.originate(RelayCmd::TRUNCATED, None, &[reason.into()])
    }

    /// Originate a relay cell towards the client: stamp it into the
    /// backward digest, encrypt it, and wrap it as a channel cell.
    pub(crate) fn originate(
        &mut self,
        cmd: RelayCmd,
        stream_id: Option<StreamId>,
        data: &[u8],
    ) -> Result<AnyChanCell> {
        let body = relaycell::encode_relay_body(cmd, stream_id, data)?;
        let mut cell = RelayCellBody::from(Box::new(body));
        self.back.originate(&mut cell);
        let relay = msg::Relay::from(BoxedCellBody::from(cell));
        Ok(ChanCell::new(Some(self.id), relay.into()))
    }
}
