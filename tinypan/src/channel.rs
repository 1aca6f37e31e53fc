//! Per-session BNEP state machine: setup handshake, filter negotiation
//! replies, and the single deferred control-frame retry slot (spec §4.3).

use debug::{logln, LL};

use crate::codec::{
    self, BnepControlType, BnepPacketType, CodecError, EthernetFrame, FilterResponseCode,
    PanServiceUuid, SetupResponseCode,
};
use tinypan_hal::{EtherAddr, Hal, SendResult};

const LOG_LEVEL: LL = LL::Debug;

/// Capacity of the single deferred control frame (spec §3: "PendingControlSlot
/// ... ≤16 bytes"). The largest control frame this side ever emits is the
/// 7-byte setup request.
pub const CONTROL_SLOT_CAP: usize = 16;

/// A single reserved slot for one deferred BNEP control frame (spec §3,
/// §4.5.3). Higher drain priority than the data TX queue.
#[derive(Clone, Copy)]
pub struct PendingControlSlot {
    buf: [u8; CONTROL_SLOT_CAP],
    len: usize,
    armed: bool,
}

impl PendingControlSlot {
    pub const fn empty() -> PendingControlSlot {
        PendingControlSlot { buf: [0u8; CONTROL_SLOT_CAP], len: 0, armed: false }
    }

    /// Arm the slot with `bytes`. Returns `false` (and leaves the slot
    /// untouched) if `bytes` overruns the reserved capacity. This can't
    /// happen for any frame this crate actually builds, but the check keeps
    /// the slot panic-free regardless.
    pub fn arm(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > CONTROL_SLOT_CAP {
            return false;
        }
        self.buf[..bytes.len()].copy_from_slice(bytes);
        self.len = bytes.len();
        self.armed = true;
        true
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn clear(&mut self) {
        self.armed = false;
        self.len = 0;
    }

    /// Attempt to flush the armed frame through `hal`. Returns `true` if the
    /// slot is clear afterwards (nothing armed, or the send succeeded).
    pub fn drain<H: Hal>(&mut self, hal: &mut H) -> bool {
        if !self.armed {
            return true;
        }
        match hal.l2cap_send(self.as_bytes()) {
            SendResult::Sent => {
                self.clear();
                true
            }
            SendResult::Busy => {
                hal.l2cap_request_can_send_now();
                false
            }
            SendResult::Error => {
                logln!(LL::Debug, "bnep: dropping pending control frame, send error");
                self.clear();
                true
            }
        }
    }
}

/// BNEP channel connection state (spec §3). `WaitForConnectionRequest` is
/// reserved for the server (NAP) role this crate never plays (spec §1
/// Non-goals); it is never entered.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BnepChannelState {
    Closed,
    WaitForConnectionResponse,
    WaitForConnectionRequest,
    Connected,
}

/// What happened as a result of feeding an inbound L2CAP PDU to the channel.
#[derive(Clone, Copy, Debug)]
pub enum ChannelEvent<'a> {
    /// The peer answered our setup request (spec §4.4 `BnepSetup` state).
    SetupResult(SetupResponseCode),
    /// A data frame, fully resolved to its Ethernet-shaped view.
    DataFrame(EthernetFrame<'a>),
    /// Handled internally (e.g. a filter-set request auto-replied to); no
    /// action required from the caller.
    None,
}

/// Per-session BNEP state machine (spec §4.3). Does not own a reference to
/// the HAL; every method that needs to send takes `&mut H` explicitly, so
/// this type has no lifetime tied to a particular HAL binding.
pub struct BnepChannel {
    state: BnepChannelState,
    local_addr: EtherAddr,
    remote_addr: EtherAddr,
    pending: PendingControlSlot,
}

impl BnepChannel {
    pub const fn new() -> BnepChannel {
        BnepChannel {
            state: BnepChannelState::Closed,
            local_addr: EtherAddr([0; 6]),
            remote_addr: EtherAddr([0; 6]),
            pending: PendingControlSlot::empty(),
        }
    }

    pub fn state(&self) -> BnepChannelState {
        self.state
    }

    pub fn local_addr(&self) -> EtherAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> EtherAddr {
        self.remote_addr
    }

    /// Reset to `Closed` and drop any deferred control frame. Called on
    /// L2CAP disconnect and on `supervisor.stop` (spec §3 Lifecycles).
    pub fn reset(&mut self) {
        self.state = BnepChannelState::Closed;
        self.pending.clear();
    }

    /// L2CAP connected: move to `WaitForConnectionResponse` and emit a
    /// setup request advertising PANU as source, requesting NAP as
    /// destination (spec §3, §4.3).
    pub fn open<H: Hal>(&mut self, hal: &mut H, local_addr: EtherAddr, remote_addr: EtherAddr) {
        self.local_addr = local_addr;
        self.remote_addr = remote_addr;
        self.state = BnepChannelState::WaitForConnectionResponse;
        let mut out = [0u8; 7];
        if let Ok(n) = codec::build_setup_request(&mut out, PanServiceUuid::Panu, PanServiceUuid::Nap) {
            self.send_or_arm(hal, &out[..n]);
        }
    }

    /// Drain the pending control slot (the "can-send-now" path, spec §4.5.3
    /// step 1). Returns `true` if the slot is clear (either nothing was
    /// armed, or the flush succeeded).
    pub fn drain_pending<H: Hal>(&mut self, hal: &mut H) -> bool {
        self.pending.drain(hal)
    }

    fn send_or_arm<H: Hal>(&mut self, hal: &mut H, bytes: &[u8]) {
        match hal.l2cap_send(bytes) {
            SendResult::Sent => {}
            SendResult::Busy => {
                self.pending.arm(bytes);
                hal.l2cap_request_can_send_now();
            }
            SendResult::Error => {
                logln!(LL::Debug, "bnep: control send error");
            }
        }
    }

    /// Feed one inbound L2CAP PDU to the channel (spec §4.3 "Inbound
    /// dispatch").
    pub fn on_inbound<'a, H: Hal>(
        &mut self,
        hal: &mut H,
        bytes: &'a [u8],
    ) -> Result<ChannelEvent<'a>, CodecError> {
        let (pkt, _has_ext) = codec::classify(bytes)?;
        match pkt {
            BnepPacketType::ControlFrame { control_type, .. } => {
                self.on_control_frame(hal, control_type, bytes)
            }
            _ => {
                if self.state == BnepChannelState::Connected {
                    let frame = codec::parse_ethernet_frame(bytes, self.local_addr, self.remote_addr)?;
                    Ok(ChannelEvent::DataFrame(frame))
                } else {
                    logln!(LL::Debug, "bnep: dropping data frame, channel not connected");
                    Ok(ChannelEvent::None)
                }
            }
        }
    }

    fn on_control_frame<'a, H: Hal>(
        &mut self,
        hal: &mut H,
        control_type: u8,
        bytes: &'a [u8],
    ) -> Result<ChannelEvent<'a>, CodecError> {
        match BnepControlType::from_u8(control_type) {
            Some(BnepControlType::SetupRequest) => {
                // This side is PANU only; a peer asking us to act as NAP is declined.
                let mut out = [0u8; 4];
                let n = codec::build_setup_response(&mut out, SetupResponseCode::NotAllowed)?;
                self.send_or_arm(hal, &out[..n]);
                Ok(ChannelEvent::None)
            }
            Some(BnepControlType::SetupResponse) => {
                let code = codec::parse_setup_response(bytes)?;
                if self.state == BnepChannelState::WaitForConnectionResponse
                    && code == SetupResponseCode::Success
                {
                    self.state = BnepChannelState::Connected;
                }
                Ok(ChannelEvent::SetupResult(code))
            }
            Some(BnepControlType::FilterNetTypeSet) => {
                self.reply_filter(hal, BnepControlType::FilterNetTypeResponse)?;
                Ok(ChannelEvent::None)
            }
            Some(BnepControlType::FilterMultiAddrSet) => {
                self.reply_filter(hal, BnepControlType::FilterMultiAddrResponse)?;
                Ok(ChannelEvent::None)
            }
            Some(BnepControlType::CommandNotUnderstood) => {
                logln!(LL::Debug, "bnep: peer sent CommandNotUnderstood");
                Ok(ChannelEvent::None)
            }
            // Filter *responses* are only meaningful to a peer that sent a
            // filter *set*, which this client never does; nothing to act on.
            Some(BnepControlType::FilterNetTypeResponse)
            | Some(BnepControlType::FilterMultiAddrResponse) => Ok(ChannelEvent::None),
            None => {
                let mut out = [0u8; 3];
                let n = codec::build_command_not_understood(&mut out, control_type)?;
                self.send_or_arm(hal, &out[..n]);
                Ok(ChannelEvent::None)
            }
        }
    }

    /// Filtering is deferred to the NAP (spec §4.3): always reply `Unsupported`.
    fn reply_filter<H: Hal>(
        &mut self,
        hal: &mut H,
        reply_type: BnepControlType,
    ) -> Result<(), CodecError> {
        let mut out = [0u8; 4];
        let n = codec::build_filter_response(&mut out, reply_type, FilterResponseCode::Unsupported)?;
        self.send_or_arm(hal, &out[..n]);
        Ok(())
    }
}
