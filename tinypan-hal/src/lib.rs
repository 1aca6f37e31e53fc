#![no_std]
//! External contracts consumed by the `tinypan` core: the radio/L2CAP HAL
//! and the IP-stack "netif" collaborator (spec §6).
//!
//! Nothing in this crate touches real hardware or a real IP stack. It only
//! names the shapes `tinypan` drives against, the way the teacher firmware
//! splits register/type shapes (`betrusted-hal`) from the code that drives
//! them (`sw`).

/// 6-byte Bluetooth device address. Equality only; no ordering is implied
/// by the wire representation.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct BDAddr(pub [u8; 6]);

/// 6-byte Ethernet MAC address.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct EtherAddr(pub [u8; 6]);

impl EtherAddr {
    pub const BROADCAST: EtherAddr = EtherAddr([0xff; 6]);

    /// Derive this side's local MAC from the radio's own Bluetooth device
    /// address: set the locally-administered bit, clear the multicast bit.
    pub fn from_bdaddr(addr: BDAddr) -> EtherAddr {
        let mut bytes = addr.0;
        bytes[0] |= 0x02;
        bytes[0] &= 0xFE;
        EtherAddr(bytes)
    }

    /// Build an address from a 6-byte slice. Panics if `bytes.len() != 6`;
    /// callers are expected to have already length-checked the buffer they
    /// sliced this from (the codec always does).
    pub fn from_slice(bytes: &[u8]) -> EtherAddr {
        let mut a = [0u8; 6];
        a.copy_from_slice(bytes);
        EtherAddr(a)
    }
}

/// IPv4 binding published by the netif collaborator once the IP stack
/// acquires an address. Each field is stored in whatever byte order the IP
/// stack itself uses internally; `tinypan` never interprets these values,
/// only forwards them.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct IpInfo {
    pub ip: u32,
    pub netmask: u32,
    pub gateway: u32,
    pub dns: u32,
    pub has_ip: bool,
}

/// Events the radio HAL reports back to the supervisor.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HalEvent {
    Connected,
    Disconnected,
    ConnectFailed,
    CanSendNow,
}

/// Outcome of a send attempt at the L2CAP layer.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SendResult {
    Sent,
    Busy,
    Error,
}

/// Programmer/HAL-level failure that is not part of normal protocol flow.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HalError {
    NotReady,
    AlreadyConnected,
    Unsupported,
}

/// Minimum local L2CAP MTU required by BNEP (spec §6.1, §6.3).
pub const L2CAP_MTU_MIN: u16 = 1691;

/// Well-known PSM BNEP listens on (spec §6.3).
pub const BNEP_PSM: u16 = 0x000F;

/// The radio/L2CAP HAL contract consumed by `tinypan`.
///
/// This is the only surface meant to touch a real Bluetooth stack; concrete
/// bindings (BlueZ sockets, ESP-IDF Bluedroid, Zephyr, NimBLE) are out of
/// scope for this crate and live elsewhere (spec §1).
///
/// The model is cooperative polling, not callback registration: the facade
/// calls `poll_event`/`poll_rx` once per `process()` cycle. A binding that
/// receives radio events from an interrupt or a separate task must funnel
/// them through a single-producer/single-consumer mailbox that these poll
/// methods drain (spec §5). That queueing is the binding's job, not this
/// trait's.
pub trait Hal {
    fn init(&mut self) -> Result<(), HalError>;
    fn deinit(&mut self);
    fn local_address(&self) -> BDAddr;
    /// Monotonically non-decreasing milliseconds. Allowed to wrap at
    /// `u32::MAX`; callers must use wrap-safe comparisons (`tinypan::tick`).
    fn monotonic_ms(&self) -> u32;

    fn l2cap_connect(&mut self, remote: BDAddr, psm: u16, local_mtu: u16) -> Result<(), HalError>;
    fn l2cap_disconnect(&mut self);
    fn l2cap_send(&mut self, bytes: &[u8]) -> SendResult;
    fn l2cap_can_send(&self) -> bool;
    fn l2cap_request_can_send_now(&mut self);

    /// Drain the next pending connection-level event, if any.
    fn poll_event(&mut self) -> Option<HalEvent>;
    /// Drain the next pending inbound L2CAP PDU into `buf`. Returns the
    /// number of bytes written, or `None` if nothing is pending.
    fn poll_rx(&mut self, buf: &mut [u8]) -> Option<usize>;

    /// Optional non-volatile key/value store, present for parity with spec
    /// §6.1; unused by the `tinypan` core itself.
    fn nvs_load(&self, _key: &str, _buf: &mut [u8]) -> Option<usize> {
        None
    }
    fn nvs_save(&mut self, _key: &str, _value: &[u8]) -> Result<(), HalError> {
        Err(HalError::Unsupported)
    }
}

/// The IP-stack collaborator contract (spec §6.2).
///
/// One trait covers both transport bindings named in spec §4.5: a given
/// build only calls the Ethernet methods (BNEP mode) or the SLIP methods
/// (BLE mode), chosen once at `tinypan::facade::TinyPan::new` via
/// `TransportMode`, never both in the same run. Methods for the inactive
/// mode are simply never invoked; the defaults here exist so a binding only
/// has to implement the half it uses.
pub trait Netif {
    /// Accept a fully BNEP-decapsulated Ethernet II frame for delivery to
    /// the IP stack. Ethernet (BNEP) mode only.
    fn ethernet_input(&mut self, _frame: &[u8]) {}

    /// Drain up to `buf.len()` bytes of SLIP-escaped serial data produced by
    /// this crate's `RxByteRing`. SLIP (BLE) mode only. Returns the number
    /// of bytes copied.
    fn serial_read(&mut self, _buf: &mut [u8]) -> usize {
        0
    }
    /// Signal that newly received SLIP bytes are available to decode.
    fn process_rx_queue(&mut self) {}

    fn link_set_up(&mut self) {}
    fn link_set_down(&mut self) {}
    fn dhcp_start(&mut self) {}
    fn dhcp_stop(&mut self) {}

    /// Poll whether the IP stack has published a new address binding since
    /// the last call. Returns `None` when nothing changed.
    fn poll_ip_info(&mut self) -> Option<IpInfo> {
        None
    }
}

/// Which half of the `Netif` contract a given build exercises (spec §9:
/// "model as a tagged variant rather than runtime-polymorphic objects").
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TransportMode {
    /// BNEP framing over L2CAP, full Ethernet shape.
    Ethernet,
    /// RFC 1055 SLIP byte-stuffing over a BLE byte pipe, no BNEP framing.
    Slip,
}
