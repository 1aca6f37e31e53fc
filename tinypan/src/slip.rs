//! RFC 1055 SLIP byte-stuffing, used only in the BLE binding (spec §4.5.2,
//! §6.3). The distilled spec only names the four escape-code constants and
//! describes SLIP encoding/decoding as something the IP stack's own SLIP
//! emitter/processor does; this module supplies the actual primitives so a
//! concrete `Netif` binding has something to call rather than re-deriving
//! RFC 1055 itself, and so the inbound `RxByteRing` named in spec §3 has a
//! home.

use debug::{logln, LL};

const LOG_LEVEL: LL = LL::Debug;

pub const END: u8 = 0xC0;
pub const ESC: u8 = 0xDB;
pub const ESC_END: u8 = 0xDC;
pub const ESC_ESC: u8 = 0xDD;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SlipError {
    /// The output buffer is too small for the worst-case escaped size.
    BufferTooSmall,
    /// An `ESC` byte was the last byte in the input with no follower.
    TruncatedEscape,
    /// An `ESC` byte was followed by something other than `ESC_END`/`ESC_ESC`.
    BadEscapeSequence,
}

/// Escape `payload` into `out`, appending a trailing `END` (spec §6.3: "RFC
/// 1055 escaping only; no wrapping header"). Returns the number of bytes
/// written. `out` must be at least `worst_case_len(payload.len())` long for
/// this to be guaranteed to succeed.
pub fn encode_frame(payload: &[u8], out: &mut [u8]) -> Result<usize, SlipError> {
    let mut n = 0usize;
    for &b in payload {
        let escaped: &[u8] = match b {
            END => &[ESC, ESC_END],
            ESC => &[ESC, ESC_ESC],
            _ => core::slice::from_ref(&b),
        };
        if n + escaped.len() > out.len() {
            return Err(SlipError::BufferTooSmall);
        }
        out[n..n + escaped.len()].copy_from_slice(escaped);
        n += escaped.len();
    }
    if n + 1 > out.len() {
        return Err(SlipError::BufferTooSmall);
    }
    out[n] = END;
    n += 1;
    Ok(n)
}

/// Upper bound on `encode_frame`'s output length for a payload of `len`
/// bytes: every byte could double, plus the trailing `END`.
pub const fn worst_case_len(len: usize) -> usize {
    len * 2 + 1
}

/// Streaming SLIP decoder: feed raw bytes one at a time, get a complete
/// frame back when an unescaped `END` is seen.
pub struct Decoder<'a> {
    out: &'a mut [u8],
    len: usize,
    escaping: bool,
}

/// Outcome of feeding one byte to a [`Decoder`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DecodeStep {
    /// The byte was consumed; no complete frame yet.
    Pending,
    /// An unescaped `END` completed a frame of `len` bytes (may be zero,
    /// e.g. from a leading `END` used for resynchronization).
    FrameReady(usize),
    /// Decoded output overran the caller's buffer; the in-progress frame is
    /// discarded and decoding resumes on the next `END`.
    Overrun,
    /// `ESC` followed by a byte that isn't `ESC_END`/`ESC_ESC`; the
    /// in-progress frame is discarded.
    BadEscape,
}

impl<'a> Decoder<'a> {
    pub fn new(out: &'a mut [u8]) -> Decoder<'a> {
        Decoder { out, len: 0, escaping: false }
    }

    pub fn frame(&self) -> &[u8] {
        &self.out[..self.len]
    }

    fn reset(&mut self) {
        self.len = 0;
        self.escaping = false;
    }

    fn push(&mut self, b: u8) -> bool {
        if self.len >= self.out.len() {
            return false;
        }
        self.out[self.len] = b;
        self.len += 1;
        true
    }

    /// Feed one raw (still-escaped) byte to the decoder.
    pub fn feed(&mut self, b: u8) -> DecodeStep {
        if self.escaping {
            self.escaping = false;
            let decoded = match b {
                ESC_END => END,
                ESC_ESC => ESC,
                _ => {
                    logln!(LL::Debug, "slip: bad escape sequence");
                    self.reset();
                    return DecodeStep::BadEscape;
                }
            };
            if !self.push(decoded) {
                self.reset();
                return DecodeStep::Overrun;
            }
            return DecodeStep::Pending;
        }
        match b {
            END => {
                let n = self.len;
                self.reset();
                DecodeStep::FrameReady(n)
            }
            ESC => {
                self.escaping = true;
                DecodeStep::Pending
            }
            _ => {
                if !self.push(b) {
                    self.reset();
                    return DecodeStep::Overrun;
                }
                DecodeStep::Pending
            }
        }
    }
}

/// Fixed-capacity byte ring draining raw HAL bytes ahead of the IP stack's
/// serial-read callback (spec §3 `RxByteRing`, SLIP mode only). Unlike
/// `TxQueue`, this carries plain bytes, not framed slots: the SLIP framing
/// lives in whatever decodes out of it.
pub struct RxByteRing<const N: usize> {
    buf: [u8; N],
    head: usize,
    tail: usize,
    count: usize,
}

impl<const N: usize> RxByteRing<N> {
    pub const fn new() -> RxByteRing<N> {
        RxByteRing { buf: [0u8; N], head: 0, tail: 0, count: 0 }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count >= N
    }

    /// Push as many bytes of `bytes` as fit; returns the number accepted.
    /// The remainder is dropped by the caller (the HAL already delivered
    /// them; there is nowhere further to buffer them).
    pub fn push_slice(&mut self, bytes: &[u8]) -> usize {
        let mut n = 0;
        for &b in bytes {
            if self.count >= N {
                logln!(LL::Debug, "slip: rx ring full, dropping byte");
                break;
            }
            self.buf[self.tail] = b;
            self.tail = (self.tail + 1) % N;
            self.count += 1;
            n += 1;
        }
        n
    }

    /// Drain up to `out.len()` bytes into `out` (the `Netif::serial_read`
    /// contract, spec §6.2). Returns the number copied.
    pub fn drain_into(&mut self, out: &mut [u8]) -> usize {
        let mut n = 0;
        while n < out.len() && self.count > 0 {
            out[n] = self.buf[self.head];
            self.head = (self.head + 1) % N;
            self.count -= 1;
            n += 1;
        }
        n
    }
}

/// Default capacity named in spec §3.
pub const RX_BUFFER_SIZE: usize = 1700;
