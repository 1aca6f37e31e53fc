//! BNEP framing: building and parsing control and data frames (spec §4.2,
//! §6.3).
//!
//! Builders write into a caller-supplied buffer and return the number of
//! bytes used; parsers return views that borrow from the input slice. No
//! allocation either direction, matching the teacher's `dhcp` module
//! building frames directly into a `pbuf`-shaped `&mut [u8]`.

use tinypan_hal::EtherAddr;

/// Error conditions for the codec (spec §4.2).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CodecError {
    /// Destination buffer passed to a builder is undersized.
    BufferTooSmall,
    /// Source buffer passed to a parser is truncated.
    TooShort,
    /// The low 7 bits of the first byte don't name a known BNEP packet type.
    UnknownType,
    /// A control frame's second byte isn't the control-type tag expected.
    BadControlTag,
}

/// BNEP control message subtypes (spec §3).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BnepControlType {
    CommandNotUnderstood = 0x00,
    SetupRequest = 0x01,
    SetupResponse = 0x02,
    FilterNetTypeSet = 0x03,
    FilterNetTypeResponse = 0x04,
    FilterMultiAddrSet = 0x05,
    FilterMultiAddrResponse = 0x06,
}

impl BnepControlType {
    pub fn from_u8(v: u8) -> Option<BnepControlType> {
        use BnepControlType::*;
        Some(match v {
            0x00 => CommandNotUnderstood,
            0x01 => SetupRequest,
            0x02 => SetupResponse,
            0x03 => FilterNetTypeSet,
            0x04 => FilterNetTypeResponse,
            0x05 => FilterMultiAddrSet,
            0x06 => FilterMultiAddrResponse,
            _ => return None,
        })
    }
}

/// BNEP setup response codes (spec §3).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SetupResponseCode {
    Success = 0x0000,
    InvalidDst = 0x0001,
    InvalidSrc = 0x0002,
    InvalidSvc = 0x0003,
    NotAllowed = 0x0004,
}

impl SetupResponseCode {
    pub fn from_u16(v: u16) -> Option<SetupResponseCode> {
        use SetupResponseCode::*;
        Some(match v {
            0x0000 => Success,
            0x0001 => InvalidDst,
            0x0002 => InvalidSrc,
            0x0003 => InvalidSvc,
            0x0004 => NotAllowed,
            _ => return None,
        })
    }
}

/// BNEP filter response codes (spec §3; distinct namespace from
/// `SetupResponseCode` even though `Success` shares the same wire value).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FilterResponseCode {
    Success = 0x0000,
    Unsupported = 0x0001,
}

/// Bluetooth SDP service class UUIDs relevant to PAN (spec §3). This client
/// advertises `Panu` as its own source role and requests `Nap` as the
/// destination role when it builds a setup request.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PanServiceUuid {
    Panu = 0x1115,
    Nap = 0x1116,
    Gn = 0x1117,
}

/// A BNEP packet classified from its wire header, but (for data frames)
/// without the local/remote address substitution that compression implies.
/// See [`parse_ethernet_frame`] for the fully-resolved view.
#[derive(Clone, Copy, Debug)]
pub enum BnepPacketType<'a> {
    GeneralEthernet {
        dst: EtherAddr,
        src: EtherAddr,
        ethertype: u16,
    },
    ControlFrame {
        control_type: u8,
        body: &'a [u8],
    },
    CompressedEthernet {
        ethertype: u16,
    },
    CompressedSrcOnly {
        src: EtherAddr,
        ethertype: u16,
    },
    CompressedDstOnly {
        dst: EtherAddr,
        ethertype: u16,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum WireType {
    GeneralEthernet,
    Control,
    CompressedEthernet,
    CompressedSrcOnly,
    CompressedDstOnly,
}

impl WireType {
    fn from_tag(tag: u8) -> Option<WireType> {
        use WireType::*;
        Some(match tag {
            0x00 => GeneralEthernet,
            0x01 => Control,
            0x02 => CompressedEthernet,
            0x03 => CompressedSrcOnly,
            0x04 => CompressedDstOnly,
            _ => return None,
        })
    }

    /// Length of the fixed header, excluding any extension chain: the
    /// point at which the extension chain (if present) or payload begins.
    fn fixed_header_len(self) -> usize {
        match self {
            WireType::GeneralEthernet => 15,
            WireType::Control => 2,
            WireType::CompressedEthernet => 3,
            WireType::CompressedSrcOnly | WireType::CompressedDstOnly => 9,
        }
    }
}

/// Classify the first byte of a BNEP PDU: packet type, whether an extension
/// header chain follows, and the length of the fixed header before that
/// chain (spec §4.2, §6.3).
pub fn parse_header(bytes: &[u8]) -> Result<(u8, bool, usize), CodecError> {
    let first = *bytes.first().ok_or(CodecError::TooShort)?;
    let tag = first & 0x7f;
    let has_ext = first & 0x80 != 0;
    let wt = WireType::from_tag(tag).ok_or(CodecError::UnknownType)?;
    let header_len = wt.fixed_header_len();
    if bytes.len() < header_len {
        return Err(CodecError::TooShort);
    }
    Ok((tag, has_ext, header_len))
}

/// Walk a chain of `(tag, len)` extension headers starting at `bytes[0]`.
/// Returns the total number of bytes consumed by the chain (0 if
/// `has_ext` is false). Rejects a chain that overruns the buffer.
fn skip_extensions(bytes: &[u8], has_ext: bool) -> Result<usize, CodecError> {
    let mut consumed = 0usize;
    let mut more = has_ext;
    while more {
        if bytes.len() < consumed + 2 {
            return Err(CodecError::TooShort);
        }
        let ext_tag = bytes[consumed];
        let ext_len = bytes[consumed + 1] as usize;
        if bytes.len() < consumed + 2 + ext_len {
            return Err(CodecError::TooShort);
        }
        more = ext_tag & 0x80 != 0;
        consumed += 2 + ext_len;
    }
    Ok(consumed)
}

/// Classify a BNEP PDU's packet type without resolving compressed
/// addresses or skipping extension headers. Used by the channel layer to
/// dispatch on packet type before deciding what, if anything, to resolve
/// further.
pub fn classify<'a>(bytes: &'a [u8]) -> Result<(BnepPacketType<'a>, bool), CodecError> {
    let (tag, has_ext, header_len) = parse_header(bytes)?;
    let wt = WireType::from_tag(tag).ok_or(CodecError::UnknownType)?;
    let pkt = match wt {
        WireType::GeneralEthernet => BnepPacketType::GeneralEthernet {
            dst: EtherAddr::from_slice(&bytes[1..7]),
            src: EtherAddr::from_slice(&bytes[7..13]),
            ethertype: u16::from_be_bytes([bytes[13], bytes[14]]),
        },
        WireType::CompressedEthernet => BnepPacketType::CompressedEthernet {
            ethertype: u16::from_be_bytes([bytes[1], bytes[2]]),
        },
        WireType::CompressedSrcOnly => BnepPacketType::CompressedSrcOnly {
            src: EtherAddr::from_slice(&bytes[1..7]),
            ethertype: u16::from_be_bytes([bytes[7], bytes[8]]),
        },
        WireType::CompressedDstOnly => BnepPacketType::CompressedDstOnly {
            dst: EtherAddr::from_slice(&bytes[1..7]),
            ethertype: u16::from_be_bytes([bytes[7], bytes[8]]),
        },
        WireType::Control => BnepPacketType::ControlFrame {
            control_type: bytes[1],
            body: &bytes[header_len..],
        },
    };
    Ok((pkt, has_ext))
}

/// A fully-resolved inbound Ethernet-shaped view: addresses substituted per
/// the compression rules in spec §4.2, extension headers skipped, payload
/// a zero-copy slice into the input.
#[derive(Clone, Copy, Debug)]
pub struct EthernetFrame<'a> {
    pub dst: EtherAddr,
    pub src: EtherAddr,
    pub ethertype: u16,
    pub payload: &'a [u8],
}

/// Parse an inbound BNEP data frame into its Ethernet-shaped view,
/// substituting `local_addr`/`remote_addr` for addresses compression
/// omitted (spec §4.2). Returns `UnknownType` for control frames. Those
/// are handled by [`classify`] plus the control parsers instead.
pub fn parse_ethernet_frame<'a>(
    bytes: &'a [u8],
    local_addr: EtherAddr,
    remote_addr: EtherAddr,
) -> Result<EthernetFrame<'a>, CodecError> {
    let (pkt, has_ext) = classify(bytes)?;
    let (dst, src, ethertype, header_len) = match pkt {
        BnepPacketType::GeneralEthernet { dst, src, ethertype } => (dst, src, ethertype, 15),
        BnepPacketType::CompressedEthernet { ethertype } => {
            (local_addr, remote_addr, ethertype, 3)
        }
        BnepPacketType::CompressedSrcOnly { src, ethertype } => (local_addr, src, ethertype, 9),
        BnepPacketType::CompressedDstOnly { dst, ethertype } => (dst, remote_addr, ethertype, 9),
        BnepPacketType::ControlFrame { .. } => return Err(CodecError::UnknownType),
    };
    let ext_len = skip_extensions(&bytes[header_len..], has_ext)?;
    let payload_start = header_len + ext_len;
    Ok(EthernetFrame {
        dst,
        src,
        ethertype,
        payload: &bytes[payload_start..],
    })
}

/// Build a BNEP setup request: `0x01 | 0x01 | 0x02 | dst_uuid_be | src_uuid_be`.
pub fn build_setup_request(
    out: &mut [u8],
    src_uuid: PanServiceUuid,
    dst_uuid: PanServiceUuid,
) -> Result<usize, CodecError> {
    const LEN: usize = 7;
    if out.len() < LEN {
        return Err(CodecError::BufferTooSmall);
    }
    out[0] = 0x01;
    out[1] = BnepControlType::SetupRequest as u8;
    out[2] = 0x02; // uuid_size
    out[3..5].copy_from_slice(&(dst_uuid as u16).to_be_bytes());
    out[5..7].copy_from_slice(&(src_uuid as u16).to_be_bytes());
    Ok(LEN)
}

/// Build a BNEP setup response: `0x01 | 0x02 | code_be`.
pub fn build_setup_response(out: &mut [u8], code: SetupResponseCode) -> Result<usize, CodecError> {
    const LEN: usize = 4;
    if out.len() < LEN {
        return Err(CodecError::BufferTooSmall);
    }
    out[0] = 0x01;
    out[1] = BnepControlType::SetupResponse as u8;
    out[2..4].copy_from_slice(&(code as u16).to_be_bytes());
    Ok(LEN)
}

/// Build a filter-set reply: `0x01 | (0x04 | 0x06) | code_be` (spec §6.3).
pub fn build_filter_response(
    out: &mut [u8],
    control_type: BnepControlType,
    code: FilterResponseCode,
) -> Result<usize, CodecError> {
    const LEN: usize = 4;
    if out.len() < LEN {
        return Err(CodecError::BufferTooSmall);
    }
    out[0] = 0x01;
    out[1] = control_type as u8;
    out[2..4].copy_from_slice(&(code as u16).to_be_bytes());
    Ok(LEN)
}

/// Build a "command not understood" reply echoing the offending control
/// type tag.
pub fn build_command_not_understood(out: &mut [u8], offending_tag: u8) -> Result<usize, CodecError> {
    const LEN: usize = 3;
    if out.len() < LEN {
        return Err(CodecError::BufferTooSmall);
    }
    out[0] = 0x01;
    out[1] = BnepControlType::CommandNotUnderstood as u8;
    out[2] = offending_tag;
    Ok(LEN)
}

/// Build a BNEP general-Ethernet data frame: `type | dst | src | ethertype | payload`.
pub fn build_general_ethernet(
    out: &mut [u8],
    dst: EtherAddr,
    src: EtherAddr,
    ethertype: u16,
    payload: &[u8],
) -> Result<usize, CodecError> {
    let total = 15 + payload.len();
    if out.len() < total {
        return Err(CodecError::BufferTooSmall);
    }
    out[0] = 0x00;
    out[1..7].copy_from_slice(&dst.0);
    out[7..13].copy_from_slice(&src.0);
    out[13..15].copy_from_slice(&ethertype.to_be_bytes());
    out[15..total].copy_from_slice(payload);
    Ok(total)
}

/// Build a BNEP compressed-Ethernet data frame: `type | ethertype | payload`.
pub fn build_compressed_ethernet(
    out: &mut [u8],
    ethertype: u16,
    payload: &[u8],
) -> Result<usize, CodecError> {
    let total = 3 + payload.len();
    if out.len() < total {
        return Err(CodecError::BufferTooSmall);
    }
    out[0] = 0x02;
    out[1..3].copy_from_slice(&ethertype.to_be_bytes());
    out[3..total].copy_from_slice(payload);
    Ok(total)
}

/// Parse a setup response frame, verifying the control-type tag byte is
/// `SetupResponse` first.
pub fn parse_setup_response(bytes: &[u8]) -> Result<SetupResponseCode, CodecError> {
    if bytes.len() < 4 {
        return Err(CodecError::TooShort);
    }
    if bytes[0] & 0x7f != 0x01 {
        return Err(CodecError::UnknownType);
    }
    if bytes[1] != BnepControlType::SetupResponse as u8 {
        return Err(CodecError::BadControlTag);
    }
    let code = u16::from_be_bytes([bytes[2], bytes[3]]);
    SetupResponseCode::from_u16(code).ok_or(CodecError::BadControlTag)
}

/// Parse a setup request frame (only ever received by a NAP; this client
/// always declines one, but still needs to parse it to know what to
/// decline).
pub fn parse_setup_request(bytes: &[u8]) -> Result<(PanServiceUuid, PanServiceUuid), CodecError> {
    if bytes.len() < 7 {
        return Err(CodecError::TooShort);
    }
    if bytes[0] & 0x7f != 0x01 || bytes[1] != BnepControlType::SetupRequest as u8 {
        return Err(CodecError::BadControlTag);
    }
    let uuid_size = bytes[2];
    if uuid_size != 0x02 {
        return Err(CodecError::BadControlTag);
    }
    let dst = u16::from_be_bytes([bytes[3], bytes[4]]);
    let src = u16::from_be_bytes([bytes[5], bytes[6]]);
    let uuid = |v: u16| match v {
        0x1115 => Some(PanServiceUuid::Panu),
        0x1116 => Some(PanServiceUuid::Nap),
        0x1117 => Some(PanServiceUuid::Gn),
        _ => None,
    };
    match (uuid(dst), uuid(src)) {
        (Some(d), Some(s)) => Ok((d, s)),
        _ => Err(CodecError::BadControlTag),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_request_wire_bytes_match_s1_scenario() {
        let mut buf = [0u8; 7];
        let n = build_setup_request(&mut buf, PanServiceUuid::Panu, PanServiceUuid::Nap).unwrap();
        assert_eq!(n, 7);
        assert_eq!(buf, [0x01, 0x01, 0x02, 0x11, 0x16, 0x11, 0x15]);
    }

    #[test]
    fn setup_response_round_trips() {
        let mut buf = [0u8; 4];
        build_setup_response(&mut buf, SetupResponseCode::Success).unwrap();
        assert_eq!(buf, [0x01, 0x02, 0x00, 0x00]);
        assert_eq!(parse_setup_response(&buf), Ok(SetupResponseCode::Success));

        build_setup_response(&mut buf, SetupResponseCode::NotAllowed).unwrap();
        assert_eq!(parse_setup_response(&buf), Ok(SetupResponseCode::NotAllowed));
    }

    #[test]
    fn filter_response_wire_bytes() {
        let mut buf = [0u8; 4];
        build_filter_response(
            &mut buf,
            BnepControlType::FilterNetTypeResponse,
            FilterResponseCode::Unsupported,
        )
        .unwrap();
        assert_eq!(buf, [0x01, 0x04, 0x00, 0x01]);
    }

    #[test]
    fn general_ethernet_round_trip() {
        let dst = EtherAddr([1, 2, 3, 4, 5, 6]);
        let src = EtherAddr([6, 5, 4, 3, 2, 1]);
        let payload = [0xAAu8; 20];
        let mut buf = [0u8; 64];
        let n = build_general_ethernet(&mut buf, dst, src, 0x0800, &payload).unwrap();
        assert_eq!(n, 15 + payload.len());

        let frame = parse_ethernet_frame(&buf[..n], src, dst).unwrap();
        assert_eq!(frame.dst, dst);
        assert_eq!(frame.src, src);
        assert_eq!(frame.ethertype, 0x0800);
        assert_eq!(frame.payload, &payload[..]);
    }

    #[test]
    fn compressed_ethernet_substitutes_local_and_remote() {
        let local = EtherAddr([0x02, 0, 0, 0, 0, 1]);
        let remote = EtherAddr([0xAA; 6]);
        let payload = [0xCCu8; 5];
        let mut buf = [0u8; 32];
        let n = build_compressed_ethernet(&mut buf, 0x0800, &payload).unwrap();
        assert_eq!(n, 3 + payload.len());

        let frame = parse_ethernet_frame(&buf[..n], local, remote).unwrap();
        assert_eq!(frame.dst, remote);
        assert_eq!(frame.src, local);
        assert_eq!(frame.payload, &payload[..]);
    }

    #[test]
    fn extension_chain_is_skipped() {
        let local = EtherAddr([0x02, 0, 0, 0, 0, 1]);
        let remote = EtherAddr([0xAA; 6]);
        // Compressed ethernet, has_ext bit set, one extension (tag without
        // continuation bit, 2 bytes of data), then a 3-byte payload.
        let mut buf = Vec::<u8>::new();
        buf.push(0x02 | 0x80);
        buf.extend_from_slice(&0x0800u16.to_be_bytes());
        buf.push(0x00); // extension tag, no continuation
        buf.push(2); // extension length
        buf.extend_from_slice(&[0xEE, 0xEE]);
        buf.extend_from_slice(&[1, 2, 3]);

        let frame = parse_ethernet_frame(&buf, local, remote).unwrap();
        assert_eq!(frame.payload, &[1, 2, 3]);
    }

    #[test]
    fn extension_chain_overrun_is_rejected() {
        let local = EtherAddr([0x02, 0, 0, 0, 0, 1]);
        let remote = EtherAddr([0xAA; 6]);
        let mut buf = Vec::<u8>::new();
        buf.push(0x02 | 0x80);
        buf.extend_from_slice(&0x0800u16.to_be_bytes());
        buf.push(0x00);
        buf.push(200); // claims 200 bytes of extension data that aren't there
        assert_eq!(
            parse_ethernet_frame(&buf, local, remote),
            Err(CodecError::TooShort)
        );
    }

    #[test]
    fn truncated_header_is_too_short() {
        assert_eq!(parse_header(&[]), Err(CodecError::TooShort));
        assert_eq!(parse_header(&[0x00, 0x01]), Err(CodecError::TooShort));
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert_eq!(parse_header(&[0x7F]), Err(CodecError::UnknownType));
    }

    #[test]
    fn setup_response_bad_control_tag() {
        let bytes = [0x01, 0x03, 0x00, 0x00]; // control type 0x03, not SetupResponse
        assert_eq!(
            parse_setup_response(&bytes),
            Err(CodecError::BadControlTag)
        );
    }

    #[test]
    fn classify_control_frame_exposes_body() {
        let bytes = [0x01, BnepControlType::FilterNetTypeSet as u8, 0xAA, 0xBB];
        let (pkt, has_ext) = classify(&bytes).unwrap();
        assert!(!has_ext);
        match pkt {
            BnepPacketType::ControlFrame { control_type, body } => {
                assert_eq!(control_type, BnepControlType::FilterNetTypeSet as u8);
                assert_eq!(body, &[0xAA, 0xBB]);
            }
            _ => panic!("expected control frame"),
        }
    }

    #[test]
    fn builders_report_buffer_too_small() {
        let mut tiny = [0u8; 2];
        assert_eq!(
            build_setup_request(&mut tiny, PanServiceUuid::Panu, PanServiceUuid::Nap),
            Err(CodecError::BufferTooSmall)
        );
        assert_eq!(
            build_general_ethernet(&mut tiny, EtherAddr::default(), EtherAddr::default(), 0, &[]),
            Err(CodecError::BufferTooSmall)
        );
    }
}
