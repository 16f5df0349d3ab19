//! EMAD register decoder.
//!
//! An EMAD buffer is a sequence of big-endian TLVs: an operation TLV naming
//! the register, optionally a string TLV, then the register TLV whose payload
//! is the register image itself. [`process_emad`] walks the envelope, decodes
//! the image of the registers we account for, and applies the resulting
//! install/remove against the [`resmon_stat::Stat`] mirror.
//!
//! The decoder is a pure function of the buffer: every read is bounds-checked
//! up front, and a truncated buffer is rejected before any state is touched.

use resmon_stat::{Counter, Dip, Flex2KeyBlocks, KvdAlloc, Protocol, Stat, TcamRegionInfo};
use thiserror::Error;

/// EMAD TLV types.
pub const TLV_TYPE_END: u8 = 0;
pub const TLV_TYPE_OP: u8 = 1;
pub const TLV_TYPE_STRING: u8 = 2;
pub const TLV_TYPE_REG: u8 = 3;

/// Register IDs of the registers that consume counted resources.
pub const REG_RALUE_ID: u16 = 0x8013;
pub const REG_RAUHT_ID: u16 = 0x8014;
pub const REG_PTAR_ID: u16 = 0x3006;
pub const REG_PTCE3_ID: u16 = 0x3027;
pub const REG_PEFA_ID: u16 = 0x300f;
pub const REG_IEDR_ID: u16 = 0x3804;

const OP_TLV_LEN: usize = 16;
const REG_TLV_HEAD_LEN: usize = 4;

const RALUE_LEN: usize = 28;
const RAUHT_LEN: usize = 32;
const PTAR_LEN: usize = 48;
const PTCE3_LEN: usize = 140;
const PEFA_LEN: usize = 4;
const IEDR_MAX_REC: usize = 64;
const IEDR_REC_LEN: usize = 8;
const IEDR_LEN: usize = 16 + IEDR_MAX_REC * IEDR_REC_LEN;

const RALUE_OP_WRITE_DELETE: u8 = 3;
const RAUHT_OP_WRITE_DELETE: u8 = 3;

const PTAR_OP_ALLOC: u8 = 0;
const PTAR_OP_FREE: u8 = 2;
const PTAR_KEY_TYPE_FLEX: u8 = 0x50;
const PTAR_KEY_TYPE_FLEX2: u8 = 0x51;

const PTCE3_OP_WRITE_WRITE: u8 = 0;
const PTCE3_OP_WRITE_UPDATE: u8 = 1;

const IEDR_REC_TYPE_ACTSET: u8 = 0x23;

/// Decode outcomes other than success. The display strings are the
/// operator-facing messages surfaced over RPC and in the log.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum RegError {
    #[error("EMAD malformed: Payload truncated")]
    TruncatedPayload,
    #[error("EMAD malformed: No register")]
    NoRegister,
    #[error("EMAD malformed: Unknown register")]
    UnknownRegister,
    #[error("EMAD malformed: Inconsistent register")]
    InconsistentRegister,
    #[error("Insert failed")]
    InsertFailed,
    #[error("Delete failed")]
    DeleteFailed,
}

/// Read-only cursor over the EMAD buffer. `view` peeks at a fixed-size
/// prefix without consuming it; `pull` consumes. Both fail `TruncatedPayload`
/// rather than ever reading past the end.
struct Cursor<'a> {
    buf: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Cursor { buf }
    }

    fn view(&self, len: usize) -> Result<&'a [u8], RegError> {
        self.buf.get(..len).ok_or(RegError::TruncatedPayload)
    }

    fn pull(&mut self, len: usize) -> Result<(), RegError> {
        self.buf = self.buf.get(len..).ok_or(RegError::TruncatedPayload)?;
        Ok(())
    }

    fn rest(&self) -> &'a [u8] {
        self.buf
    }
}

fn be16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

fn be32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

/// TLV header: type in the top 5 bits, length in the low 11, counted in
/// 4-byte units inclusive of the header itself.
struct EmadTl {
    ty: u8,
    len_bytes: usize,
}

impl EmadTl {
    fn decode(type_len: u16) -> Self {
        EmadTl {
            ty: (type_len >> 11) as u8,
            len_bytes: usize::from(type_len & 0x7ff) * 4,
        }
    }
}

fn insert_rc(rc: Result<(), resmon_stat::StatError>) -> Result<(), RegError> {
    rc.map_err(|_| RegError::InsertFailed)
}

fn delete_rc(rc: Result<(), resmon_stat::StatError>) -> Result<(), RegError> {
    rc.map_err(|_| RegError::DeleteFailed)
}

/// `dip` union of the route/neighbor registers: IPv6 occupies all 16 bytes,
/// IPv4 the trailing 4, normalized into the front of the key.
fn decode_dip(reg: &[u8], offset: usize, protocol: Protocol) -> Dip {
    match protocol {
        Protocol::Ipv6 => {
            let mut dip = [0u8; 16];
            dip.copy_from_slice(&reg[offset..offset + 16]);
            Dip(dip)
        }
        Protocol::Ipv4 => {
            let mut dip4 = [0u8; 4];
            dip4.copy_from_slice(&reg[offset + 12..offset + 16]);
            Dip::from_v4(dip4)
        }
    }
}

fn decode_protocol(raw: u8) -> Protocol {
    if raw == 1 {
        Protocol::Ipv6
    } else {
        Protocol::Ipv4
    }
}

fn handle_ralue(stat: &mut Stat, payload: &[u8]) -> Result<(), RegError> {
    let reg = Cursor::new(payload).view(RALUE_LEN)?;

    let protocol = decode_protocol(reg[0] & 0x0f);
    let op = (reg[1] >> 4) & 0x07;
    let virtual_router = be16(reg, 4);
    let prefix_len = reg[11];
    let dip = decode_dip(reg, 12, protocol);

    if op == RALUE_OP_WRITE_DELETE {
        return delete_rc(stat.ralue_delete(protocol, prefix_len, virtual_router, dip));
    }

    let kvda = KvdAlloc {
        slots: if prefix_len <= 64 { 1 } else { 2 },
        counter: match protocol {
            Protocol::Ipv4 => Counter::LpmIpv4,
            Protocol::Ipv6 => Counter::LpmIpv6,
        },
    };
    insert_rc(stat.ralue_update(protocol, prefix_len, virtual_router, dip, kvda))
}

fn ptar_kvd_alloc(flexible_keys: &[u8]) -> KvdAlloc {
    let nkeys = flexible_keys.iter().filter(|b| **b != 0).count();
    KvdAlloc {
        slots: if nkeys >= 12 {
            4
        } else if nkeys >= 4 {
            2
        } else {
            1
        },
        counter: Counter::Atcam,
    }
}

fn handle_ptar(stat: &mut Stat, payload: &[u8]) -> Result<(), RegError> {
    let reg = Cursor::new(payload).view(PTAR_LEN)?;

    let op = reg[0] >> 4;
    let key_type = reg[3];
    match key_type {
        PTAR_KEY_TYPE_FLEX | PTAR_KEY_TYPE_FLEX2 => {}
        _ => return Ok(()),
    }

    let mut tcam_region_info = [0u8; 16];
    tcam_region_info.copy_from_slice(&reg[16..32]);
    let tcam_region_info = TcamRegionInfo(tcam_region_info);

    match op {
        PTAR_OP_ALLOC => {
            let kvda = ptar_kvd_alloc(&reg[32..48]);
            insert_rc(stat.ptar_alloc(tcam_region_info, kvda))
        }
        PTAR_OP_FREE => delete_rc(stat.ptar_free(tcam_region_info)),
        // RESIZE, TEST and anything else do not change occupancy.
        _ => Ok(()),
    }
}

fn handle_ptce3(stat: &mut Stat, payload: &[u8]) -> Result<(), RegError> {
    let reg = Cursor::new(payload).view(PTCE3_LEN)?;

    let op = (reg[1] >> 4) & 0x07;
    match op {
        PTCE3_OP_WRITE_WRITE | PTCE3_OP_WRITE_UPDATE => {}
        _ => return Ok(()),
    }

    let valid = reg[0] >> 7 == 1;

    let mut tcam_region_info = [0u8; 16];
    tcam_region_info.copy_from_slice(&reg[16..32]);
    let tcam_region_info = TcamRegionInfo(tcam_region_info);

    let mut key_blocks = [0u8; 96];
    key_blocks.copy_from_slice(&reg[32..128]);
    let key_blocks = Flex2KeyBlocks(key_blocks);

    let erp_id = reg[131] & 0x0f;
    let delta_start = be16(reg, 134) & 0x3ff;
    let delta_mask = reg[137];
    let delta_value = reg[139];

    if valid {
        // The rule inherits the slot charge of its owning region. A miss
        // means the region predates us; reported as a failed insert.
        let kvda = stat
            .ptar_get(tcam_region_info)
            .ok_or(RegError::InsertFailed)?;
        return insert_rc(stat.ptce3_alloc(
            tcam_region_info,
            &key_blocks,
            delta_mask,
            delta_value,
            delta_start,
            erp_id,
            kvda,
        ));
    }

    delete_rc(stat.ptce3_free(
        tcam_region_info,
        &key_blocks,
        delta_mask,
        delta_value,
        delta_start,
        erp_id,
    ))
}

fn handle_pefa(stat: &mut Stat, payload: &[u8]) -> Result<(), RegError> {
    let reg = Cursor::new(payload).view(PEFA_LEN)?;

    let index = be32(reg, 0) & 0x00ff_ffff;
    insert_rc(stat.kvdl_alloc(
        index,
        KvdAlloc {
            slots: 1,
            counter: Counter::Actset,
        },
    ))
}

fn handle_iedr(stat: &mut Stat, payload: &[u8]) -> Result<(), RegError> {
    let reg = Cursor::new(payload).view(IEDR_LEN)?;

    let num_rec = usize::from(reg[3]);
    if num_rec > IEDR_MAX_REC {
        return Err(RegError::InconsistentRegister);
    }

    let mut rc = Ok(());
    for i in 0..num_rec {
        let rec = &reg[16 + i * IEDR_REC_LEN..16 + (i + 1) * IEDR_REC_LEN];
        if rec[0] != IEDR_REC_TYPE_ACTSET {
            continue;
        }
        let size = u32::from(be16(rec, 2));
        let index_start = be32(rec, 4) & 0x00ff_ffff;
        let freed = stat.kvdl_free(
            index_start,
            KvdAlloc {
                slots: size,
                counter: Counter::Actset,
            },
        );
        if freed.is_err() {
            rc = freed;
        }
    }

    delete_rc(rc)
}

fn handle_rauht(stat: &mut Stat, payload: &[u8]) -> Result<(), RegError> {
    let reg = Cursor::new(payload).view(RAUHT_LEN)?;

    let protocol = decode_protocol(reg[0] & 0x03);
    let op = (reg[1] >> 4) & 0x07;
    // The driver masks the router interface with 0x70, not 0xffff.
    let rif = be16(reg, 2) & 0x70;
    let dip = decode_dip(reg, 16, protocol);

    if op == RAUHT_OP_WRITE_DELETE {
        return delete_rc(stat.rauht_delete(protocol, rif, dip));
    }

    let kvda = match protocol {
        Protocol::Ipv4 => KvdAlloc {
            slots: 1,
            counter: Counter::HosttabIpv4,
        },
        Protocol::Ipv6 => KvdAlloc {
            slots: 2,
            counter: Counter::HosttabIpv6,
        },
    };
    insert_rc(stat.rauht_update(protocol, rif, dip, kvda))
}

/// Walk one EMAD buffer and apply the register it carries to `stat`.
pub fn process_emad(stat: &mut Stat, buf: &[u8]) -> Result<(), RegError> {
    let mut cur = Cursor::new(buf);

    let op_tlv = cur.view(OP_TLV_LEN)?;
    let op_tl = EmadTl::decode(be16(op_tlv, 0));
    let reg_id = be16(op_tlv, 4);
    cur.pull(op_tl.len_bytes)?;

    let mut head = cur.view(REG_TLV_HEAD_LEN)?;
    let mut tl = EmadTl::decode(be16(head, 0));

    // Skip over the TLV if it is in fact a string TLV.
    if tl.ty == TLV_TYPE_STRING {
        cur.pull(tl.len_bytes)?;
        head = cur.view(REG_TLV_HEAD_LEN)?;
        tl = EmadTl::decode(be16(head, 0));
    }

    if tl.ty != TLV_TYPE_REG {
        return Err(RegError::NoRegister);
    }

    // Get to the register payload.
    cur.pull(REG_TLV_HEAD_LEN)?;
    let payload = cur.rest();

    match reg_id {
        REG_RALUE_ID => handle_ralue(stat, payload),
        REG_PTAR_ID => handle_ptar(stat, payload),
        REG_PTCE3_ID => handle_ptce3(stat, payload),
        REG_PEFA_ID => handle_pefa(stat, payload),
        REG_IEDR_ID => handle_iedr(stat, payload),
        REG_RAUHT_ID => handle_rauht(stat, payload),
        _ => Err(RegError::UnknownRegister),
    }
}
