//! Builders for synthetic EMAD buffers and register images.

#![allow(dead_code)]

use resmon_reg::{TLV_TYPE_OP, TLV_TYPE_REG, TLV_TYPE_STRING};

pub fn push_tl(out: &mut Vec<u8>, ty: u8, len_units: u16) {
    let type_len = (u16::from(ty) << 11) | (len_units & 0x7ff);
    out.extend_from_slice(&type_len.to_be_bytes());
}

/// 16-byte operation TLV carrying the register id.
pub fn push_op_tlv(out: &mut Vec<u8>, reg_id: u16) {
    push_tl(out, TLV_TYPE_OP, 4);
    out.push(0); // status
    out.push(0); // reserved
    out.extend_from_slice(&reg_id.to_be_bytes());
    out.push(0); // r/method
    out.push(0); // reserved
    out.extend_from_slice(&0u64.to_be_bytes()); // tid
}

/// String TLV of `len_units * 4` bytes total, contents irrelevant.
pub fn push_string_tlv(out: &mut Vec<u8>, len_units: u16) {
    push_tl(out, TLV_TYPE_STRING, len_units);
    out.resize(out.len() + usize::from(len_units) * 4 - 2, 0);
}

/// Assemble a full EMAD: op TLV, optional string TLV, register TLV + image.
pub fn emad(reg_id: u16, reg_payload: &[u8]) -> Vec<u8> {
    emad_with(reg_id, reg_payload, false)
}

pub fn emad_with(reg_id: u16, reg_payload: &[u8], string_tlv: bool) -> Vec<u8> {
    assert_eq!(reg_payload.len() % 4, 0, "register images are word-aligned");
    let mut out = Vec::new();
    push_op_tlv(&mut out, reg_id);
    if string_tlv {
        push_string_tlv(&mut out, 33);
    }
    let units = (4 + reg_payload.len()) / 4;
    push_tl(&mut out, TLV_TYPE_REG, units as u16);
    out.push(0); // reserved
    out.push(0);
    out.extend_from_slice(reg_payload);
    out
}

pub fn ralue(protocol: u8, op: u8, virtual_router: u16, prefix_len: u8, dip: &[u8]) -> Vec<u8> {
    let mut reg = vec![0u8; 28];
    reg[0] = protocol & 0x0f;
    reg[1] = (op & 0x07) << 4;
    reg[4..6].copy_from_slice(&virtual_router.to_be_bytes());
    reg[11] = prefix_len;
    match dip.len() {
        16 => reg[12..28].copy_from_slice(dip),
        4 => reg[24..28].copy_from_slice(dip),
        n => panic!("dip must be 4 or 16 bytes, got {n}"),
    }
    reg
}

pub fn ptar(op: u8, key_type: u8, region: &[u8; 16], flexible_keys: &[u8; 16]) -> Vec<u8> {
    let mut reg = vec![0u8; 48];
    reg[0] = op << 4;
    reg[3] = key_type;
    reg[16..32].copy_from_slice(region);
    reg[32..48].copy_from_slice(flexible_keys);
    reg
}

#[allow(clippy::too_many_arguments)]
pub fn ptce3(
    valid: bool,
    op: u8,
    region: &[u8; 16],
    key_blocks: &[u8; 96],
    delta_mask: u8,
    delta_value: u8,
    delta_start: u16,
    erp_id: u8,
) -> Vec<u8> {
    let mut reg = vec![0u8; 140];
    reg[0] = (valid as u8) << 7;
    reg[1] = (op & 0x07) << 4;
    reg[16..32].copy_from_slice(region);
    reg[32..128].copy_from_slice(key_blocks);
    reg[131] = erp_id;
    reg[134..136].copy_from_slice(&delta_start.to_be_bytes());
    reg[137] = delta_mask;
    reg[139] = delta_value;
    reg
}

pub fn pefa(index: u32) -> Vec<u8> {
    index.to_be_bytes().to_vec()
}

pub struct IedrRecord {
    pub ty: u8,
    pub size: u16,
    pub index_start: u32,
}

pub fn iedr(records: &[IedrRecord]) -> Vec<u8> {
    assert!(records.len() <= 64);
    let mut reg = vec![0u8; 528];
    reg[3] = records.len() as u8;
    for (i, rec) in records.iter().enumerate() {
        let at = 16 + i * 8;
        reg[at] = rec.ty;
        reg[at + 2..at + 4].copy_from_slice(&rec.size.to_be_bytes());
        reg[at + 4..at + 8].copy_from_slice(&rec.index_start.to_be_bytes());
    }
    reg
}

/// Build an IEDR image with a forged record count, for malformed inputs.
pub fn iedr_with_num_rec(num_rec: u8) -> Vec<u8> {
    let mut reg = vec![0u8; 528];
    reg[3] = num_rec;
    reg
}

pub fn rauht(protocol: u8, op: u8, rif: u16, dip: &[u8]) -> Vec<u8> {
    let mut reg = vec![0u8; 32];
    reg[0] = protocol & 0x03;
    reg[1] = (op & 0x07) << 4;
    reg[2..4].copy_from_slice(&rif.to_be_bytes());
    match dip.len() {
        16 => reg[16..32].copy_from_slice(dip),
        4 => reg[28..32].copy_from_slice(dip),
        n => panic!("dip must be 4 or 16 bytes, got {n}"),
    }
    reg
}
