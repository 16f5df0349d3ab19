//! Occupancy mirror for the on-chip tables of a Spectrum switching ASIC.
//!
//! The store keeps one keyed index per table class (LPM routes, TCAM regions
//! and rules, host-table neighbors, KVD descriptor slots) together with a
//! vector of per-resource counters denominated in KVD slots. Every mutation
//! of the mirror goes through this crate; the register decoder drives it and
//! the RPC server reads it back out via [`Stat::counters`].

use std::collections::HashMap;
use std::hash::Hash;

use thiserror::Error;

/// Resource counter kinds, in wire/report order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Counter {
    LpmIpv4,
    LpmIpv6,
    Atcam,
    Actset,
    HosttabIpv4,
    HosttabIpv6,
}

/// One row per counter kind: symbolic name and operator-facing description.
const COUNTER_INFO: [(&str, &str); Counter::COUNT] = [
    ("LPM_IPV4", "IPv4 LPM"),
    ("LPM_IPV6", "IPv6 LPM"),
    ("ATCAM", "ATCAM"),
    ("ACTSET", "ACL Action Set"),
    ("HOSTTAB_IPV4", "IPv4 Host Table"),
    ("HOSTTAB_IPV6", "IPv6 Host Table"),
];

impl Counter {
    pub const COUNT: usize = 6;

    pub const ALL: [Counter; Counter::COUNT] = [
        Counter::LpmIpv4,
        Counter::LpmIpv6,
        Counter::Atcam,
        Counter::Actset,
        Counter::HosttabIpv4,
        Counter::HosttabIpv6,
    ];

    /// Symbolic name, e.g. `"LPM_IPV4"`.
    pub fn name(self) -> &'static str {
        COUNTER_INFO[self as usize].0
    }

    /// Human-readable description, e.g. `"IPv4 LPM"`.
    pub fn description(self) -> &'static str {
        COUNTER_INFO[self as usize].1
    }
}

/// Routing protocol selector carried by the RALUE/RAUHT registers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    Ipv4,
    Ipv6,
}

/// Destination IP, always stored as 16 bytes. IPv4 addresses occupy the
/// leading 4 bytes with the rest zeroed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Dip(pub [u8; 16]);

impl Dip {
    pub fn from_v4(bytes: [u8; 4]) -> Self {
        let mut dip = [0u8; 16];
        dip[..4].copy_from_slice(&bytes);
        Dip(dip)
    }
}

/// Opaque identity of a TCAM region.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TcamRegionInfo(pub [u8; 16]);

/// Opaque flexible-key match blocks of a single TCAM rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Flex2KeyBlocks(pub [u8; 96]);

/// How much an installed entry costs and which counter it charges.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KvdAlloc {
    pub slots: u32,
    pub counter: Counter,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StatError {
    #[error("entry not found")]
    NotFound,
    #[error("failed to allocate entry storage")]
    AllocFailed,
}

/// By-value snapshot of all counters plus the derived total.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counters {
    pub values: [i64; Counter::COUNT],
    pub total: i64,
}

impl Counters {
    pub fn get(&self, counter: Counter) -> i64 {
        self.values[counter as usize]
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct RalueKey {
    protocol: Protocol,
    prefix_len: u8,
    virtual_router: u16,
    dip: Dip,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct Ptce3Key {
    tcam_region_info: TcamRegionInfo,
    flex2_key_blocks: Flex2KeyBlocks,
    delta_mask: u8,
    delta_value: u8,
    delta_start: u16,
    erp_id: u8,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct RauhtKey {
    protocol: Protocol,
    rif: u16,
    dip: Dip,
}

/// The mirror itself: four-plus-one keyed indices and the counter vector.
///
/// Invariant: for every counter kind K, `counters[K]` equals the sum of
/// `slots` over all live entries whose descriptor names K. KVDL entries are
/// keyed one per occupied slot and each charges exactly one slot, so partial
/// frees keep the invariant without interval bookkeeping.
#[derive(Debug, Default)]
pub struct Stat {
    counters: [i64; Counter::COUNT],
    ralue: HashMap<RalueKey, KvdAlloc>,
    ptar: HashMap<TcamRegionInfo, KvdAlloc>,
    ptce3: HashMap<Ptce3Key, KvdAlloc>,
    kvdl: HashMap<u32, KvdAlloc>,
    rauht: HashMap<RauhtKey, KvdAlloc>,
}

fn emplace<K: Hash + Eq>(
    counters: &mut [i64; Counter::COUNT],
    index: &mut HashMap<K, KvdAlloc>,
    key: K,
    kvda: KvdAlloc,
) -> Result<(), StatError> {
    if index.contains_key(&key) {
        // Repeated installs of the same entry are idempotent.
        return Ok(());
    }
    index.try_reserve(1).map_err(|_| StatError::AllocFailed)?;
    index.insert(key, kvda);
    counters[kvda.counter as usize] += i64::from(kvda.slots);
    Ok(())
}

fn evict<K: Hash + Eq>(
    counters: &mut [i64; Counter::COUNT],
    index: &mut HashMap<K, KvdAlloc>,
    key: &K,
) -> Result<(), StatError> {
    let kvda = index.remove(key).ok_or(StatError::NotFound)?;
    counters[kvda.counter as usize] -= i64::from(kvda.slots);
    Ok(())
}

impl Stat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot all counters; `total` is derived as the sum over all kinds.
    pub fn counters(&self) -> Counters {
        Counters {
            values: self.counters,
            total: self.counters.iter().sum(),
        }
    }

    /// Install an LPM route entry. Present keys succeed without change:
    /// the driver's RALUE write and update ops are idempotent.
    pub fn ralue_update(
        &mut self,
        protocol: Protocol,
        prefix_len: u8,
        virtual_router: u16,
        dip: Dip,
        kvda: KvdAlloc,
    ) -> Result<(), StatError> {
        let key = RalueKey {
            protocol,
            prefix_len,
            virtual_router,
            dip,
        };
        emplace(&mut self.counters, &mut self.ralue, key, kvda)
    }

    pub fn ralue_delete(
        &mut self,
        protocol: Protocol,
        prefix_len: u8,
        virtual_router: u16,
        dip: Dip,
    ) -> Result<(), StatError> {
        let key = RalueKey {
            protocol,
            prefix_len,
            virtual_router,
            dip,
        };
        evict(&mut self.counters, &mut self.ralue, &key)
    }

    pub fn ptar_alloc(
        &mut self,
        tcam_region_info: TcamRegionInfo,
        kvda: KvdAlloc,
    ) -> Result<(), StatError> {
        emplace(&mut self.counters, &mut self.ptar, tcam_region_info, kvda)
    }

    pub fn ptar_free(&mut self, tcam_region_info: TcamRegionInfo) -> Result<(), StatError> {
        evict(&mut self.counters, &mut self.ptar, &tcam_region_info)
    }

    /// Descriptor of a live region, used to charge rules installed into it.
    pub fn ptar_get(&self, tcam_region_info: TcamRegionInfo) -> Option<KvdAlloc> {
        self.ptar.get(&tcam_region_info).copied()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn ptce3_alloc(
        &mut self,
        tcam_region_info: TcamRegionInfo,
        flex2_key_blocks: &Flex2KeyBlocks,
        delta_mask: u8,
        delta_value: u8,
        delta_start: u16,
        erp_id: u8,
        kvda: KvdAlloc,
    ) -> Result<(), StatError> {
        let key = Ptce3Key {
            tcam_region_info,
            flex2_key_blocks: *flex2_key_blocks,
            delta_mask,
            delta_value,
            delta_start,
            erp_id,
        };
        emplace(&mut self.counters, &mut self.ptce3, key, kvda)
    }

    pub fn ptce3_free(
        &mut self,
        tcam_region_info: TcamRegionInfo,
        flex2_key_blocks: &Flex2KeyBlocks,
        delta_mask: u8,
        delta_value: u8,
        delta_start: u16,
        erp_id: u8,
    ) -> Result<(), StatError> {
        let key = Ptce3Key {
            tcam_region_info,
            flex2_key_blocks: *flex2_key_blocks,
            delta_mask,
            delta_value,
            delta_start,
            erp_id,
        };
        evict(&mut self.counters, &mut self.ptce3, &key)
    }

    /// Install `kvda.slots` consecutive descriptor slots starting at `index`.
    ///
    /// Atomic: if any slot cannot be installed, the slots installed by this
    /// call are rolled back and the store is left exactly as it was.
    pub fn kvdl_alloc(&mut self, index: u32, kvda: KvdAlloc) -> Result<(), StatError> {
        let per_slot = KvdAlloc {
            slots: 1,
            counter: kvda.counter,
        };
        let mut installed = Vec::new();
        for offset in 0..kvda.slots {
            let slot = index + offset;
            if self.kvdl.contains_key(&slot) {
                continue;
            }
            match emplace(&mut self.counters, &mut self.kvdl, slot, per_slot) {
                Ok(()) => installed.push(slot),
                Err(err) => {
                    for slot in installed {
                        let _ = evict(&mut self.counters, &mut self.kvdl, &slot);
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Remove `kvda.slots` consecutive descriptor slots starting at `index`.
    ///
    /// Best-effort: slots that are not occupied are reported as `NotFound`,
    /// but the rest of the range is still freed.
    pub fn kvdl_free(&mut self, index: u32, kvda: KvdAlloc) -> Result<(), StatError> {
        let mut rc = Ok(());
        for offset in 0..kvda.slots {
            if let Err(err) = evict(&mut self.counters, &mut self.kvdl, &(index + offset)) {
                rc = Err(err);
            }
        }
        rc
    }

    /// Install a host-table neighbor entry; idempotent like `ralue_update`.
    pub fn rauht_update(
        &mut self,
        protocol: Protocol,
        rif: u16,
        dip: Dip,
        kvda: KvdAlloc,
    ) -> Result<(), StatError> {
        let key = RauhtKey { protocol, rif, dip };
        emplace(&mut self.counters, &mut self.rauht, key, kvda)
    }

    pub fn rauht_delete(
        &mut self,
        protocol: Protocol,
        rif: u16,
        dip: Dip,
    ) -> Result<(), StatError> {
        let key = RauhtKey { protocol, rif, dip };
        evict(&mut self.counters, &mut self.rauht, &key)
    }
}
