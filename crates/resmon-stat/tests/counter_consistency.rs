use resmon_stat::{Counter, Dip, Flex2KeyBlocks, KvdAlloc, Protocol, Stat, TcamRegionInfo};

fn region(tag: u8) -> TcamRegionInfo {
    TcamRegionInfo([tag; 16])
}

fn blocks(tag: u8) -> Flex2KeyBlocks {
    Flex2KeyBlocks([tag; 96])
}

fn alloc(slots: u32, counter: Counter) -> KvdAlloc {
    KvdAlloc { slots, counter }
}

/// Drive a mixed sequence of installs and deletes and recompute every counter
/// from the operations that should have stuck. The snapshot must agree.
#[test]
fn counters_equal_sum_of_live_entries() {
    let mut stat = Stat::new();

    stat.ralue_update(
        Protocol::Ipv4,
        24,
        0,
        Dip::from_v4([10, 0, 0, 0]),
        alloc(1, Counter::LpmIpv4),
    )
    .unwrap();
    stat.ralue_update(
        Protocol::Ipv6,
        80,
        3,
        Dip([0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]),
        alloc(2, Counter::LpmIpv6),
    )
    .unwrap();

    stat.ptar_alloc(region(1), alloc(2, Counter::Atcam)).unwrap();
    stat.ptar_alloc(region(2), alloc(4, Counter::Atcam)).unwrap();
    stat.ptce3_alloc(region(1), &blocks(7), 0, 0, 0, 0, alloc(2, Counter::Atcam))
        .unwrap();

    stat.kvdl_alloc(0x1000, alloc(3, Counter::Actset)).unwrap();

    stat.rauht_update(
        Protocol::Ipv6,
        0x70,
        Dip([0xfe; 16]),
        alloc(2, Counter::HosttabIpv6),
    )
    .unwrap();

    // Retire one of each class; the remaining set is what must be counted.
    stat.ptar_free(region(2)).unwrap();
    stat.kvdl_free(0x1000, alloc(1, Counter::Actset)).unwrap();

    let counters = stat.counters();
    assert_eq!(counters.get(Counter::LpmIpv4), 1);
    assert_eq!(counters.get(Counter::LpmIpv6), 2);
    assert_eq!(counters.get(Counter::Atcam), 4, "region 1 + its one rule");
    assert_eq!(counters.get(Counter::Actset), 2, "3 slots allocated, 1 freed");
    assert_eq!(counters.get(Counter::HosttabIpv4), 0);
    assert_eq!(counters.get(Counter::HosttabIpv6), 2);
    assert_eq!(counters.total, 1 + 2 + 4 + 2 + 2);
}

#[test]
fn total_tracks_every_kind() {
    let mut stat = Stat::new();
    for (i, kind) in Counter::ALL.iter().enumerate() {
        stat.kvdl_alloc(0x100 * i as u32, alloc(1, *kind)).unwrap();
    }
    let counters = stat.counters();
    for kind in Counter::ALL {
        assert_eq!(counters.get(kind), 1);
    }
    assert_eq!(counters.total, Counter::COUNT as i64);
}
