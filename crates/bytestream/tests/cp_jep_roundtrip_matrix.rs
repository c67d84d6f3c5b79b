//! CP and JEP fragment round-trip matrix.

use l1calo_bytestream::{
    ChannelId, CmmCpHits, CmmEtSums, CmmJetHits, CodecConfig, CodecSession, CpmHits, CpmTower,
    JemEtSums, JemHits, JetElement, Topology,
};

fn session() -> CodecSession {
    CodecSession::new(CodecConfig::default())
}

fn cp_topology() -> Topology {
    Topology {
        crates: 2,
        modules: 4,
        channels: 6,
        slinks: 2,
    }
}

fn jep_topology() -> Topology {
    Topology {
        crates: 2,
        modules: 4,
        channels: 5,
        slinks: 2,
    }
}

#[test]
fn cp_towers_and_hits_roundtrip() {
    let session = session();
    let topo = cp_topology();

    // Modules 3 and 4 ride the second S-Link of this topology.
    let towers = vec![
        CpmTower {
            id: ChannelId::new(0, 3, 1),
            em: vec![17, 0],
            had: vec![3, 200],
            em_error: vec![0, 1],
            had_error: vec![0, 0],
            peak: 1,
        },
        CpmTower {
            id: ChannelId::new(0, 4, 5),
            em: vec![0, 255],
            had: vec![0, 0],
            em_error: vec![0, 0],
            had_error: vec![2, 0],
            peak: 1,
        },
    ];
    let hits = vec![CpmHits {
        crate_no: 0,
        module: 4,
        hits0: vec![0, 0xabcdef],
        hits1: vec![0x000fff, 0],
        peak: 1,
    }];
    let cmm_hits = vec![
        CmmCpHits {
            crate_no: 0,
            data_id: 3,
            hits0: vec![0x1, 0x2],
            hits1: vec![0x3, 0x4],
            err0: vec![0, 0],
            err1: vec![1, 0],
            peak: 1,
        },
        CmmCpHits {
            crate_no: 0,
            data_id: CmmCpHits::TOTAL,
            hits0: vec![0x10, 0x20],
            hits1: vec![0, 0],
            err0: vec![0, 0],
            err1: vec![0, 0],
            peak: 1,
        },
    ];

    let fragment = session
        .encode_cp_with(&towers, &hits, &cmm_hits, 0, 1, &topo)
        .expect("encode");
    let event = session
        .decode_fragment_with(&fragment, &topo)
        .expect("decode");

    assert_eq!(event.cpm_towers, towers);
    assert_eq!(event.cpm_hits, hits);
    assert_eq!(event.cmm_cp_hits, cmm_hits);
}

#[test]
fn cp_first_slink_has_no_cmm_block() {
    let session = session();
    let topo = cp_topology();
    let cmm_hits = vec![CmmCpHits {
        crate_no: 0,
        data_id: 0,
        hits0: vec![0x7],
        hits1: vec![0],
        err0: vec![0],
        err1: vec![0],
        peak: 0,
    }];

    // The merger data belongs to the crate's last link only.
    let fragment = session
        .encode_cp_with(&[], &[], &cmm_hits, 0, 0, &topo)
        .expect("encode");
    let event = session
        .decode_fragment_with(&fragment, &topo)
        .expect("decode");
    assert!(event.cmm_cp_hits.is_empty());

    let fragment = session
        .encode_cp_with(&[], &[], &cmm_hits, 0, 1, &topo)
        .expect("encode");
    let event = session
        .decode_fragment_with(&fragment, &topo)
        .expect("decode");
    assert_eq!(event.cmm_cp_hits, cmm_hits);
}

#[test]
fn jep_full_roundtrip() {
    let session = session();
    let topo = jep_topology();

    let elements = vec![
        JetElement {
            id: ChannelId::new(1, 2, 0),
            em: vec![1023, 2],
            had: vec![0, 512],
            em_parity: vec![0, 1],
            had_parity: vec![0, 0],
            link_error: vec![0, 3],
            peak: 0,
        },
        JetElement {
            id: ChannelId::new(1, 3, 4),
            em: vec![7, 0],
            had: vec![9, 0],
            em_parity: vec![0, 0],
            had_parity: vec![1, 0],
            link_error: vec![0, 0],
            peak: 0,
        },
    ];
    let hits = vec![JemHits {
        crate_no: 1,
        module: 2,
        hits: vec![0xfff000, 0x000001],
        peak: 0,
    }];
    let sums = vec![JemEtSums {
        crate_no: 1,
        module: 3,
        ex: vec![0xfff, 0],
        ey: vec![0, 0x123],
        et: vec![0x456, 0],
        peak: 0,
    }];
    let cmm_hits = vec![CmmJetHits {
        crate_no: 1,
        data_id: CmmJetHits::TOTAL_MAIN,
        hits: vec![0x80, 0],
        error: vec![0, 2],
        peak: 0,
    }];
    let cmm_sums = vec![CmmEtSums {
        crate_no: 1,
        data_id: CmmEtSums::LOCAL,
        ex: vec![0x100, 0],
        ey: vec![0, 0x200],
        et: vec![0x300, 0x400],
        error: vec![0, 7],
        peak: 0,
    }];

    // Modules 2 and 3 plus both CMMs ride the last S-Link.
    let fragment = session
        .encode_jep_with(&elements, &hits, &sums, &cmm_hits, &cmm_sums, 1, 1, &topo)
        .expect("encode");
    let event = session
        .decode_fragment_with(&fragment, &topo)
        .expect("decode");

    assert_eq!(event.jet_elements, elements);
    assert_eq!(event.jem_hits, hits);
    assert_eq!(event.jem_et_sums, sums);
    assert_eq!(event.cmm_jet_hits, cmm_hits);
    assert_eq!(event.cmm_et_sums, cmm_sums);
}

#[test]
fn jep_encode_is_deterministic() {
    let session = session();
    let sums = vec![JemEtSums {
        crate_no: 0,
        module: 0,
        ex: vec![1],
        ey: vec![2],
        et: vec![3],
        peak: 0,
    }];
    let first = session
        .encode_jep(&[], &[], &sums, &[], &[], 0, 0)
        .expect("encode");
    let second = session
        .encode_jep(&[], &[], &sums, &[], &[], 0, 0)
        .expect("encode");
    assert_eq!(first, second);
}
