//! PPM fragment round-trip matrix.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

use l1calo_bytestream::{
    ChannelId, CodecConfig, CodecSession, SubsystemKind, Topology, TriggerTower,
};

/// Small test topology: one crate, four modules of eight channels, one
/// module per S-Link.
fn small_topology() -> Topology {
    Topology {
        crates: 2,
        modules: 4,
        channels: 8,
        slinks: 4,
    }
}

fn session_with(props: serde_json::Value) -> CodecSession {
    let map = props.as_object().cloned().unwrap_or_default();
    CodecSession::new(CodecConfig::from_properties(&map).expect("config"))
}

/// Every channel of one module, with a recognisable ramp in the samples.
fn dense_module(crate_no: u8, module: u8, channels: u16) -> Vec<TriggerTower> {
    (0..channels)
        .map(|chan| {
            let mut tower = TriggerTower::empty(ChannelId::new(crate_no, module, chan), 1, 7, 0, 3);
            tower.lut[0] = u16::from(chan % 2) * 40;
            for (slice, sample) in tower.fadc.iter_mut().enumerate() {
                *sample = 10 + chan * 3 + slice as u16;
            }
            tower.bcid_lut[0] = if chan % 2 == 1 { 0x4 } else { 0 };
            tower.bcid_fadc[3] = u8::from(chan % 3 == 0);
            tower
        })
        .collect()
}

#[test]
fn ppm_uncompressed_roundtrip() {
    let session = session_with(json!({"DataFormat": 1}));
    let topo = small_topology();
    let towers = dense_module(0, 2, topo.channels);

    let fragment = session
        .encode_trigger_towers_with(&towers, 0, 2, &topo)
        .expect("encode");
    let event = session
        .decode_fragment_with(&fragment, &topo)
        .expect("decode");
    assert_eq!(event.trigger_towers, towers);
    assert_eq!(event.rod_headers.len(), 1);
}

#[test]
fn ppm_compressed_roundtrip_both_versions() {
    for version in [0, 1] {
        let session = session_with(json!({
            "DataFormat": 2,
            "CompressionVersion": version,
        }));
        let topo = small_topology();
        let towers = dense_module(1, 1, topo.channels);

        let fragment = session
            .encode_trigger_towers_with(&towers, 1, 1, &topo)
            .expect("encode");
        let event = session
            .decode_fragment_with(&fragment, &topo)
            .expect("decode");
        assert_eq!(event.trigger_towers, towers, "compression version {version}");
    }
}

#[test]
fn ppm_encode_is_deterministic() {
    let session = session_with(json!({"DataFormat": 2}));
    let topo = small_topology();
    let towers = dense_module(0, 0, topo.channels);

    let first = session
        .encode_trigger_towers_with(&towers, 0, 0, &topo)
        .expect("encode");
    let second = session
        .encode_trigger_towers_with(&towers, 0, 0, &topo)
        .expect("encode");
    assert_eq!(first, second);
}

#[test]
fn ppm_channel_errors_roundtrip() {
    let session = session_with(json!({"DataFormat": 1}));
    let topo = small_topology();
    let mut towers = dense_module(0, 3, topo.channels);
    // Disabled bit is channel-local; put one on each G-Link pin.
    towers[1].error = 0x1;
    towers[6].error = 0x1;

    let fragment = session
        .encode_trigger_towers_with(&towers, 0, 3, &topo)
        .expect("encode");
    let event = session
        .decode_fragment_with(&fragment, &topo)
        .expect("decode");
    assert_eq!(event.trigger_towers, towers);
}

#[test]
fn ppm_shared_mcm_error_spreads_over_pin() {
    let session = session_with(json!({"DataFormat": 2}));
    let topo = small_topology();
    let mut towers = dense_module(0, 0, topo.channels);
    // Shared MCM bits live in the pin word; every channel of the first
    // ASIC group reports them after decode.
    for tower in towers.iter_mut().take(4) {
        tower.error = 0x20;
    }

    let fragment = session
        .encode_trigger_towers_with(&towers, 0, 0, &topo)
        .expect("encode");
    let event = session
        .decode_fragment_with(&fragment, &topo)
        .expect("decode");
    assert_eq!(event.trigger_towers, towers);
}

#[test]
fn ppm_zero_suppressed_quiet_module() {
    // Spec scenario: four sub-pedestal channels, ZeroSuppress on, and a
    // compressed fragment with no channel payload at all.
    let session = session_with(json!({
        "DataFormat": 2,
        "CompressionVersion": 1,
        "PedestalValue": 10,
        "ZeroSuppress": 1,
        "SlinksPerCrate": 4,
    }));
    let topo = Topology {
        crates: 1,
        modules: 4,
        channels: 4,
        slinks: 4,
    };
    let towers: Vec<TriggerTower> = (0..4)
        .map(|chan| {
            let mut tower = TriggerTower::empty(ChannelId::new(0, 0, chan), 1, 7, 0, 3);
            for (slice, sample) in tower.fadc.iter_mut().enumerate() {
                *sample = 3 + (slice as u16 % 4); // all below pedestal
            }
            tower
        })
        .collect();

    let fragment = session
        .encode_trigger_towers_with(&towers, 0, 0, &topo)
        .expect("encode");
    let event = session
        .decode_fragment_with(&fragment, &topo)
        .expect("decode");

    // All four towers come back as all-zero entries.
    assert_eq!(event.trigger_towers.len(), 4);
    for (chan, tower) in event.trigger_towers.iter().enumerate() {
        assert_eq!(tower.id, ChannelId::new(0, 0, chan as u16));
        assert!(tower.is_zero());
    }

    // Payload: user header, one sub-block header, one word of absent
    // scheme codes. No channel blocks.
    let session_headers = session.decode_rod_headers([fragment.as_slice()]).expect("headers");
    assert_eq!(session_headers[0].payload_size, 3);
}

#[test]
fn ppm_force_slices_fadc_truncates() {
    let session = session_with(json!({"DataFormat": 1, "ForceSlicesFADC": 5}));
    let topo = small_topology();
    let towers = dense_module(0, 1, topo.channels);

    let fragment = session
        .encode_trigger_towers_with(&towers, 0, 1, &topo)
        .expect("encode");
    let event = session
        .decode_fragment_with(&fragment, &topo)
        .expect("decode");
    for tower in &event.trigger_towers {
        assert_eq!(tower.fadc.len(), 5);
        assert_eq!(tower.adc_peak, 2);
    }
    // The triggered sample survives the slice change.
    let original = &towers[0];
    let decoded = &event.trigger_towers[0];
    assert_eq!(decoded.fadc[decoded.adc_peak], original.fadc[original.adc_peak]);
}

#[test]
fn ppm_empty_collection_encodes_empty_module() {
    let session = session_with(json!({"DataFormat": 1}));
    let topo = small_topology();

    let fragment = session
        .encode_trigger_towers_with(&[], 0, 0, &topo)
        .expect("encode");
    let event = session
        .decode_fragment_with(&fragment, &topo)
        .expect("decode");
    assert_eq!(event.trigger_towers.len(), usize::from(topo.channels));
    assert!(event.trigger_towers.iter().all(TriggerTower::is_zero));
}

#[test]
fn ppm_random_samples_roundtrip() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for format in [1, 2] {
        let session = session_with(json!({"DataFormat": format}));
        let topo = small_topology();
        let towers: Vec<TriggerTower> = (0..topo.channels)
            .map(|chan| {
                let mut tower = TriggerTower::empty(ChannelId::new(0, 0, chan), 1, 7, 0, 3);
                tower.lut[0] = rng.gen_range(0..=0xff);
                tower.bcid_lut[0] = rng.gen_range(0..=0x7);
                for sample in tower.fadc.iter_mut() {
                    *sample = rng.gen_range(0..=0x3ff);
                }
                tower
            })
            .collect();

        let fragment = session
            .encode_trigger_towers_with(&towers, 0, 0, &topo)
            .expect("encode");
        let event = session
            .decode_fragment_with(&fragment, &topo)
            .expect("decode");
        assert_eq!(event.trigger_towers, towers, "format {format}");
    }
}

#[test]
fn ppm_default_topology_matches_subsystem() {
    let session = session_with(json!({}));
    let topo = session.topology(SubsystemKind::Ppm);
    assert_eq!(topo.channels, 64);
    assert_eq!(topo.modules_per_slink(), 4);
}
