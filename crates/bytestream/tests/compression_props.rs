//! Property tests: compression losslessness and fragment round-trips.

use proptest::collection::vec;
use proptest::prelude::*;

use l1calo_bytestream::ppm::compression::{
    compress_channel, decompress_channel, ChannelOutcome, ChannelSamples,
};
use l1calo_bytestream::{ChannelId, CodecConfig, CodecSession, Topology, TriggerTower};
use l1calo_words::{BitReader, BitWriter};

fn samples_strategy() -> impl Strategy<Value = ChannelSamples> {
    (
        vec(0u16..=0xff, 1),
        vec(0u16..=0x3ff, 1..=7),
        vec(0u8..=0x7, 1),
        vec(0u8..=0x1, 1..=7),
    )
        .prop_map(|(lut, fadc, bcid_lut, mut bcid_fadc)| {
            let slices = fadc.len();
            bcid_fadc.resize(slices, 0);
            ChannelSamples {
                lut,
                fadc,
                bcid_lut,
                bcid_fadc,
            }
        })
}

proptest! {
    /// decompress(compress(x)) == x under every supported version, as long
    /// as zero-suppression does not drop the channel.
    #[test]
    fn compression_is_lossless(samples in samples_strategy(), version in 0u8..=1) {
        let mut writer = BitWriter::streamed();
        let scheme =
            compress_channel(&mut writer, &samples, version, 10, false).expect("compress");
        let words = writer.into_words();

        let mut reader = BitReader::streamed(&words);
        let (seen, outcome) =
            decompress_channel(&mut reader, samples.lut.len(), samples.fadc.len())
                .expect("decompress");
        prop_assert_eq!(seen, scheme);
        prop_assert_eq!(outcome, ChannelOutcome::Decoded(samples));
    }

    /// Zero-suppressed quiet channels come back as all-zero samples.
    #[test]
    fn zero_suppression_drops_quiet_channels(
        fadc in vec(0u16..=10, 1..=7),
        pedestal in 10u16..=20,
    ) {
        let slices = fadc.len();
        let samples = ChannelSamples {
            lut: vec![0],
            fadc,
            bcid_lut: vec![0],
            bcid_fadc: vec![0; slices],
        };
        let mut writer = BitWriter::streamed();
        let scheme =
            compress_channel(&mut writer, &samples, 1, pedestal, true).expect("compress");
        prop_assert_eq!(scheme, 0);

        let words = writer.into_words();
        let mut reader = BitReader::streamed(&words);
        let (_, outcome) =
            decompress_channel(&mut reader, 1, slices).expect("decompress");
        match outcome {
            ChannelOutcome::Decoded(out) => prop_assert!(out.is_zero()),
            ChannelOutcome::Anomaly(reason) => prop_assert!(false, "anomaly: {}", reason),
        }
    }

    /// Full-fragment round-trip over both data formats with random
    /// module content.
    #[test]
    fn ppm_fragment_roundtrip(
        format in 1u8..=2,
        samples in vec((0u16..=0xff, vec(0u16..=0x3ff, 5)), 8),
    ) {
        let topo = Topology { crates: 1, modules: 1, channels: 8, slinks: 1 };
        let mut cfg = CodecConfig {
            data_format: format,
            default_slices_fadc: 5,
            ..CodecConfig::default()
        };
        cfg.compression_version = 1;
        let session = CodecSession::new(cfg);

        let towers: Vec<TriggerTower> = samples
            .into_iter()
            .enumerate()
            .map(|(chan, (lut, fadc))| {
                let mut tower =
                    TriggerTower::empty(ChannelId::new(0, 0, chan as u16), 1, 5, 0, 2);
                tower.lut[0] = lut;
                tower.fadc = fadc;
                tower
            })
            .collect();

        let fragment = session
            .encode_trigger_towers_with(&towers, 0, 0, &topo)
            .expect("encode");
        let event = session
            .decode_fragment_with(&fragment, &topo)
            .expect("decode");
        prop_assert_eq!(event.trigger_towers, towers);
    }
}
