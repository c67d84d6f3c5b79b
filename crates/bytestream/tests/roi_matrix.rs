//! RoI fragment matrix: CP RoI, JEP RoI and destination routing.

use l1calo_bytestream::{locations, CmmRoi, CodecConfig, CodecSession, CpmRoi, JemRoi};

fn session() -> CodecSession {
    CodecSession::new(CodecConfig::default())
}

#[test]
fn cp_roi_single_word_roundtrip() {
    // Spec scenario: one nonzero RoI word comes back as exactly one
    // primitive with matching key and hit fields.
    let session = session();
    let roi = CpmRoi::new(1, 5, 3, 1, false, 0x2);

    let fragment = session.encode_cp_roi(&[roi], 1, false).expect("encode");
    let event = session.decode_fragment(&fragment).expect("decode");

    assert_eq!(event.cpm_rois, vec![roi]);
    assert!(event.cpm_rois_roib.is_empty());
    let decoded = event.cpm_rois[0];
    assert_eq!(decoded.crate_no(), 1);
    assert_eq!(decoded.module(), 5);
    assert_eq!(decoded.chip(), 3);
    assert_eq!(decoded.location(), 1);
    assert_eq!(decoded.hits(), 0x2);
}

#[test]
fn cp_roi_zero_rois_are_suppressed() {
    let session = session();
    let quiet = CpmRoi::new(0, 1, 0, 0, false, 0);
    let loud = CpmRoi::new(0, 2, 1, 0, false, 0x10);

    let fragment = session.encode_cp_roi(&[quiet, loud], 0, false).expect("encode");
    let event = session.decode_fragment(&fragment).expect("decode");
    assert_eq!(event.cpm_rois, vec![loud]);
}

#[test]
fn cp_roi_roib_destination_routes_to_roib_location() {
    let session = session();
    let roi = CpmRoi::new(2, 7, 0, 1, true, 0x8000);

    let fragment = session.encode_cp_roi(&[roi], 2, true).expect("encode");
    let event = session.decode_fragment(&fragment).expect("decode");

    assert!(event.cpm_rois.is_empty());
    assert_eq!(event.cpm_rois_roib, vec![roi]);
    assert_eq!(
        event.by_location(locations::CPM_ROIS_ROIB).unwrap().len(),
        1
    );
}

#[test]
fn jep_roi_words_and_cmm_roundtrip() {
    let session = session();
    let rois = vec![
        JemRoi::new(0, 3, 2, 1, false, 0x21, false),
        JemRoi::new(0, 9, 7, 0, true, 0x05, true),
    ];
    let mut cmm = CmmRoi::new(0);
    cmm.jet_et_hits = 0xd;
    cmm.sum_et_hits = 0x3;
    cmm.missing_et_hits = 0x81;
    cmm.ex = -20000;
    cmm.ey = 12345;
    cmm.ex_error = true;

    let fragment = session.encode_jep_roi(&rois, &[cmm], 0, false).expect("encode");
    let event = session.decode_fragment(&fragment).expect("decode");

    // RoI words are written in packed-word order.
    let mut expected = rois.clone();
    expected.sort();
    assert_eq!(event.jem_rois, expected);
    assert_eq!(event.cmm_rois, vec![cmm]);
    assert!(event.jem_rois_roib.is_empty());
}

#[test]
fn jep_roi_zero_cmm_is_suppressed() {
    let session = session();
    let roi = JemRoi::new(1, 0, 0, 0, false, 1, false);

    let fragment = session
        .encode_jep_roi(&[roi], &[CmmRoi::new(1)], 1, false)
        .expect("encode");
    let event = session.decode_fragment(&fragment).expect("decode");
    assert_eq!(event.jem_rois, vec![roi]);
    assert!(event.cmm_rois.is_empty());
}

#[test]
fn roi_encode_is_deterministic() {
    let session = session();
    let rois = vec![
        CpmRoi::new(0, 3, 1, 0, false, 5),
        CpmRoi::new(0, 1, 0, 1, false, 9),
    ];
    let first = session.encode_cp_roi(&rois, 0, false).expect("encode");
    let second = session.encode_cp_roi(&rois, 0, false).expect("encode");
    assert_eq!(first, second);
}
