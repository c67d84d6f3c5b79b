//! Per-event output container.
//!
//! The host storage registry looks collections up by logical location
//! name; [`locations`] lists the contract surface and
//! [`DecodedEvent::by_location`] resolves a name to its typed collection.

use super::{
    CmmCpHits, CmmEtSums, CmmJetHits, CmmRoi, CpmHits, CpmRoi, CpmTower, JemEtSums, JemHits,
    JemRoi, JetElement, RodHeader, TriggerTower,
};

/// Logical location names, the lookup keys used by the host framework.
/// The `RoIB` variants designate content routed to the RoI builder rather
/// than normal readout; the wire encoding is identical.
pub mod locations {
    pub const TRIGGER_TOWERS: &str = "TriggerTowers";
    pub const CPM_TOWERS: &str = "CPMTowers";
    pub const CPM_HITS: &str = "CPMHits";
    pub const CMM_CP_HITS: &str = "CMMCPHits";
    pub const CPM_ROIS: &str = "CPMRoIs";
    pub const CPM_ROIS_ROIB: &str = "CPMRoIsRoIB";
    pub const JET_ELEMENTS: &str = "JetElements";
    pub const JEM_HITS: &str = "JEMHits";
    pub const JEM_ET_SUMS: &str = "JEMEtSums";
    pub const CMM_JET_HITS: &str = "CMMJetHits";
    pub const CMM_ET_SUMS: &str = "CMMEtSums";
    pub const JEM_ROIS: &str = "JEMRoIs";
    pub const JEM_ROIS_ROIB: &str = "JEMRoIsRoIB";
    pub const CMM_ROIS: &str = "CMMRoIs";
    pub const CMM_ROIS_ROIB: &str = "CMMRoIsRoIB";
    pub const ROD_HEADERS: &str = "RODHeaders";
}

/// A borrowed view of one typed collection.
#[derive(Debug, Clone, Copy)]
pub enum Collection<'a> {
    TriggerTowers(&'a [TriggerTower]),
    CpmTowers(&'a [CpmTower]),
    CpmHits(&'a [CpmHits]),
    CmmCpHits(&'a [CmmCpHits]),
    CpmRois(&'a [CpmRoi]),
    JetElements(&'a [JetElement]),
    JemHits(&'a [JemHits]),
    JemEtSums(&'a [JemEtSums]),
    CmmJetHits(&'a [CmmJetHits]),
    CmmEtSums(&'a [CmmEtSums]),
    JemRois(&'a [JemRoi]),
    CmmRois(&'a [CmmRoi]),
    RodHeaders(&'a [RodHeader]),
}

impl Collection<'_> {
    pub fn len(&self) -> usize {
        match self {
            Collection::TriggerTowers(v) => v.len(),
            Collection::CpmTowers(v) => v.len(),
            Collection::CpmHits(v) => v.len(),
            Collection::CmmCpHits(v) => v.len(),
            Collection::CpmRois(v) => v.len(),
            Collection::JetElements(v) => v.len(),
            Collection::JemHits(v) => v.len(),
            Collection::JemEtSums(v) => v.len(),
            Collection::CmmJetHits(v) => v.len(),
            Collection::CmmEtSums(v) => v.len(),
            Collection::JemRois(v) => v.len(),
            Collection::CmmRois(v) => v.len(),
            Collection::RodHeaders(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Typed primitive collections produced by one conversion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedEvent {
    pub trigger_towers: Vec<TriggerTower>,
    pub cpm_towers: Vec<CpmTower>,
    pub cpm_hits: Vec<CpmHits>,
    pub cmm_cp_hits: Vec<CmmCpHits>,
    pub cpm_rois: Vec<CpmRoi>,
    pub cpm_rois_roib: Vec<CpmRoi>,
    pub jet_elements: Vec<JetElement>,
    pub jem_hits: Vec<JemHits>,
    pub jem_et_sums: Vec<JemEtSums>,
    pub cmm_jet_hits: Vec<CmmJetHits>,
    pub cmm_et_sums: Vec<CmmEtSums>,
    pub jem_rois: Vec<JemRoi>,
    pub jem_rois_roib: Vec<JemRoi>,
    pub cmm_rois: Vec<CmmRoi>,
    pub cmm_rois_roib: Vec<CmmRoi>,
    pub rod_headers: Vec<RodHeader>,
}

impl DecodedEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks a collection up by its logical location name.
    pub fn by_location(&self, name: &str) -> Option<Collection<'_>> {
        use locations as loc;
        let collection = match name {
            loc::TRIGGER_TOWERS => Collection::TriggerTowers(&self.trigger_towers),
            loc::CPM_TOWERS => Collection::CpmTowers(&self.cpm_towers),
            loc::CPM_HITS => Collection::CpmHits(&self.cpm_hits),
            loc::CMM_CP_HITS => Collection::CmmCpHits(&self.cmm_cp_hits),
            loc::CPM_ROIS => Collection::CpmRois(&self.cpm_rois),
            loc::CPM_ROIS_ROIB => Collection::CpmRois(&self.cpm_rois_roib),
            loc::JET_ELEMENTS => Collection::JetElements(&self.jet_elements),
            loc::JEM_HITS => Collection::JemHits(&self.jem_hits),
            loc::JEM_ET_SUMS => Collection::JemEtSums(&self.jem_et_sums),
            loc::CMM_JET_HITS => Collection::CmmJetHits(&self.cmm_jet_hits),
            loc::CMM_ET_SUMS => Collection::CmmEtSums(&self.cmm_et_sums),
            loc::JEM_ROIS => Collection::JemRois(&self.jem_rois),
            loc::JEM_ROIS_ROIB => Collection::JemRois(&self.jem_rois_roib),
            loc::CMM_ROIS => Collection::CmmRois(&self.cmm_rois),
            loc::CMM_ROIS_ROIB => Collection::CmmRois(&self.cmm_rois_roib),
            loc::ROD_HEADERS => Collection::RodHeaders(&self.rod_headers),
            _ => return None,
        };
        Some(collection)
    }

    /// Merges the collections of another event (e.g. per-fragment results
    /// gathered from a worker pool).
    pub fn merge(&mut self, other: DecodedEvent) {
        self.trigger_towers.extend(other.trigger_towers);
        self.cpm_towers.extend(other.cpm_towers);
        self.cpm_hits.extend(other.cpm_hits);
        self.cmm_cp_hits.extend(other.cmm_cp_hits);
        self.cpm_rois.extend(other.cpm_rois);
        self.cpm_rois_roib.extend(other.cpm_rois_roib);
        self.jet_elements.extend(other.jet_elements);
        self.jem_hits.extend(other.jem_hits);
        self.jem_et_sums.extend(other.jem_et_sums);
        self.cmm_jet_hits.extend(other.cmm_jet_hits);
        self.cmm_et_sums.extend(other.cmm_et_sums);
        self.jem_rois.extend(other.jem_rois);
        self.jem_rois_roib.extend(other.jem_rois_roib);
        self.cmm_rois.extend(other.cmm_rois);
        self.cmm_rois_roib.extend(other.cmm_rois_roib);
        self.rod_headers.extend(other.rod_headers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_lookup() {
        let mut event = DecodedEvent::new();
        event.cpm_rois.push(CpmRoi::new(0, 1, 0, 0, false, 7));
        let col = event.by_location(locations::CPM_ROIS).unwrap();
        assert_eq!(col.len(), 1);
        assert!(event.by_location("NoSuchLocation").is_none());
        assert!(event.by_location(locations::CPM_ROIS_ROIB).unwrap().is_empty());
    }
}
