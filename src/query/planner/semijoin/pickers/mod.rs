// Strategy Picker Implementations
//
// One module per duplicate-elimination strategy. Pickers are evaluated in
// the order FirstMatch, LooseScan, SJ-Materialization, DuplicateWeedout.

pub mod first_match;
pub mod loose_scan;
pub mod sj_materialization;
pub mod dups_weedout;

pub use self::first_match::FirstMatchPicker;
pub use self::loose_scan::LooseScanPicker;
pub use self::sj_materialization::SjMaterializationPicker;
pub use self::dups_weedout::DuplicateWeedoutPicker;
