use std::fs;

use light_minded::region_table::{annotate_file, fill_table_file, Hemisphere, NetworkColumn, RegionTable};

const TABLE: &str = "\
| Lobe | Gyrus | Left and Right Hemisphere | Label ID.L | Label ID.R | Anatomical and modified Cyto-architectonic descriptions | MNI (X,Y,Z) L | MNI (X,Y,Z) R |
|------|-------|---------------------------|------------|------------|--------------------------------------------------------|---------------|---------------|
| Frontal Lobe | SFG, Superior Frontal Gyrus | SFG_L(R)_7_1 | 1 | 2 | A8m, medial area 8 | -5,15,54 | 7,16,54 |
|  |  | SFG_L(R)_7_2 | 3 | 4 | A8dl, dorsolateral area 8 | -18,24,53 | 22,26,51 |
|  | MFG, Middle Frontal Gyrus | MFG_L(R)_7_1 | 15 | 16 | A9/46d, dorsal area 9/46 | -27,43,31 | 30,37,36 |
";

const LOOKUP: &str = "\
ROI,Network_nina,Network_Yeo_7_nina
1,Default,7
2,Default,7
4,Dorsal Attention,3
15,Frontoparietal,6
";

#[test]
fn a_region_table_can_be_filled_annotated_and_parsed() {
    let dir = tempfile::tempdir().unwrap();
    let raw = dir.path().join("bn_246_table.md");
    let csv = dir.path().join("subregion_func_network_Yeo_updated.csv");
    fs::write(&raw, TABLE).unwrap();
    fs::write(&csv, LOOKUP).unwrap();

    let filled = dir.path().join("bn_246_table_filled.md");
    let with_name = dir.path().join("bn_246_table_with_network.md");
    let with_id = dir.path().join("bn_246_table_with_network_id.md");
    fill_table_file(&raw, &filled).unwrap();
    annotate_file(&filled, &csv, &with_name, NetworkColumn::NAME).unwrap();
    annotate_file(&with_name, &csv, &with_id, NetworkColumn::ID).unwrap();

    let joined = fs::read_to_string(&with_id).unwrap();
    let header = joined.lines().next().unwrap();
    assert!(header.ends_with("|Network Nina|Network Nina ID|"));

    // The network name lands at cell 8 and the id at cell 9 after the two inserts.
    let regions = RegionTable::from_file(&with_id).unwrap();
    assert_eq!(6, regions.len());

    let r3 = regions.get(3).unwrap();
    assert_eq!("Frontal Lobe", r3.lobe);
    assert_eq!("SFG, Superior Frontal Gyrus", r3.gyrus);
    assert_eq!(Hemisphere::Left, r3.hemisphere);
    // Region 3 is unknown, the right hemisphere partner 4 is used.
    assert_eq!("Dorsal Attention", r3.network);
    assert_eq!(Some(String::from("3")), r3.network_id);

    let r16 = regions.get(16).unwrap();
    assert_eq!("MFG, Middle Frontal Gyrus", r16.gyrus);
    assert_eq!(Hemisphere::Right, r16.hemisphere);
    assert_eq!("Frontoparietal", r16.network);
}

#[test]
fn a_missing_lookup_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let raw = dir.path().join("table.md");
    fs::write(&raw, TABLE).unwrap();
    let result = annotate_file(&raw, dir.path().join("missing.csv"), dir.path().join("out.md"), NetworkColumn::NAME);
    assert!(result.is_err());
    assert!(!dir.path().join("out.md").exists());
}
