use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::electrode::Contact;
use crate::math::MatrixHelper;
use crate::prelude::{from_point, to_point, CoreResult};
use crate::qc::{QcRecord, QC_CSV_COLUMNS};

pub const CONTACTS_SCHEMA_VERSION: &str = "1.0";

/// Contacts in the ROSA/LPS frame, as written by `contacts-generate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactsDocument {
    pub schema_version: String,
    pub coordinate_system: String,
    pub contacts: Vec<Contact>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl ContactsDocument {
    pub fn new(contacts: Vec<Contact>, metadata: BTreeMap<String, String>) -> Self {
        Self {
            schema_version: CONTACTS_SCHEMA_VERSION.to_string(),
            coordinate_system: "ROSA_LPS".to_string(),
            contacts,
            metadata,
        }
    }
}

pub fn save_contacts_json<P: AsRef<Path>>(path: P, doc: &ContactsDocument) -> CoreResult<()> {
    fs::write(path.as_ref(), serde_json::to_string_pretty(doc)?)?;
    Ok(())
}

pub fn write_qc_csv<W: Write>(mut out: W, records: &[QcRecord]) -> CoreResult<()> {
    writeln!(out, "{}", QC_CSV_COLUMNS.join(","))?;
    for r in records {
        writeln!(
            out,
            "{},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{}",
            r.trajectory,
            r.entry_radial_mm,
            r.target_radial_mm,
            r.mean_contact_radial_mm,
            r.max_contact_radial_mm,
            r.rms_contact_radial_mm,
            r.angle_deg,
            r.matched_contacts
        )?;
    }
    out.flush()?;
    Ok(())
}

/// Contact coordinates in RAS and LPS side by side, ordered by trajectory then index.
pub fn write_aligned_txt<W: Write>(mut out: W, contacts: &[Contact]) -> CoreResult<()> {
    writeln!(out, "# ROSA aligned contact export")?;
    writeln!(out, "# coordinate_system: WORLD_RAS (x_ras,y_ras,z_ras)")?;
    writeln!(out, "# alternate_columns: LPS (x_lps,y_lps,z_lps)")?;
    writeln!(
        out,
        "# columns: trajectory,label,index,x_ras,y_ras,z_ras,x_lps,y_lps,z_lps,model_id"
    )?;

    let mut ordered: Vec<&Contact> = contacts.iter().collect();
    ordered.sort_by(|a, b| a.trajectory.cmp(&b.trajectory).then(a.index.cmp(&b.index)));
    for c in ordered {
        let lps = c.position_lps;
        let ras = from_point(&MatrixHelper::lps_to_ras_point(&to_point(&lps)));
        writeln!(
            out,
            "{},{},{},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{}",
            c.trajectory, c.label, c.index, ras[0], ras[1], ras[2], lps[0], lps[1], lps[2], c.model_id
        )?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::electrode::TipAnchor;
    use tempfile::tempdir;

    fn contact(traj: &str, index: usize, p: [f64; 3]) -> Contact {
        Contact {
            trajectory: traj.into(),
            model_id: "DIXI-5AM".into(),
            index,
            label: format!("{traj}{index}"),
            position_lps: p,
            tip_at: TipAnchor::Target,
        }
    }

    #[test]
    fn aligned_rows_are_sorted_and_carry_both_frames() {
        let contacts = vec![
            contact("RHH", 2, [1.0, 2.0, 3.0]),
            contact("LAM", 1, [0.0, 0.0, 0.0]),
            contact("RHH", 1, [-4.0, 5.5, 6.0]),
        ];
        let mut buf = Vec::new();
        write_aligned_txt(&mut buf, &contacts).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let rows: Vec<&str> = text.lines().filter(|l| !l.starts_with('#')).collect();
        assert_eq!(rows.len(), 3);
        assert!(rows[0].starts_with("LAM,LAM1,1,"));
        assert_eq!(
            rows[1],
            "RHH,RHH1,1,4.000000,-5.500000,6.000000,-4.000000,5.500000,6.000000,DIXI-5AM"
        );
        assert!(rows[2].starts_with("RHH,RHH2,2,"));
    }

    #[test]
    fn qc_csv_has_header_and_fixed_precision() {
        let record = QcRecord {
            trajectory: "RHH".into(),
            entry_radial_mm: 1.0,
            target_radial_mm: 0.5,
            mean_contact_radial_mm: 0.75,
            max_contact_radial_mm: 1.0,
            rms_contact_radial_mm: 0.8,
            angle_deg: 2.0,
            matched_contacts: 10,
        };
        let mut buf = Vec::new();
        write_qc_csv(&mut buf, &[record]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], QC_CSV_COLUMNS.join(","));
        assert_eq!(
            lines[1],
            "RHH,1.000000,0.500000,0.750000,1.000000,0.800000,2.000000,10"
        );
    }

    #[test]
    fn contacts_json_declares_rosa_frame() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("contacts.json");
        let mut metadata = BTreeMap::new();
        metadata.insert("ros_path".to_string(), "case.ros".to_string());
        let doc = ContactsDocument::new(vec![contact("RHH", 1, [1.0, 2.0, 3.0])], metadata);
        save_contacts_json(&path, &doc).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["coordinate_system"], "ROSA_LPS");
        assert_eq!(value["contacts"][0]["tip_at"], "target");
        assert_eq!(value["metadata"]["ros_path"], "case.ros");
    }
}
