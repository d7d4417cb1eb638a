//! Per-region biophysical parameters, laid out like the Allen Cell Types
//! `fit_parameters.json` files.

use itertools::Itertools;
use log::{debug, info};
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::Path;

use crate::cell::{Cell, Target};
use crate::error::{CellError, Result};
use crate::sections::Region;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionCm {
    pub section: Region,
    pub cm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passive {
    pub ra: f64,
    #[serde(default)]
    pub cm: Vec<RegionCm>,
    pub e_pas: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReversalPotentials {
    pub section: Region,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ena: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ek: Option<f64>,
}

/// Recording conditions the fit was made under
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conditions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub celsius: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub v_init: Option<f64>,
    #[serde(default)]
    pub erev: Vec<ReversalPotentials>,
}

/// One fitted value. An empty `mechanism` marks a passive parameter such as
/// `g_pas`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenomeEntry {
    pub section: Region,
    pub name: String,
    #[serde(deserialize_with = "number_or_string")]
    pub value: f64,
    #[serde(default)]
    pub mechanism: String,
}

impl GenomeEntry {
    pub fn new(section: Region, name: &str, value: f64, mechanism: &str) -> Self {
        GenomeEntry {
            section,
            name: name.to_owned(),
            value,
            mechanism: mechanism.to_owned(),
        }
    }
}

// Fit files written by older tooling quote their genome values
fn number_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(value) => Ok(value),
        Raw::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiophysicalModel {
    pub passive: Vec<Passive>,
    #[serde(default)]
    pub conditions: Vec<Conditions>,
    pub genome: Vec<GenomeEntry>,
}

impl BiophysicalModel {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let model: BiophysicalModel = serde_json::from_str(text)?;
        if model.passive.is_empty() {
            return Err(CellError::MissingBlock("passive".to_owned()));
        }
        Ok(model)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| CellError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parameters of Allen Cell Types model 329321704
    pub fn neuron_329321704() -> Self {
        use Region::*;

        let genome = vec![
            GenomeEntry::new(Apic, "g_pas", 0.000470085432332, ""),
            GenomeEntry::new(Axon, "g_pas", 0.000697267815518, ""),
            GenomeEntry::new(Dend, "g_pas", 0.000170092914249, ""),
            GenomeEntry::new(Soma, "gbar_Im", 0.00117797, "Im"),
            GenomeEntry::new(Soma, "gbar_Ih", 0.000558439, "Ih"),
            GenomeEntry::new(Soma, "gbar_NaTs", 0.482482, "NaTs"),
            GenomeEntry::new(Soma, "gbar_Nap", 0.000433224, "Nap"),
            GenomeEntry::new(Soma, "gbar_K_P", 0.007372, "K_P"),
            GenomeEntry::new(Soma, "gbar_K_T", 0.000187833, "K_T"),
            GenomeEntry::new(Soma, "gbar_SK", 0.00025635, "SK"),
            GenomeEntry::new(Soma, "gbar_Kv3_1", 0.138371, "Kv3_1"),
            GenomeEntry::new(Soma, "gbar_Ca_HVA", 0.00046307, "Ca_HVA"),
            GenomeEntry::new(Soma, "gbar_Ca_LVA", 0.00897297, "Ca_LVA"),
            GenomeEntry::new(Soma, "gamma_CaDynamics", 0.000884733, "CaDynamics"),
            GenomeEntry::new(Soma, "decay_CaDynamics", 764.194, "CaDynamics"),
            GenomeEntry::new(Soma, "g_pas", 0.000125114, ""),
        ];

        BiophysicalModel {
            passive: vec![Passive {
                ra: 58.48,
                cm: vec![
                    RegionCm { section: Apic, cm: 1.91 },
                    RegionCm { section: Axon, cm: 1.0 },
                    RegionCm { section: Dend, cm: 1.91 },
                    RegionCm { section: Soma, cm: 1.0 },
                ],
                e_pas: -81.3347930908,
            }],
            conditions: vec![Conditions {
                erev: vec![ReversalPotentials {
                    section: Soma,
                    ena: Some(53.0),
                    ek: Some(-107.0),
                }],
                ..Conditions::default()
            }],
            genome,
        }
    }

    fn passive(&self) -> Result<&Passive> {
        self.passive
            .first()
            .ok_or_else(|| CellError::MissingBlock("passive".to_owned()))
    }

    /// Active mechanisms per region, in the order they first appear in the
    /// genome. `pas` goes into every section and is not listed.
    pub fn mechanisms(&self) -> Vec<(Region, &str)> {
        self.genome
            .iter()
            .filter(|entry| !entry.mechanism.is_empty())
            .map(|entry| (entry.section, entry.mechanism.as_str()))
            .unique()
            .collect()
    }

    pub fn apply_mechanisms(&self, cell: &mut Cell) -> Result<()> {
        cell.insert(Target::All, "pas")?;
        for (region, mechanism) in self.mechanisms() {
            let inserted = cell.insert(region.into(), mechanism)?;
            debug!("{} inserted into {} {} sections", mechanism, inserted, region);
        }
        Ok(())
    }

    /// Assigns `Ra` and `e_pas` everywhere, then per region `cm`, the
    /// reversal potentials and the fitted genome values
    pub fn apply_parameters(&self, cell: &mut Cell) -> Result<()> {
        let passive = self.passive()?;
        cell.set(Target::All, "Ra", passive.ra)?;
        cell.set(Target::All, "e_pas", passive.e_pas)?;
        for entry in &passive.cm {
            cell.set(entry.section.into(), "cm", entry.cm)?;
        }

        for erev in self.conditions.iter().flat_map(|c| &c.erev) {
            if let Some(ena) = erev.ena {
                cell.set(erev.section.into(), "ena", ena)?;
            }
            if let Some(ek) = erev.ek {
                cell.set(erev.section.into(), "ek", ek)?;
            }
        }

        for entry in &self.genome {
            cell.set(entry.section.into(), &entry.name, entry.value)?;
        }
        info!(
            "Assigned {} genome values across {} sections",
            self.genome.len(),
            cell.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sections::Section;

    fn cell_with_every_region() -> Cell {
        let mut cell = Cell::new("regions");
        let soma = cell.new_section(Region::Soma);
        for region in [Region::Axon, Region::Dend, Region::Apic] {
            let id = cell.new_section(region);
            cell.connect(id, soma, 0.5).unwrap();
        }
        cell
    }

    #[test]
    fn test_fit_file_matches_builtin_table() {
        let from_file = BiophysicalModel::from_path("data/fit_parameters_329321704.json").unwrap();
        let builtin = BiophysicalModel::neuron_329321704();
        assert_eq!(from_file.passive, builtin.passive);
        assert_eq!(from_file.genome, builtin.genome);
        assert_eq!(from_file.conditions[0].erev, builtin.conditions[0].erev);
        assert_eq!(from_file.conditions[0].celsius, Some(34.0));
    }

    #[test]
    fn test_mechanisms_are_unique_per_region() {
        let model = BiophysicalModel::neuron_329321704();
        let mechanisms = model.mechanisms();
        assert_eq!(mechanisms.len(), 11);
        assert!(mechanisms.iter().all(|(region, _)| *region == Region::Soma));
        assert_eq!(
            mechanisms.iter().filter(|(_, m)| *m == "CaDynamics").count(),
            1
        );
    }

    #[test]
    fn test_apply_to_cell() {
        let model = BiophysicalModel::neuron_329321704();
        let mut cell = cell_with_every_region();
        model.apply_mechanisms(&mut cell).unwrap();
        model.apply_parameters(&mut cell).unwrap();

        for section in cell.sections() {
            assert_eq!(section.ra(), 58.48);
            assert_eq!(section.get("e_pas").unwrap(), -81.3347930908);
        }

        let soma = cell.section("soma[0]").unwrap();
        assert_eq!(soma.mechanisms().count(), 12);
        assert_eq!(soma.get("gbar_NaTs").unwrap(), 0.482482);
        assert_eq!(soma.get("decay_CaDynamics").unwrap(), 764.194);
        assert_eq!(soma.get("ena").unwrap(), 53.0);
        assert_eq!(soma.get("ek").unwrap(), -107.0);
        // calcium keeps its default reversal
        assert_eq!(soma.get("eca").unwrap(), 132.458);

        let apic = cell.section("apic[0]").unwrap();
        assert_eq!(apic.cm(), 1.91);
        assert_eq!(apic.get("g_pas").unwrap(), 0.000470085432332);
        assert_eq!(apic.mechanisms().map(|m| m.name()).collect::<Vec<_>>(), vec!["pas"]);

        let dend = cell.section("dend[0]").unwrap();
        assert!(dend.get("gbar_NaTs").is_err());
        assert!(dend.get("ena").is_err());
    }

    #[test]
    fn test_missing_region_is_skipped() {
        let model = BiophysicalModel::neuron_329321704();
        let mut cell = Cell::new("no apic");
        cell.push_section(Section::new(Region::Soma, 0));
        model.apply_mechanisms(&mut cell).unwrap();
        model.apply_parameters(&mut cell).unwrap();
        assert_eq!(cell.section("soma[0]").unwrap().cm(), 1.0);
    }

    #[test]
    fn test_parameter_errors() {
        assert!(matches!(
            BiophysicalModel::from_json_str(r#"{"passive": [], "genome": []}"#),
            Err(CellError::MissingBlock(_))
        ));
        assert!(matches!(
            BiophysicalModel::from_json_str("{"),
            Err(CellError::Parameters(_))
        ));

        // a genome value for a mechanism that was never inserted
        let mut model = BiophysicalModel::neuron_329321704();
        model.genome.push(GenomeEntry::new(Region::Dend, "gbar_NaTs", 0.1, ""));
        let mut cell = cell_with_every_region();
        model.apply_mechanisms(&mut cell).unwrap();
        assert!(matches!(
            model.apply_parameters(&mut cell),
            Err(CellError::MechanismNotInserted { .. })
        ));
    }

    #[test]
    fn test_json_round_trip_keeps_quoted_values_numeric() {
        let text = r#"{
            "passive": [{"ra": 100.0, "e_pas": -70.0}],
            "genome": [{"section": "soma", "name": "gbar_NaTs", "value": "0.25", "mechanism": "NaTs"}]
        }"#;
        let model = BiophysicalModel::from_json_str(text).unwrap();
        assert_eq!(model.genome[0].value, 0.25);
        assert!(model.conditions.is_empty());
        assert!(model.passive[0].cm.is_empty());

        let written = model.to_json_string().unwrap();
        assert_eq!(BiophysicalModel::from_json_str(&written).unwrap(), model);
    }
}
