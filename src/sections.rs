use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use crate::error::{CellError, Result};
use crate::mechanisms::{self, Ion, Mechanism};
use crate::swc_reader::StructureIdentifier;

/// Index of a section inside its owning cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SectionId(pub(crate) usize);

impl SectionId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Soma,
    Axon,
    Dend,
    Apic,
}

impl Region {
    pub const ALL: [Region; 4] = [Region::Soma, Region::Axon, Region::Dend, Region::Apic];

    pub fn name(self) -> &'static str {
        match self {
            Region::Soma => "soma",
            Region::Axon => "axon",
            Region::Dend => "dend",
            Region::Apic => "apic",
        }
    }
}

impl From<StructureIdentifier> for Region {
    fn from(v: StructureIdentifier) -> Self {
        match v {
            StructureIdentifier::Soma => Region::Soma,
            StructureIdentifier::Axon => Region::Axon,
            StructureIdentifier::ApicalDendrite => Region::Apic,
            _ => Region::Dend,
        }
    }
}

impl FromStr for Region {
    type Err = CellError;

    fn from_str(s: &str) -> Result<Self> {
        Region::ALL
            .into_iter()
            .find(|region| region.name() == s)
            .ok_or_else(|| CellError::UnknownRegion(s.to_owned()))
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A 3-D sample point with its diameter, all in µm
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pt3d {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub diam: f64,
}

impl Pt3d {
    pub fn distance_to(&self, other: &Pt3d) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Where a section's 0 end attaches on its parent
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Connection {
    pub parent: SectionId,
    pub parent_x: f64,
}

/// A cable section with its geometry, inserted mechanisms and ion reversal
/// potentials. Defaults follow a freshly created NEURON section.
#[derive(Debug, Clone, Serialize)]
pub struct Section {
    name: String,
    region: Region,
    index: usize,
    pt3d: Vec<Pt3d>,
    length: f64,
    diam: f64,
    nseg: usize,
    ra: f64,
    cm: f64,
    parent: Option<Connection>,
    mechanisms: BTreeMap<&'static str, Mechanism>,
    ions: BTreeMap<Ion, f64>,
}

impl Section {
    pub const DEFAULT_LENGTH: f64 = 100.0;
    pub const DEFAULT_DIAM: f64 = 500.0;
    pub const DEFAULT_RA: f64 = 35.4;
    pub const DEFAULT_CM: f64 = 1.0;

    pub fn new(region: Region, index: usize) -> Self {
        Section {
            name: format!("{}[{}]", region.name(), index),
            region,
            index,
            pt3d: Vec::new(),
            length: Self::DEFAULT_LENGTH,
            diam: Self::DEFAULT_DIAM,
            nseg: 1,
            ra: Self::DEFAULT_RA,
            cm: Self::DEFAULT_CM,
            parent: None,
            mechanisms: BTreeMap::new(),
            ions: BTreeMap::new(),
        }
    }

    /// Builds a section whose length and diameter follow its 3-D points
    pub fn from_points(region: Region, index: usize, pt3d: Vec<Pt3d>) -> Self {
        let mut section = Section::new(region, index);
        section.pt3d = pt3d;
        section.update_geometry();
        section
    }

    fn update_geometry(&mut self) {
        match self.pt3d.as_slice() {
            [] => {}
            [only] => {
                self.length = 0.0;
                self.diam = only.diam;
            }
            points => {
                let mut length = 0.0;
                let mut weighted = 0.0;
                for pair in points.windows(2) {
                    let h = pair[0].distance_to(&pair[1]);
                    length += h;
                    weighted += h * 0.5 * (pair[0].diam + pair[1].diam);
                }
                self.length = length;
                self.diam = if length > 0.0 {
                    weighted / length
                } else {
                    points.iter().map(|p| p.diam).sum::<f64>() / points.len() as f64
                };
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn renumber(&mut self, index: usize) {
        self.index = index;
        self.name = format!("{}[{}]", self.region.name(), index);
    }

    pub fn pt3d(&self) -> &[Pt3d] {
        &self.pt3d
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    /// Sets `L` explicitly, discarding any 3-D points
    pub fn set_length(&mut self, length: f64) -> Result<()> {
        positive("L", length)?;
        self.pt3d.clear();
        self.length = length;
        Ok(())
    }

    pub fn diam(&self) -> f64 {
        self.diam
    }

    /// Sets `diam` explicitly, discarding any 3-D points
    pub fn set_diam(&mut self, diam: f64) -> Result<()> {
        positive("diam", diam)?;
        self.pt3d.clear();
        self.diam = diam;
        Ok(())
    }

    pub fn nseg(&self) -> usize {
        self.nseg
    }

    pub fn set_nseg(&mut self, nseg: usize) -> Result<()> {
        if nseg == 0 {
            return Err(CellError::InvalidValue {
                name: "nseg".to_owned(),
                value: 0.0,
            });
        }
        self.nseg = nseg;
        Ok(())
    }

    pub fn ra(&self) -> f64 {
        self.ra
    }

    pub fn set_ra(&mut self, ra: f64) -> Result<()> {
        positive("Ra", ra)?;
        self.ra = ra;
        Ok(())
    }

    pub fn cm(&self) -> f64 {
        self.cm
    }

    pub fn set_cm(&mut self, cm: f64) -> Result<()> {
        positive("cm", cm)?;
        self.cm = cm;
        Ok(())
    }

    pub fn parent(&self) -> Option<Connection> {
        self.parent
    }

    pub(crate) fn set_parent(&mut self, parent: Option<Connection>) {
        self.parent = parent;
    }

    /// Lateral membrane area in µm²
    pub fn area(&self) -> f64 {
        if self.pt3d.len() < 2 {
            return PI * self.diam * self.length;
        }
        self.pt3d
            .windows(2)
            .map(|pair| {
                let r1 = pair[0].diam / 2.0;
                let r2 = pair[1].diam / 2.0;
                let h = pair[0].distance_to(&pair[1]);
                PI * (r1 + r2) * ((r1 - r2).powi(2) + h * h).sqrt()
            })
            .sum()
    }

    /// Normalized positions of the segment centers along the section
    pub fn segment_centers(&self) -> Vec<f64> {
        let n = self.nseg as f64;
        (0..self.nseg).map(|i| (i as f64 + 0.5) / n).collect()
    }

    pub fn mechanisms(&self) -> impl Iterator<Item = &Mechanism> {
        self.mechanisms.values()
    }

    pub fn mechanism(&self, name: &str) -> Option<&Mechanism> {
        self.mechanisms.get(name)
    }

    pub fn has_mechanism(&self, name: &str) -> bool {
        self.mechanisms.contains_key(name)
    }

    /// Inserts a mechanism by name, bringing in the ions it uses. Returns
    /// `false` when it was already present.
    pub fn insert(&mut self, name: &str) -> Result<bool> {
        let spec = mechanisms::lookup(name)?;
        if self.mechanisms.contains_key(spec.name) {
            return Ok(false);
        }
        for &ion in spec.ions {
            self.ions.entry(ion).or_insert_with(|| ion.default_reversal());
        }
        self.mechanisms.insert(spec.name, Mechanism::new(spec));
        debug!("Inserted {} into {}", spec.name, self.name);
        Ok(true)
    }

    pub fn ions(&self) -> impl Iterator<Item = (Ion, f64)> + '_ {
        self.ions.iter().map(|(&ion, &e)| (ion, e))
    }

    pub fn reversal(&self, ion: Ion) -> Result<f64> {
        self.ions
            .get(&ion)
            .copied()
            .ok_or_else(|| self.ion_missing(ion))
    }

    pub fn set_reversal(&mut self, ion: Ion, value: f64) -> Result<()> {
        finite(ion.reversal_name(), value)?;
        if !self.ions.contains_key(&ion) {
            return Err(self.ion_missing(ion));
        }
        self.ions.insert(ion, value);
        Ok(())
    }

    fn ion_missing(&self, ion: Ion) -> CellError {
        CellError::IonNotPresent {
            section: self.name.clone(),
            ion: ion.name().to_owned(),
        }
    }

    fn resolve<'v>(&self, var: &'v str) -> Result<(&'v str, &'static str)> {
        if let Some((param, mech)) =
            mechanisms::split_range_variable(var, self.mechanisms.keys().copied())
        {
            return Ok((param, mech));
        }
        match mechanisms::split_range_variable(
            var,
            mechanisms::CATALOG.iter().map(|spec| spec.name),
        ) {
            Some((_, mech)) => Err(CellError::MechanismNotInserted {
                section: self.name.clone(),
                mechanism: mech.to_owned(),
            }),
            None => Err(CellError::UnknownParameter(var.to_owned())),
        }
    }

    /// Reads a section variable by its NEURON name: `L`, `diam`, `Ra`, `cm`,
    /// a reversal potential, or a range variable such as `gbar_NaTs`
    pub fn get(&self, var: &str) -> Result<f64> {
        match var {
            "L" => Ok(self.length),
            "diam" => Ok(self.diam),
            "Ra" => Ok(self.ra),
            "cm" => Ok(self.cm),
            _ => {
                if let Some(ion) = Ion::from_reversal_name(var) {
                    return self.reversal(ion);
                }
                let (param, mech) = self.resolve(var)?;
                self.mechanisms[mech]
                    .get(param)
                    .ok_or_else(|| CellError::UnknownParameter(var.to_owned()))
            }
        }
    }

    /// Writes a section variable, see [`Section::get`] for the accepted names
    pub fn set(&mut self, var: &str, value: f64) -> Result<()> {
        match var {
            "L" => self.set_length(value),
            "diam" => self.set_diam(value),
            "Ra" => self.set_ra(value),
            "cm" => self.set_cm(value),
            _ => {
                if let Some(ion) = Ion::from_reversal_name(var) {
                    return self.set_reversal(ion, value);
                }
                let (param, mech) = self.resolve(var)?;
                match self.mechanisms.get_mut(mech) {
                    Some(mechanism) => mechanism.set(param, value),
                    None => Err(CellError::UnknownParameter(var.to_owned())),
                }
            }
        }
    }
}

fn finite(name: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(CellError::InvalidValue {
            name: name.to_owned(),
            value,
        })
    }
}

fn positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(CellError::InvalidValue {
            name: name.to_owned(),
            value,
        })
    }
}

/// Rule choosing how many segments each section is split into.
/// Always yields an odd count so the section center is a node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Discretization {
    /// `1 + 2 * floor(L / interval)`
    FixedLength { interval: f64 },
    /// Reasonable default values for most models are `frequency = 100.0` and
    /// `d_lambda = 0.1` (larger is more coarse-grained).
    /// Taken from https://jaxley.readthedocs.io/en/stable/how_to_guide/set_ncomp.html
    DLambda { frequency: f64, d_lambda: f64 },
}

impl Default for Discretization {
    fn default() -> Self {
        Discretization::FixedLength { interval: 40.0 }
    }
}

impl Discretization {
    /// Whether the rule reads `Ra` and `cm` and so must run after they are set
    pub fn depends_on_cable_properties(&self) -> bool {
        matches!(self, Discretization::DLambda { .. })
    }

    /// Rejects intervals, frequencies and d_lambda values that are not
    /// finite and positive
    pub fn validate(&self) -> Result<()> {
        match *self {
            Discretization::FixedLength { interval } => positive("interval", interval),
            Discretization::DLambda {
                frequency,
                d_lambda,
            } => {
                positive("frequency", frequency)?;
                positive("d_lambda", d_lambda)
            }
        }
    }

    pub fn nseg(&self, section: &Section) -> Result<usize> {
        self.validate()?;
        let half = match *self {
            Discretization::FixedLength { interval } => (section.length() / interval).floor(),
            Discretization::DLambda {
                frequency,
                d_lambda,
            } => {
                let lambda_f = 1e5
                    * (section.diam() / (4.0 * PI * frequency * section.ra() * section.cm()))
                        .sqrt();
                ((section.length() / (d_lambda * lambda_f) + 0.9) / 2.0).floor()
            }
        };
        if !half.is_finite() || half < 0.0 || half >= (usize::MAX / 2) as f64 {
            return Err(CellError::InvalidValue {
                name: format!("nseg of {}", section.name()),
                value: half,
            });
        }
        (half as usize)
            .checked_mul(2)
            .and_then(|n| n.checked_add(1))
            .ok_or_else(|| CellError::InvalidValue {
                name: format!("nseg of {}", section.name()),
                value: half,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn pt(x: f64, y: f64, diam: f64) -> Pt3d {
        Pt3d { x, y, z: 0.0, diam }
    }

    #[test]
    fn test_new_section_defaults() {
        let section = Section::new(Region::Dend, 3);
        assert_eq!(section.name(), "dend[3]");
        assert_eq!(section.length(), 100.0);
        assert_eq!(section.diam(), 500.0);
        assert_eq!(section.nseg(), 1);
        assert_eq!(section.ra(), 35.4);
        assert_eq!(section.cm(), 1.0);
        assert!(section.parent().is_none());
    }

    #[test]
    fn test_geometry_from_points() {
        let section = Section::from_points(
            Region::Dend,
            0,
            vec![pt(0.0, 0.0, 2.0), pt(30.0, 0.0, 2.0), pt(60.0, 0.0, 1.6)],
        );
        assert!(approx(section.length(), 60.0));
        assert!(approx(section.diam(), 1.9));

        let cylinder = Section::from_points(
            Region::Dend,
            0,
            vec![pt(0.0, 0.0, 2.0), pt(10.0, 0.0, 2.0)],
        );
        assert!(approx(cylinder.area(), PI * 2.0 * 10.0));
    }

    #[test]
    fn test_explicit_geometry_drops_points() {
        let mut section =
            Section::from_points(Region::Axon, 0, vec![pt(0.0, 0.0, 1.0), pt(5.0, 0.0, 1.0)]);
        section.set_length(30.0).unwrap();
        section.set_diam(1.0).unwrap();
        assert!(section.pt3d().is_empty());
        assert!(approx(section.area(), PI * 30.0));
        assert!(section.set_length(0.0).is_err());
        assert!(section.set_diam(f64::INFINITY).is_err());
    }

    #[test]
    fn test_fixed_length_rule() {
        let rule = Discretization::default();
        let mut section = Section::new(Region::Dend, 0);
        for (length, expected) in [(30.0, 1), (39.99, 1), (40.0, 3), (60.0, 3), (200.0, 11)] {
            section.set_length(length).unwrap();
            assert_eq!(rule.nseg(&section).unwrap(), expected, "L = {length}");
        }
    }

    #[test]
    fn test_d_lambda_rule_is_odd_and_grows_with_length() {
        let rule = Discretization::DLambda {
            frequency: 100.0,
            d_lambda: 0.1,
        };
        let mut section = Section::new(Region::Dend, 0);
        section.set_diam(1.0).unwrap();
        section.set_ra(100.0).unwrap();
        section.set_length(10.0).unwrap();
        assert_eq!(rule.nseg(&section).unwrap(), 1);

        section.set_length(1000.0).unwrap();
        let long = rule.nseg(&section).unwrap();
        assert!(long > 1);
        assert_eq!(long % 2, 1);
    }

    #[test]
    fn test_degenerate_rules_are_rejected() {
        let section = Section::new(Region::Dend, 0);
        for rule in [
            Discretization::FixedLength { interval: 0.0 },
            Discretization::FixedLength { interval: -40.0 },
            Discretization::FixedLength {
                interval: f64::NAN,
            },
            Discretization::DLambda {
                frequency: 100.0,
                d_lambda: 0.0,
            },
            Discretization::DLambda {
                frequency: 0.0,
                d_lambda: 0.1,
            },
        ] {
            assert!(rule.validate().is_err(), "{rule:?}");
            assert!(
                matches!(rule.nseg(&section), Err(CellError::InvalidValue { .. })),
                "{rule:?}"
            );
        }

        // a tiny but valid interval overflows the segment count
        let rule = Discretization::FixedLength { interval: 1e-300 };
        assert!(rule.validate().is_ok());
        assert!(matches!(
            rule.nseg(&section),
            Err(CellError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_segment_centers() {
        let mut section = Section::new(Region::Soma, 0);
        section.set_nseg(3).unwrap();
        let centers = section.segment_centers();
        assert_eq!(centers.len(), 3);
        assert!(approx(centers[0], 1.0 / 6.0));
        assert!(approx(centers[1], 0.5));
        assert!(approx(centers[2], 5.0 / 6.0));
        assert!(section.set_nseg(0).is_err());
    }

    #[test]
    fn test_insert_and_range_variables() {
        let mut section = Section::new(Region::Soma, 0);
        assert!(section.insert("K_P").unwrap());
        assert!(!section.insert("K_P").unwrap());

        section.set("gbar_K_P", 0.007372).unwrap();
        assert_eq!(section.get("gbar_K_P").unwrap(), 0.007372);

        assert!(matches!(
            section.set("gbar_NaTs", 0.48),
            Err(CellError::MechanismNotInserted { ref mechanism, .. }) if mechanism == "NaTs"
        ));
        assert!(matches!(
            section.set("tau_K_P", 1.0),
            Err(CellError::UnknownParameter(_))
        ));
        assert!(matches!(
            section.get("bogus"),
            Err(CellError::UnknownParameter(_))
        ));
        assert!(matches!(
            section.insert("hh"),
            Err(CellError::UnknownMechanism(_))
        ));
    }

    #[test]
    fn test_ions_follow_mechanisms() {
        let mut section = Section::new(Region::Soma, 0);
        assert!(matches!(
            section.set("ek", -107.0),
            Err(CellError::IonNotPresent { .. })
        ));

        section.insert("Kv3_1").unwrap();
        assert_eq!(section.get("ek").unwrap(), -77.0);
        section.set("ek", -107.0).unwrap();
        assert_eq!(section.get("ek").unwrap(), -107.0);
        assert!(section.get("ena").is_err());

        // Re-inserting a user of the ion keeps the assigned reversal
        section.insert("SK").unwrap();
        assert_eq!(section.get("ek").unwrap(), -107.0);
    }

    #[test]
    fn test_cable_properties_by_name() {
        let mut section = Section::new(Region::Apic, 0);
        section.set("Ra", 58.48).unwrap();
        section.set("cm", 1.91).unwrap();
        assert_eq!(section.get("Ra").unwrap(), 58.48);
        assert_eq!(section.get("cm").unwrap(), 1.91);
        assert!(section.set("cm", -1.0).is_err());
    }

    #[test]
    fn test_region_names() {
        assert_eq!("apic".parse::<Region>().unwrap(), Region::Apic);
        assert!("basal".parse::<Region>().is_err());
        assert_eq!(Region::from(StructureIdentifier::BasalDendrite), Region::Dend);
        assert_eq!(Region::from(StructureIdentifier::Custom(9)), Region::Dend);
        assert_eq!(Region::Axon.to_string(), "axon");
    }
}
