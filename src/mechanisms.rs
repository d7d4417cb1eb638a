//!
//! Density mechanisms that can be inserted into a section: the passive leak,
//! the Allen Institute active channel set, and the calcium pump
//! Based on: https://nrn.readthedocs.io/en/9.0.0/tutorials/scripting-neuron-basics.html#Biophysical-mechanisms
//!
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{CellError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ion {
    Na,
    K,
    Ca,
}

impl Ion {
    pub const ALL: [Ion; 3] = [Ion::Na, Ion::K, Ion::Ca];

    pub fn name(self) -> &'static str {
        match self {
            Ion::Na => "na",
            Ion::K => "k",
            Ion::Ca => "ca",
        }
    }

    /// Name of the reversal potential variable, e.g. `ena`
    pub fn reversal_name(self) -> &'static str {
        match self {
            Ion::Na => "ena",
            Ion::K => "ek",
            Ion::Ca => "eca",
        }
    }

    /// Reversal potential (mV) an ion starts with when it first appears in a section
    pub fn default_reversal(self) -> f64 {
        match self {
            Ion::Na => 50.0,
            Ion::K => -77.0,
            Ion::Ca => 132.458,
        }
    }

    pub fn from_reversal_name(name: &str) -> Option<Ion> {
        Ion::ALL.into_iter().find(|ion| ion.reversal_name() == name)
    }
}

/// Static description of a mechanism: its parameters with defaults, and the
/// ions it reads or writes
#[derive(Debug, PartialEq)]
pub struct MechanismSpec {
    pub name: &'static str,
    pub parameters: &'static [(&'static str, f64)],
    pub ions: &'static [Ion],
}

pub const CATALOG: &[MechanismSpec] = &[
    MechanismSpec {
        name: "pas",
        parameters: &[("g", 0.001), ("e", -70.0)],
        ions: &[],
    },
    MechanismSpec {
        name: "CaDynamics",
        parameters: &[
            ("gamma", 0.05),
            ("decay", 80.0),
            ("depth", 0.1),
            ("minCai", 1e-4),
        ],
        ions: &[Ion::Ca],
    },
    MechanismSpec {
        name: "Ca_HVA",
        parameters: &[("gbar", 0.00001)],
        ions: &[Ion::Ca],
    },
    MechanismSpec {
        name: "Ca_LVA",
        parameters: &[("gbar", 0.00001)],
        ions: &[Ion::Ca],
    },
    MechanismSpec {
        name: "Ih",
        parameters: &[("gbar", 0.00001), ("ehcn", -45.0)],
        ions: &[],
    },
    MechanismSpec {
        name: "Im",
        parameters: &[("gbar", 0.00001)],
        ions: &[Ion::K],
    },
    MechanismSpec {
        name: "K_P",
        parameters: &[("gbar", 0.00001)],
        ions: &[Ion::K],
    },
    MechanismSpec {
        name: "K_T",
        parameters: &[("gbar", 0.00001)],
        ions: &[Ion::K],
    },
    MechanismSpec {
        name: "Kv3_1",
        parameters: &[("gbar", 0.00001)],
        ions: &[Ion::K],
    },
    MechanismSpec {
        name: "NaTs",
        parameters: &[("gbar", 0.00001)],
        ions: &[Ion::Na],
    },
    MechanismSpec {
        name: "Nap",
        parameters: &[("gbar", 0.00001)],
        ions: &[Ion::Na],
    },
    MechanismSpec {
        name: "SK",
        parameters: &[("gbar", 0.000001)],
        ions: &[Ion::K],
    },
];

pub fn lookup(name: &str) -> Result<&'static MechanismSpec> {
    CATALOG
        .iter()
        .find(|spec| spec.name == name)
        .ok_or_else(|| CellError::UnknownMechanism(name.to_owned()))
}

/// Splits a range variable such as `gbar_Ca_HVA` into `("gbar", "Ca_HVA")`.
/// `candidates` are the mechanism names to match against; the longest
/// matching suffix wins.
pub fn split_range_variable<'a, 'm>(
    var: &'a str,
    candidates: impl IntoIterator<Item = &'m str>,
) -> Option<(&'a str, &'m str)> {
    candidates
        .into_iter()
        .filter_map(|mech| {
            let param = var.strip_suffix(mech)?.strip_suffix('_')?;
            (!param.is_empty()).then_some((param, mech))
        })
        .max_by_key(|(_, mech)| mech.len())
}

/// A mechanism inserted into one section, with its current parameter values
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mechanism {
    name: &'static str,
    ions: &'static [Ion],
    values: BTreeMap<&'static str, f64>,
}

impl Mechanism {
    pub fn new(spec: &'static MechanismSpec) -> Self {
        Mechanism {
            name: spec.name,
            ions: spec.ions,
            values: spec.parameters.iter().copied().collect(),
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        lookup(name).map(Mechanism::new)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn ions(&self) -> &'static [Ion] {
        self.ions
    }

    pub fn get(&self, param: &str) -> Option<f64> {
        self.values.get(param).copied()
    }

    pub fn set(&mut self, param: &str, value: f64) -> Result<()> {
        let slot = self
            .values
            .get_mut(param)
            .ok_or_else(|| CellError::UnknownParameter(format!("{}_{}", param, self.name)))?;
        if !value.is_finite() {
            return Err(CellError::InvalidValue {
                name: format!("{}_{}", param, self.name),
                value,
            });
        }
        *slot = value;
        Ok(())
    }

    pub fn parameters(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        self.values.iter().map(|(&k, &v)| (k, v))
    }
}
