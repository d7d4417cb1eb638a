use itertools::Itertools;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{CellError, Result};
use crate::sections::{Connection, Discretization, Region, Section, SectionId};

/// A set of sections an operation applies to: every section or one region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    All,
    Region(Region),
}

impl FromStr for Target {
    type Err = CellError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "all" => Ok(Target::All),
            other => other.parse().map(Target::Region),
        }
    }
}

impl From<Region> for Target {
    fn from(region: Region) -> Self {
        Target::Region(region)
    }
}

/// The synthetic axon attached in place of the reconstructed one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxonStub {
    pub sections: usize,
    pub length: f64,
    pub diam: f64,
    pub nseg: usize,
}

impl Default for AxonStub {
    fn default() -> Self {
        Self {
            sections: 2,
            length: 30.0,
            diam: 1.0,
            nseg: 1,
        }
    }
}

impl AxonStub {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("axon stub length", self.length), ("axon stub diam", self.diam)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(CellError::InvalidValue {
                    name: name.to_owned(),
                    value,
                });
            }
        }
        if self.nseg == 0 {
            return Err(CellError::InvalidValue {
                name: "axon stub nseg".to_owned(),
                value: 0.0,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellSummary {
    pub name: String,
    pub sections: BTreeMap<Region, usize>,
    pub total_length: f64,
    pub total_area: f64,
    pub total_nseg: usize,
}

/// A cell: an arena of sections in creation order (the `all` list), with the
/// soma / axon / dend / apic lists derived from each section's region
#[derive(Debug, Clone, Default, Serialize)]
pub struct Cell {
    name: String,
    sections: Vec<Section>,
}

impl Cell {
    pub fn new(name: impl Into<String>) -> Self {
        Cell {
            name: name.into(),
            sections: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn all(&self) -> Vec<SectionId> {
        (0..self.sections.len()).map(SectionId).collect()
    }

    pub fn region(&self, region: Region) -> Vec<SectionId> {
        self.sections
            .iter()
            .enumerate()
            .filter(|(_, section)| section.region() == region)
            .sorted_by_key(|(_, section)| section.index())
            .map(|(i, _)| SectionId(i))
            .collect()
    }

    pub fn soma(&self) -> Vec<SectionId> {
        self.region(Region::Soma)
    }

    pub fn axon(&self) -> Vec<SectionId> {
        self.region(Region::Axon)
    }

    pub fn dend(&self) -> Vec<SectionId> {
        self.region(Region::Dend)
    }

    pub fn apic(&self) -> Vec<SectionId> {
        self.region(Region::Apic)
    }

    pub fn targets(&self, target: Target) -> Vec<SectionId> {
        match target {
            Target::All => self.all(),
            Target::Region(region) => self.region(region),
        }
    }

    pub fn get(&self, id: SectionId) -> Option<&Section> {
        self.sections.get(id.0)
    }

    pub fn get_mut(&mut self, id: SectionId) -> Option<&mut Section> {
        self.sections.get_mut(id.0)
    }

    pub fn id_of(&self, name: &str) -> Result<SectionId> {
        self.sections
            .iter()
            .position(|section| section.name() == name)
            .map(SectionId)
            .ok_or_else(|| CellError::SectionNotFound(name.to_owned()))
    }

    /// Looks a section up by its list name, e.g. `dend[2]`
    pub fn section(&self, name: &str) -> Result<&Section> {
        let id = self.id_of(name)?;
        Ok(&self.sections[id.0])
    }

    pub fn section_mut(&mut self, name: &str) -> Result<&mut Section> {
        let id = self.id_of(name)?;
        Ok(&mut self.sections[id.0])
    }

    /// Full name as the harness sees it, e.g. `Neuron329321704.soma[0]`
    pub fn qualified_name(&self, id: SectionId) -> Option<String> {
        self.get(id)
            .map(|section| format!("{}.{}", self.name, section.name()))
    }

    /// Appends a section to the end of `all`, renumbering it to the next free
    /// index of its region
    pub fn push_section(&mut self, mut section: Section) -> SectionId {
        let index = self
            .sections
            .iter()
            .filter(|s| s.region() == section.region())
            .count();
        section.renumber(index);
        section.set_parent(None);
        self.sections.push(section);
        SectionId(self.sections.len() - 1)
    }

    pub fn new_section(&mut self, region: Region) -> SectionId {
        self.push_section(Section::new(region, 0))
    }

    fn check(&self, id: SectionId) -> Result<()> {
        if id.0 < self.sections.len() {
            Ok(())
        } else {
            Err(CellError::SectionNotFound(format!("#{}", id.0)))
        }
    }

    /// Attaches the 0 end of `child` to position `x` of `parent`
    pub fn connect(&mut self, child: SectionId, parent: SectionId, x: f64) -> Result<()> {
        self.check(child)?;
        self.check(parent)?;
        if !(0.0..=1.0).contains(&x) {
            return Err(CellError::InvalidLocation(x));
        }
        // Refuse loops: the child may not be an ancestor of the parent
        let mut cursor = Some(parent);
        while let Some(id) = cursor {
            if id == child {
                return Err(CellError::InvalidValue {
                    name: format!("connect {} to its own subtree", self.sections[child.0].name()),
                    value: x,
                });
            }
            cursor = self.sections[id.0].parent().map(|c| c.parent);
        }
        self.sections[child.0].set_parent(Some(Connection {
            parent,
            parent_x: x,
        }));
        Ok(())
    }

    pub fn children(&self, id: SectionId) -> Vec<SectionId> {
        self.sections
            .iter()
            .enumerate()
            .filter(|(_, section)| section.parent().is_some_and(|c| c.parent == id))
            .map(|(i, _)| SectionId(i))
            .collect()
    }

    /// Deletes every section of `region` along with their subtrees. Remaining
    /// sections keep their order; the region's indices restart at 0.
    pub fn remove_region(&mut self, region: Region) -> usize {
        let mut doomed: Vec<bool> = self
            .sections
            .iter()
            .map(|section| section.region() == region)
            .collect();
        // Parents always precede children in the arena only for imported
        // trees, so iterate to a fixed point
        loop {
            let mut changed = false;
            for (i, section) in self.sections.iter().enumerate() {
                if !doomed[i] && section.parent().is_some_and(|c| doomed[c.parent.0]) {
                    doomed[i] = true;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        let removed = doomed.iter().filter(|&&d| d).count();
        if removed == 0 {
            return 0;
        }

        let mut remap: Vec<Option<SectionId>> = Vec::with_capacity(self.sections.len());
        let mut next = 0;
        for &d in &doomed {
            if d {
                remap.push(None);
            } else {
                remap.push(Some(SectionId(next)));
                next += 1;
            }
        }

        let old = std::mem::take(&mut self.sections);
        let mut counters: BTreeMap<Region, usize> = BTreeMap::new();
        for (i, mut section) in old.into_iter().enumerate() {
            if doomed[i] {
                continue;
            }
            let counter = counters.entry(section.region()).or_insert(0);
            section.renumber(*counter);
            *counter += 1;
            let parent = section.parent().and_then(|c| {
                remap[c.parent.0].map(|parent| Connection {
                    parent,
                    parent_x: c.parent_x,
                })
            });
            section.set_parent(parent);
            self.sections.push(section);
        }
        debug!("Removed {} sections rooted in {}", removed, region);
        removed
    }

    /// Drops any reconstructed axon and attaches the synthetic stub: the first
    /// stub section hangs off `soma[0](0.5)`, each following one off the end
    /// of the previous
    pub fn replace_axon(&mut self, stub: &AxonStub) -> Result<Vec<SectionId>> {
        stub.validate()?;
        let soma = *self.soma().first().ok_or(CellError::NoSoma)?;
        let removed = self.remove_region(Region::Axon);
        // Removing sections can shift the soma
        let soma = if removed > 0 { self.id_of("soma[0]")? } else { soma };

        let mut ids = Vec::with_capacity(stub.sections);
        let mut parent = (soma, 0.5);
        for _ in 0..stub.sections {
            let id = self.new_section(Region::Axon);
            let section = &mut self.sections[id.0];
            section.set_length(stub.length)?;
            section.set_diam(stub.diam)?;
            section.set_nseg(stub.nseg)?;
            self.connect(id, parent.0, parent.1)?;
            parent = (id, 1.0);
            ids.push(id);
        }
        info!(
            "Replaced {} axon sections with a {}-section stub",
            removed, stub.sections
        );
        Ok(ids)
    }

    /// Inserts a mechanism into every targeted section, returning how many
    /// sections did not already have it
    pub fn insert(&mut self, target: Target, mechanism: &str) -> Result<usize> {
        let mut inserted = 0;
        self.apply_all(target, |section| {
            if section.insert(mechanism)? {
                inserted += 1;
            }
            Ok(())
        })?;
        Ok(inserted)
    }

    /// Sets a named variable on every targeted section. Nothing is written
    /// unless every section accepts the value.
    pub fn set(&mut self, target: Target, var: &str, value: f64) -> Result<()> {
        self.apply_all(target, |section| section.set(var, value))
    }

    // Runs `op` on copies of the targeted sections and commits them only when
    // all succeed
    fn apply_all(
        &mut self,
        target: Target,
        mut op: impl FnMut(&mut Section) -> Result<()>,
    ) -> Result<()> {
        let ids = self.targets(target);
        let mut staged = Vec::with_capacity(ids.len());
        for &id in &ids {
            let mut section = self.sections[id.0].clone();
            op(&mut section)?;
            staged.push(section);
        }
        for (id, section) in ids.into_iter().zip(staged) {
            self.sections[id.0] = section;
        }
        Ok(())
    }

    /// Computes every segment count before writing any, so a failing rule
    /// leaves the cell untouched
    pub fn discretize(&mut self, rule: &Discretization) -> Result<()> {
        rule.validate()?;
        let counts = self
            .sections
            .iter()
            .map(|section| rule.nseg(section))
            .collect::<Result<Vec<usize>>>()?;
        for (section, nseg) in self.sections.iter_mut().zip(counts) {
            section.set_nseg(nseg)?;
        }
        debug!(
            "Discretized {} sections into {} segments",
            self.sections.len(),
            self.total_nseg()
        );
        Ok(())
    }

    pub fn total_length(&self) -> f64 {
        self.sections.iter().map(Section::length).sum()
    }

    pub fn total_area(&self) -> f64 {
        self.sections.iter().map(Section::area).sum()
    }

    pub fn total_nseg(&self) -> usize {
        self.sections.iter().map(Section::nseg).sum()
    }

    pub fn summary(&self) -> CellSummary {
        CellSummary {
            name: self.name.clone(),
            sections: self.sections.iter().map(Section::region).counts().into_iter().collect(),
            total_length: self.total_length(),
            total_area: self.total_area(),
            total_nseg: self.total_nseg(),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.name)
    }
}
