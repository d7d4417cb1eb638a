//! The named cell model a simulation harness instantiates: Allen Cell Types
//! model 329321704, a layer 4 Scnn1a-Tg3-Cre cell.

use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::biophysics::BiophysicalModel;
use crate::cell::{AxonStub, Cell};
use crate::error::Result;
use crate::import::load_swc;
use crate::sections::Discretization;
use crate::swc_reader::{Morphology, ReaderOptions, parse_swc, read_swc};

pub const DEFAULT_NAME: &str = "Neuron329321704";
pub const MORPHOLOGY_FILE: &str = "Scnn1a-Tg3-Cre_Ai14_IVSCC_-170426.03.01.01_328933585_m.swc";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// `None` renders as `Neuron329321704_instance`
    pub name: Option<String>,
    pub morphology: PathBuf,
    /// Offset added to every reconstructed point (µm)
    pub position: [f64; 3],
    /// Keep the reconstructed axon instead of attaching the stub
    pub use_axon: bool,
    pub axon_stub: AxonStub,
    pub discretization: Discretization,
    pub reader: ReaderOptions,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: Some(DEFAULT_NAME.to_owned()),
            morphology: PathBuf::from(MORPHOLOGY_FILE),
            position: [0.0, 0.0, 0.0],
            use_axon: false,
            axon_stub: AxonStub::default(),
            discretization: Discretization::default(),
            reader: ReaderOptions::default(),
        }
    }
}

impl ModelConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    fn reader_options(&self) -> ReaderOptions {
        ReaderOptions {
            shift: self.position,
            ..self.reader.clone()
        }
    }

    fn display_name(&self) -> String {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name.to_owned(),
            _ => format!("{DEFAULT_NAME}_instance"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Neuron329321704 {
    cell: Cell,
    config: ModelConfig,
}

impl Neuron329321704 {
    /// Loads the morphology named in `config` and builds the cell
    pub fn new(config: &ModelConfig) -> Result<Self> {
        Self::with_biophysics(config, &BiophysicalModel::neuron_329321704())
    }

    pub fn with_biophysics(config: &ModelConfig, biophysics: &BiophysicalModel) -> Result<Self> {
        let morphology = read_swc(&config.morphology, &config.reader_options())?;
        Self::from_morphology(&morphology, config, biophysics)
    }

    pub fn from_swc_str(text: &str, config: &ModelConfig) -> Result<Self> {
        let morphology = parse_swc(text, &config.reader_options())?;
        Self::from_morphology(&morphology, config, &BiophysicalModel::neuron_329321704())
    }

    /// Builds the cell from an already loaded tree. The morphology must have
    /// been read with the config's position shift applied.
    pub fn from_morphology(
        morphology: &Morphology,
        config: &ModelConfig,
        biophysics: &BiophysicalModel,
    ) -> Result<Self> {
        let mut cell = Cell::new(config.display_name());
        load_swc(morphology, &mut cell, config.use_axon)?;

        // The reconstructed axon is dropped during import, so the stub
        // becomes the only axon
        if !config.use_axon {
            cell.replace_axon(&config.axon_stub)?;
        }

        biophysics.apply_mechanisms(&mut cell)?;
        cell.discretize(&config.discretization)?;
        biophysics.apply_parameters(&mut cell)?;
        if config.discretization.depends_on_cable_properties() {
            cell.discretize(&config.discretization)?;
        }

        info!(
            "Built {} with {} sections and {} segments",
            cell,
            cell.len(),
            cell.total_nseg()
        );
        Ok(Neuron329321704 {
            cell,
            config: config.clone(),
        })
    }

    pub fn cell(&self) -> &Cell {
        &self.cell
    }

    pub fn cell_mut(&mut self) -> &mut Cell {
        &mut self.cell
    }

    pub fn into_cell(self) -> Cell {
        self.cell
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }
}

impl fmt::Display for Neuron329321704 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.cell.name())
    }
}
