//! Builds compartmental cell models from SWC reconstructions: sections,
//! inserted mechanisms and per-region biophysics, ready for a solver.

pub mod biophysics;
pub mod cell;
pub mod error;
pub mod import;
pub mod mechanisms;
pub mod model;
pub mod sections;
pub mod swc_reader;

#[cfg(feature = "python")]
mod python;

pub use biophysics::BiophysicalModel;
pub use cell::{AxonStub, Cell, CellSummary, Target};
pub use error::{CellError, Result};
pub use model::{ModelConfig, Neuron329321704};
pub use sections::{Discretization, Region, Section, SectionId};
pub use swc_reader::{Morphology, ReaderOptions, parse_swc, read_swc};
