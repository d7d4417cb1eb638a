use pyo3::exceptions::{PyKeyError, PyOSError, PyValueError};
use pyo3::prelude::*;
use std::path::PathBuf;

use crate::error::CellError;
use crate::model::{DEFAULT_NAME, ModelConfig, Neuron329321704};

impl From<CellError> for PyErr {
    fn from(err: CellError) -> PyErr {
        match err {
            CellError::Io { .. } => PyOSError::new_err(err.to_string()),
            CellError::SectionNotFound(_) => PyKeyError::new_err(err.to_string()),
            _ => PyValueError::new_err(err.to_string()),
        }
    }
}

/// Allen Cell Types model 329321704 with a two-section axon stub
#[pyclass(name = "Neuron329321704")]
pub struct PyNeuron {
    inner: Neuron329321704,
}

#[pymethods]
impl PyNeuron {
    #[new]
    #[pyo3(signature = (swc, name = Some(DEFAULT_NAME.to_owned()), x = 0.0, y = 0.0, z = 0.0))]
    fn new(swc: PathBuf, name: Option<String>, x: f64, y: f64, z: f64) -> PyResult<Self> {
        let config = ModelConfig {
            name,
            morphology: swc,
            position: [x, y, z],
            ..ModelConfig::default()
        };
        Ok(PyNeuron {
            inner: Neuron329321704::new(&config)?,
        })
    }

    fn __str__(&self) -> String {
        self.inner.to_string()
    }

    fn section_names(&self) -> Vec<String> {
        self.inner
            .cell()
            .sections()
            .iter()
            .map(|section| section.name().to_owned())
            .collect()
    }

    fn get(&self, section: &str, var: &str) -> PyResult<f64> {
        Ok(self.inner.cell().section(section)?.get(var)?)
    }

    fn nseg(&self, section: &str) -> PyResult<usize> {
        Ok(self.inner.cell().section(section)?.nseg())
    }

    fn summary_json(&self) -> PyResult<String> {
        serde_json::to_string(&self.inner.cell().summary())
            .map_err(|err| PyValueError::new_err(err.to_string()))
    }
}

/// Python bindings for the cell model builder
#[pymodule]
pub mod allen_cell {
    #[pymodule_export]
    use super::PyNeuron;
}
