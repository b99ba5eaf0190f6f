use pyo3::exceptions::{PyIndexError, PyKeyError, PyRuntimeError, PyTypeError};
use pyo3::prelude::*;
use pyo3::types::{PyBytes, PyDict, PyList};
use std::path::PathBuf;
use std::sync::Arc;

use crate::builder;
use crate::config::resolve_data_dir;
use crate::error::RecordFlowError;
use crate::features::{FeatureValue, Record, TensorData};
use crate::source::{RandomAccessDataSource, RecordFileDataSource};

fn to_py_err(e: RecordFlowError) -> PyErr {
    match e {
        RecordFlowError::PositionOutOfRange { .. } => PyIndexError::new_err(e.to_string()),
        RecordFlowError::SplitNotFound { .. } => PyKeyError::new_err(e.to_string()),
        other => PyRuntimeError::new_err(other.to_string()),
    }
}

/// Map-style data source: `len(ds)`, `ds[i]`, `ds[[i, j, ...]]`
#[pyclass(name = "DataSource")]
struct PyDataSource {
    inner: Arc<RecordFileDataSource>,
}

impl PyDataSource {
    /// Python indexing: negative positions count from the end
    fn position(&self, index: i64) -> PyResult<usize> {
        let len = self.inner.len() as i64;
        let resolved = if index < 0 { index + len } else { index };
        if resolved < 0 || resolved >= len {
            return Err(PyIndexError::new_err(format!(
                "position {} out of range for {} records",
                index, len
            )));
        }
        Ok(resolved as usize)
    }
}

#[pymethods]
impl PyDataSource {
    fn __len__(&self) -> usize {
        self.inner.len()
    }

    fn __getitem__(&self, py: Python<'_>, key: &PyAny) -> PyResult<PyObject> {
        if let Ok(index) = key.extract::<i64>() {
            let record = self.inner.get(self.position(index)?).map_err(to_py_err)?;
            return record_to_py(py, &record);
        }

        let indices: Vec<i64> = key
            .extract()
            .map_err(|_| PyTypeError::new_err("DataSource indices must be an int or a list of ints"))?;
        let positions = indices
            .into_iter()
            .map(|i| self.position(i))
            .collect::<PyResult<Vec<_>>>()?;
        let records = self.inner.get_many(&positions).map_err(to_py_err)?;

        let list = PyList::empty(py);
        for record in &records {
            list.append(record_to_py(py, record)?)?;
        }
        Ok(list.into())
    }

    fn __repr__(&self) -> String {
        format!(
            "DataSource(name={:?}, num_records={}, num_shards={})",
            self.inner.name(),
            self.inner.len(),
            self.inner.num_shards()
        )
    }
}

fn record_to_py(py: Python<'_>, record: &Record) -> PyResult<PyObject> {
    let dict = PyDict::new(py);
    for (name, value) in record.iter() {
        dict.set_item(name, value_to_py(py, value))?;
    }
    Ok(dict.into())
}

fn value_to_py(py: Python<'_>, value: &FeatureValue) -> PyObject {
    match value {
        FeatureValue::Int(v) => v.to_object(py),
        FeatureValue::Float(v) => v.to_object(py),
        FeatureValue::Bool(v) => v.to_object(py),
        FeatureValue::Text(v) => v.to_object(py),
        FeatureValue::Bytes(v) => PyBytes::new(py, v).into(),
        FeatureValue::Tensor { shape, data } => match data {
            TensorData::Int64(v) => nested_list(py, shape, v),
            TensorData::Float64(v) => nested_list(py, shape, v),
        },
    }
}

/// Row-major flat data as nested Python lists of the given shape
fn nested_list<T>(py: Python<'_>, shape: &[usize], data: &[T]) -> PyObject
where
    T: Copy + IntoPy<PyObject>,
{
    match shape.split_first() {
        None => data.first().map(|&v| v.into_py(py)).unwrap_or_else(|| py.None()),
        Some((&n, rest)) => {
            let stride: usize = rest.iter().product();
            let items: Vec<PyObject> = (0..n)
                .map(|i| {
                    let chunk = data.get(i * stride..(i + 1) * stride).unwrap_or(&[]);
                    nested_list(py, rest, chunk)
                })
                .collect();
            PyList::new(py, items).into()
        }
    }
}

/// Split name -> DataSource for a prepared dataset
#[pyfunction]
#[pyo3(signature = (name, data_dir=None, version=None))]
fn data_sources(
    py: Python<'_>,
    name: &str,
    data_dir: Option<PathBuf>,
    version: Option<&str>,
) -> PyResult<PyObject> {
    let data_dir = resolve_data_dir(data_dir);
    let sources = builder::data_sources(name, &data_dir, version).map_err(to_py_err)?;

    let dict = PyDict::new(py);
    for (split, source) in sources {
        dict.set_item(split, Py::new(py, PyDataSource { inner: source })?)?;
    }
    Ok(dict.into())
}

#[pymodule]
pub fn recordflow_core(_py: Python<'_>, m: &PyModule) -> PyResult<()> {
    m.add_class::<PyDataSource>()?;
    m.add_function(wrap_pyfunction!(data_sources, m)?)?;
    Ok(())
}
