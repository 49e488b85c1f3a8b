//! WASM bridge for the subspace Newton accelerator.
//!
//! The host owns the fixed-point map. Each outer iteration it passes the raw
//! update to [`WasmSubspaceAccelerator::compute`] and, whenever
//! [`check_basis`](WasmSubspaceAccelerator::check_basis) reports growth, supplies
//! the current Jacobian of G so the reduced operator can be rebuilt.

use js_sys::Float64Array;
use nalgebra::DMatrix;
use serde::Serialize;
use serde_wasm_bindgen::{from_value, to_value};
use subspace_core::{
    DenseAdjointOracle, FieldLayout, NewtonUpdateOnSubspace, SubspaceSettings, TapeIndices,
};
use wasm_bindgen::prelude::*;

/// Snapshot of the accelerator handed to the host.
#[derive(Serialize)]
struct AcceleratorStatus {
    basis_len: usize,
    capacity: usize,
    saturated: bool,
    reduced_coordinates: Vec<f64>,
}

#[wasm_bindgen]
pub struct WasmSubspaceAccelerator {
    accelerator: NewtonUpdateOnSubspace,
    oracle: DenseAdjointOracle,
    indices: TapeIndices,
    krylov_criterion: f64,
}

#[wasm_bindgen]
impl WasmSubspaceAccelerator {
    #[wasm_bindgen(constructor)]
    pub fn new(
        n_sample: u32,
        n_basis: u32,
        npt: u32,
        nvar: u32,
    ) -> Result<WasmSubspaceAccelerator, JsValue> {
        console_error_panic_hook::set_once();

        let settings = SubspaceSettings {
            n_sample: n_sample as usize,
            n_basis: n_basis as usize,
            ..SubspaceSettings::default()
        };
        Self::build(settings, npt as usize, nvar as usize)
    }

    /// Builds from a serialized `SubspaceSettings` object.
    pub fn from_settings(
        settings_val: JsValue,
        npt: u32,
        nvar: u32,
    ) -> Result<WasmSubspaceAccelerator, JsValue> {
        console_error_panic_hook::set_once();

        let settings: SubspaceSettings = from_value(settings_val)
            .map_err(|e| JsValue::from_str(&format!("Invalid subspace settings: {}", e)))?;
        Self::build(settings, npt as usize, nvar as usize)
    }

    /// Stores the Jacobian of G at the latest evaluation, row-major.
    pub fn set_jacobian(&mut self, jacobian: Vec<f64>) -> Result<(), JsValue> {
        let dim = self.accelerator.layout().len();
        if jacobian.len() != dim * dim {
            return Err(JsValue::from_str(&format!(
                "Invalid jacobian.len(): expected {}, got {}",
                dim * dim,
                jacobian.len()
            )));
        }
        self.oracle
            .set_jacobian(DMatrix::from_row_slice(dim, dim, &jacobian));
        Ok(())
    }

    /// Corrects the raw update `G(u)` and returns the next iterate.
    pub fn compute(&mut self, raw: &[f64]) -> Result<Float64Array, JsValue> {
        self.accelerator
            .load(raw)
            .map_err(|e| JsValue::from_str(&format!("Invalid update: {}", e)))?;
        let corrected = self.accelerator.compute();
        Ok(Float64Array::from(corrected.as_slice()))
    }

    /// Runs the Krylov criterion with the configured threshold.
    pub fn check_basis(&mut self) -> bool {
        self.accelerator.check_basis(self.krylov_criterion)
    }

    /// Rebuilds the reduced operator from the stored Jacobian.
    pub fn update_projected_jacobian(&mut self) -> Result<(), JsValue> {
        self.accelerator
            .compute_projected_jacobian(0, &self.indices, &mut self.oracle)
            .map_err(|e| JsValue::from_str(&format!("Reduced operator rejected: {}", e)))
    }

    pub fn reset(&mut self) {
        self.accelerator.reset();
    }

    pub fn size(&self) -> u32 {
        self.accelerator.size() as u32
    }

    pub fn basis_len(&self) -> u32 {
        self.accelerator.basis_len() as u32
    }

    /// True once the basis is full and no further growth is possible.
    pub fn is_saturated(&self) -> bool {
        self.accelerator.is_saturated()
    }

    pub fn status(&self) -> Result<JsValue, JsValue> {
        let status = AcceleratorStatus {
            basis_len: self.accelerator.basis_len(),
            capacity: self.accelerator.size(),
            saturated: self.accelerator.is_saturated(),
            reduced_coordinates: self.accelerator.reduced_coordinates().as_slice().to_vec(),
        };
        to_value(&status).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }
}

impl WasmSubspaceAccelerator {
    fn build(
        settings: SubspaceSettings,
        npt: usize,
        nvar: usize,
    ) -> Result<WasmSubspaceAccelerator, JsValue> {
        let layout = FieldLayout::serial(npt, nvar);
        let accelerator = NewtonUpdateOnSubspace::from_settings(&settings, layout)
            .map_err(|e| JsValue::from_str(&format!("Invalid accelerator: {}", e)))?;
        let dim = layout.len();
        Ok(WasmSubspaceAccelerator {
            accelerator,
            oracle: DenseAdjointOracle::new(DMatrix::identity(dim, dim)),
            indices: TapeIndices::identity(dim),
            krylov_criterion: settings.krylov_criterion,
        })
    }
}
