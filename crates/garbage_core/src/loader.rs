//! Reading and writing safetensors weight files.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use safetensors::SafeTensors;
use tracing::debug;

/// Reads every tensor of a safetensors file onto `device`.
pub fn load_tensors(path: impl AsRef<Path>, device: &Device) -> Result<HashMap<String, Tensor>> {
    let path = path.as_ref();
    debug!("Loading safetensors from {}", path.display());

    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read weights file: {}", path.display()))?;
    let tensors = SafeTensors::deserialize(&data)
        .with_context(|| format!("Failed to parse safetensors: {}", path.display()))?;

    let mut tensor_map = HashMap::new();
    for name in tensors.names() {
        let view = tensors
            .tensor(name)
            .with_context(|| format!("Failed to get tensor '{name}'"))?;
        let dtype = safetensors_dtype_to_candle(view.dtype())?;
        let tensor = Tensor::from_raw_buffer(view.data(), dtype, view.shape(), device)
            .with_context(|| format!("Failed to create tensor '{name}'"))?
            .to_dtype(DType::F32)?;
        tensor_map.insert(name.to_string(), tensor);
    }
    Ok(tensor_map)
}

/// Builds a frozen `VarBuilder` over a safetensors file.
///
/// Tensors served from this builder are constants; they never show up in an
/// optimizer's variable list.
pub fn load_var_builder(path: impl AsRef<Path>, device: &Device) -> Result<VarBuilder<'static>> {
    let tensors = load_tensors(path, device)?;
    Ok(VarBuilder::from_tensors(tensors, DType::F32, device))
}

/// Writes named tensors to `path`, creating parent directories.
pub fn save_tensors(tensors: &HashMap<String, Tensor>, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    candle_core::safetensors::save(tensors, path)
        .with_context(|| format!("Failed to write weights file: {}", path.display()))?;
    debug!("Wrote {} tensors to {}", tensors.len(), path.display());
    Ok(())
}

fn safetensors_dtype_to_candle(dtype: safetensors::Dtype) -> Result<DType> {
    use safetensors::Dtype as S;
    match dtype {
        S::F32 => Ok(DType::F32),
        S::F64 => Ok(DType::F64),
        S::F16 => Ok(DType::F16),
        S::BF16 => Ok(DType::BF16),
        other => anyhow::bail!("Unsupported weight dtype: {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_then_load_keeps_names_and_values() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nested").join("w.safetensors");
        let t = Tensor::new(&[[1f32, 2.], [3., 4.]], &Device::Cpu)?;
        save_tensors(&HashMap::from([("layer.weight".to_string(), t)]), &path)?;

        let loaded = load_tensors(&path, &Device::Cpu)?;
        let values = loaded["layer.weight"].to_vec2::<f32>()?;
        assert_eq!(values, vec![vec![1., 2.], vec![3., 4.]]);
        Ok(())
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_tensors("/nonexistent/path.safetensors", &Device::Cpu).is_err());
    }

    #[test]
    fn garbage_bytes_are_rejected() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("bad.safetensors");
        std::fs::write(&path, b"not a weights file")?;
        assert!(load_var_builder(&path, &Device::Cpu).is_err());
        Ok(())
    }
}
