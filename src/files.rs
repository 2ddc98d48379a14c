use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::error::CoverError;

/// Write `data` to a sibling temp file, then rename it over `path`.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<(), CoverError> {
    let file_name = path.file_name().unwrap_or_default();
    let mut tmp_name = OsString::from(file_name);
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(&tmp_name);

    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, path)?;
    Ok(())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), CoverError> {
    let json = serde_json::to_string_pretty(value)?;
    atomic_write(path, json.as_bytes())
}

pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, CoverError> {
    let data = fs::read_to_string(path)?;
    let value = serde_json::from_str(&data)?;
    Ok(value)
}
