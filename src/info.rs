//! # NetCDF File Information Module
//!
//! Extracts and displays information about NetCDF files: dimensions (length
//! and unlimited flag), variables with their shapes and attributes, and
//! global metadata. Used by the `info` subcommand and to enumerate variable
//! names when an expression fails to resolve.

use crate::error::Result;
use crate::store::{NetcdfStore, OpenOptions};
use anyhow::Context;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Information about a NetCDF dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDimensionInfo {
    pub name: String,
    pub length: usize,
    pub is_unlimited: bool,
}

/// Information about a NetCDF variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileVariableInfo {
    pub name: String,
    pub dimensions: Vec<String>,
    pub shape: Vec<usize>,
    pub unit: String,
    pub long_name: String,
    pub attributes: BTreeMap<String, String>,
}

/// Complete information about a NetCDF file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    pub dimensions: Vec<FileDimensionInfo>,
    pub variables: Vec<FileVariableInfo>,
    pub global_attributes: BTreeMap<String, String>,
    pub total_dimensions: usize,
    pub total_variables: usize,
}

/// Gather file information, optionally restricted to one variable.
pub fn file_info(path: &Path, variable: Option<&str>, detailed: bool) -> Result<FileInfo> {
    debug!("opening NetCDF file: {}", path.display());
    let store = NetcdfStore::open(path, &OpenOptions::default())?;

    let mut dimensions = Vec::new();
    for name in store.dimension_names() {
        if let Some(info) = store.dimension_info(&name) {
            dimensions.push(FileDimensionInfo {
                name: info.name,
                length: info.length,
                is_unlimited: info.unlimited,
            });
        }
    }

    let mut variables = Vec::new();
    for name in store.variable_names() {
        if let Some(wanted) = variable
            && wanted != name
        {
            continue;
        }
        let Some(meta) = store.variable_meta(&name) else {
            continue;
        };
        let mut attributes = BTreeMap::new();
        if detailed {
            for key in [
                "units",
                "long_name",
                "standard_name",
                "_FillValue",
                "scale_factor",
                "add_offset",
            ] {
                if let Some(value) = store.string_attribute(&name, key) {
                    attributes.insert(key.to_string(), value);
                }
            }
        }
        variables.push(FileVariableInfo {
            name: meta.name,
            dimensions: meta.dimensions,
            shape: meta.shape,
            unit: meta.unit,
            long_name: meta.long_name,
            attributes,
        });
    }

    let global_attributes = if detailed {
        store.global_attributes().into_iter().collect()
    } else {
        BTreeMap::new()
    };

    Ok(FileInfo {
        path: path.display().to_string(),
        total_dimensions: dimensions.len(),
        total_variables: variables.len(),
        dimensions,
        variables,
        global_attributes,
    })
}

/// Print file info in human-readable format.
pub fn print_file_info_human(info: &FileInfo) {
    println!("NetCDF File Information:");
    println!("  Path: {}", info.path);
    println!("  Dimensions: {} total", info.total_dimensions);
    for dim in &info.dimensions {
        println!(
            "    {} ({}{})",
            dim.name,
            dim.length,
            if dim.is_unlimited { ", unlimited" } else { "" }
        );
    }
    println!("  Variables: {} total", info.total_variables);
    for var in &info.variables {
        let unit = if var.unit.is_empty() {
            String::new()
        } else {
            format!(" [{}]", var.unit)
        };
        println!(
            "    {}{} - dimensions: [{}], shape {:?}",
            var.name,
            unit,
            var.dimensions.join(", "),
            var.shape
        );
        for (name, value) in &var.attributes {
            println!("      @{name}: {value}");
        }
    }
    if !info.global_attributes.is_empty() {
        println!("  Global Attributes:");
        for (name, value) in &info.global_attributes {
            println!("    @{name}: {value}");
        }
    }
}

/// Print file info as pretty JSON.
pub fn print_file_info_json(info: &FileInfo) -> anyhow::Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(info).context("failed to serialize file info to JSON")?
    );
    Ok(())
}

/// Print file info as YAML.
pub fn print_file_info_yaml(info: &FileInfo) -> anyhow::Result<()> {
    println!(
        "{}",
        serde_yaml::to_string(info).context("failed to serialize file info to YAML")?
    );
    Ok(())
}
