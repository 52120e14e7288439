//! # Dynamic Title Module
//!
//! Formats a figure title from the coordinate value of the current animation
//! slice: the coordinate slab matching the slice is read, its mean taken
//! (coordinate slabs may span more than one raw index when a dimension has a
//! multi-point coordinate), and the mean rendered through either a
//! strftime-style pattern (datetime dimensions) or a printf-style numeric
//! pattern.

use crate::error::{NcplotError, Result};
use crate::slice::{DimSelection, SliceSpec};
use crate::store::{parse_time_units, DimExtent, DimensionDatatype, NetcdfStore};
use chrono::format::{Item, StrftimeItems};

/// Render the dynamic title for `dimension` under the current slice.
///
/// Returns `Ok(None)` when the dimension has no coordinate variable. A
/// coordinate variable that does not include its own dimension is malformed
/// input metadata and fails with [`NcplotError::CoordinateConsistency`]. A
/// masked mean renders as a not-a-number sentinel rather than failing.
pub fn format_title(
    store: &NetcdfStore,
    spec: &SliceSpec,
    dimension: &str,
    format: &str,
) -> Result<Option<String>> {
    let coordinate = store.coordinate_for(dimension);
    let Some(meta) = store.variable_meta(&coordinate) else {
        return Ok(None);
    };
    if !meta.dimensions.iter().any(|d| d == dimension) {
        return Err(NcplotError::CoordinateConsistency {
            dimension: dimension.to_string(),
            coordinate,
            dims: meta.dimensions,
        });
    }

    let extents: Vec<DimExtent> = meta
        .dimensions
        .iter()
        .map(|dim| match spec.get(dim) {
            Some(DimSelection::Index(i)) => DimExtent::Index(i),
            Some(DimSelection::Range(a, b)) => DimExtent::Range(a, b),
            None => DimExtent::All,
        })
        .collect();
    let values = store.read_values(&coordinate, &extents)?;

    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let mean = if finite.is_empty() {
        f64::NAN
    } else {
        finite.iter().sum::<f64>() / finite.len() as f64
    };

    let datatype = store
        .dimension_info(dimension)
        .map(|i| i.datatype)
        .unwrap_or(DimensionDatatype::Float);

    let title = match datatype {
        DimensionDatatype::Datetime => {
            if mean.is_nan() {
                "nan".to_string()
            } else {
                format_datetime(store, &coordinate, mean, format)?
            }
        }
        DimensionDatatype::Float => format_number(format, mean),
    };
    Ok(Some(title))
}

fn format_datetime(
    store: &NetcdfStore,
    coordinate: &str,
    mean: f64,
    format: &str,
) -> Result<String> {
    let units = store.string_attribute(coordinate, "units").unwrap_or_default();
    let Some((seconds_per_unit, epoch)) = parse_time_units(&units) else {
        // Datatype said datetime but the units are not parseable; fall back
        // to the raw number so the title still renders.
        return Ok(format_number(format, mean));
    };
    let millis = (mean * seconds_per_unit * 1000.0).round() as i64;
    let timestamp = epoch
        .checked_add_signed(chrono::Duration::milliseconds(millis))
        .ok_or_else(|| NcplotError::PropertyValue {
            path: "Title".to_string(),
            value: format!("{mean}"),
            reason: "coordinate value is out of datetime range".to_string(),
        })?;

    let items: Vec<Item> = StrftimeItems::new(format).collect();
    if items.iter().any(|i| matches!(i, Item::Error)) {
        return Err(NcplotError::PropertyValue {
            path: "Title".to_string(),
            value: format.to_string(),
            reason: "invalid date format pattern".to_string(),
        });
    }
    Ok(timestamp.format_with_items(items.into_iter()).to_string())
}

/// Substitute the first printf-style numeric conversion in `format` with the
/// value. Supports `%[0-][width][.precision][dieEfgG]` and the `%%` escape;
/// a pattern without any conversion is returned unchanged.
pub fn format_number(format: &str, value: f64) -> String {
    let chars: Vec<char> = format.chars().collect();
    let mut out = String::with_capacity(format.len() + 8);
    let mut i = 0;
    let mut substituted = false;
    while i < chars.len() {
        if chars[i] != '%' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        if i + 1 < chars.len() && chars[i + 1] == '%' {
            out.push('%');
            i += 2;
            continue;
        }
        if substituted {
            out.push('%');
            i += 1;
            continue;
        }
        let mut j = i + 1;
        let mut zero_pad = false;
        let mut left_align = false;
        while j < chars.len() && matches!(chars[j], '0' | '-' | '+' | ' ' | '#') {
            if chars[j] == '0' {
                zero_pad = true;
            }
            if chars[j] == '-' {
                left_align = true;
            }
            j += 1;
        }
        let width_start = j;
        while j < chars.len() && chars[j].is_ascii_digit() {
            j += 1;
        }
        let width: usize = chars[width_start..j]
            .iter()
            .collect::<String>()
            .parse()
            .unwrap_or(0);
        let mut precision = None;
        if j < chars.len() && chars[j] == '.' {
            j += 1;
            let prec_start = j;
            while j < chars.len() && chars[j].is_ascii_digit() {
                j += 1;
            }
            precision = chars[prec_start..j].iter().collect::<String>().parse().ok();
        }
        let Some(&conv) = chars.get(j) else {
            out.push('%');
            i += 1;
            continue;
        };
        let rendered = match conv {
            'f' | 'F' => render_float(value, precision.unwrap_or(6)),
            'e' => {
                if value.is_nan() {
                    "nan".to_string()
                } else {
                    format!("{:.*e}", precision.unwrap_or(6), value)
                }
            }
            'E' => {
                if value.is_nan() {
                    "nan".to_string()
                } else {
                    format!("{:.*E}", precision.unwrap_or(6), value)
                }
            }
            'g' | 'G' => render_general(value, precision.unwrap_or(6)),
            'd' | 'i' => {
                if value.is_nan() {
                    "nan".to_string()
                } else {
                    format!("{}", value.round() as i64)
                }
            }
            _ => {
                // Unknown conversion: emit verbatim.
                out.push('%');
                i += 1;
                continue;
            }
        };
        out.push_str(&pad(rendered, width, zero_pad, left_align));
        substituted = true;
        i = j + 1;
    }
    out
}

fn render_float(value: f64, precision: usize) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else {
        format!("{value:.precision$}")
    }
}

/// `%g`: significant-digit formatting with trailing zeros stripped.
fn render_general(value: f64, precision: usize) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }
    let precision = precision.max(1);
    let exponent = value.abs().log10().floor() as i32;
    if exponent < -4 || exponent >= precision as i32 {
        format!("{:.*e}", precision - 1, value)
    } else {
        let decimals = (precision as i32 - 1 - exponent).max(0) as usize;
        let text = format!("{value:.decimals$}");
        if text.contains('.') {
            text.trim_end_matches('0').trim_end_matches('.').to_string()
        } else {
            text
        }
    }
}

fn pad(text: String, width: usize, zero_pad: bool, left_align: bool) -> String {
    if text.len() >= width {
        return text;
    }
    let fill = width - text.len();
    if left_align {
        format!("{text}{}", " ".repeat(fill))
    } else if zero_pad {
        if let Some(rest) = text.strip_prefix('-') {
            format!("-{}{rest}", "0".repeat(fill))
        } else {
            format!("{}{text}", "0".repeat(fill))
        }
    } else {
        format!("{}{text}", " ".repeat(fill))
    }
}
