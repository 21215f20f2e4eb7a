//! ASCII PCD reader for ground-truth map seeding.
//!
//! Only `DATA ascii` files are supported. The `x`, `y` and `z` columns are
//! located through the `FIELDS` / `COUNT` header lines, so extra fields such
//! as `intensity` or `rgb` are skipped. Rows with non-finite coordinates are
//! dropped; a file left with no points is an error.

use std::path::Path;

use nalgebra::Point3;
use strider_types::StriderError;
use tracing::{debug, warn};

/// Read the points of an ASCII PCD file.
pub fn read_pcd(path: &Path) -> Result<Vec<Point3<f64>>, StriderError> {
    let to_error = |details: String| StriderError::PointCloudFile {
        path: path.display().to_string(),
        details,
    };
    let text = std::fs::read_to_string(path).map_err(|e| to_error(e.to_string()))?;
    let points = parse_pcd(&text).map_err(to_error)?;
    debug!(path = %path.display(), points = points.len(), "pcd loaded");
    Ok(points)
}

/// Parse the text of an ASCII PCD file.
pub fn parse_pcd(text: &str) -> Result<Vec<Point3<f64>>, String> {
    let mut fields: Vec<String> = Vec::new();
    let mut counts: Vec<usize> = Vec::new();
    let mut declared_points: Option<usize> = None;
    let mut lines = text.lines().enumerate();

    loop {
        let Some((_, line)) = lines.next() else {
            return Err("missing DATA line".to_string());
        };
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let keyword = parts.next().unwrap_or_default().to_ascii_uppercase();
        let rest: Vec<&str> = parts.collect();
        match keyword.as_str() {
            "FIELDS" => fields = rest.iter().map(|f| f.to_string()).collect(),
            "COUNT" => {
                counts = rest
                    .iter()
                    .map(|c| c.parse::<usize>().map_err(|e| format!("bad COUNT {c:?}: {e}")))
                    .collect::<Result<_, _>>()?;
            }
            "POINTS" => {
                let n = rest.first().ok_or("POINTS without value")?;
                declared_points = Some(n.parse().map_err(|e| format!("bad POINTS {n:?}: {e}"))?);
            }
            "DATA" => {
                let format = rest.first().copied().unwrap_or_default();
                if !format.eq_ignore_ascii_case("ascii") {
                    return Err(format!("unsupported DATA format {format:?}, only ascii is read"));
                }
                break;
            }
            _ => {}
        }
    }

    if counts.is_empty() {
        counts = vec![1; fields.len()];
    }
    if counts.len() != fields.len() {
        return Err(format!(
            "{} FIELDS but {} COUNT entries",
            fields.len(),
            counts.len()
        ));
    }
    let column = |name: &str| -> Result<usize, String> {
        let position = fields
            .iter()
            .position(|f| f == name)
            .ok_or_else(|| format!("FIELDS has no {name:?} column"))?;
        Ok(counts[..position].iter().sum())
    };
    let (cx, cy, cz) = (column("x")?, column("y")?, column("z")?);
    let width: usize = counts.iter().sum();

    let mut points = Vec::with_capacity(declared_points.unwrap_or(0));
    for (index, line) in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let values: Vec<&str> = line.split_whitespace().collect();
        if values.len() < width {
            return Err(format!(
                "line {}: expected {width} values, found {}",
                index + 1,
                values.len()
            ));
        }
        let parse = |i: usize| -> Result<f64, String> {
            values[i]
                .parse::<f64>()
                .map_err(|e| format!("line {}: {:?}: {e}", index + 1, values[i]))
        };
        let p = Point3::new(parse(cx)?, parse(cy)?, parse(cz)?);
        if p.coords.iter().all(|v| v.is_finite()) {
            points.push(p);
        }
    }

    if points.is_empty() {
        return Err("file contains no points".to_string());
    }
    if let Some(n) = declared_points {
        if n != points.len() {
            warn!(declared = n, read = points.len(), "pcd point count differs from header");
        }
    }
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = "\
# .PCD v0.7 - Point Cloud Data file format
VERSION 0.7
FIELDS x y z intensity
SIZE 4 4 4 4
TYPE F F F F
COUNT 1 1 1 1
WIDTH 3
HEIGHT 1
VIEWPOINT 0 0 0 1 0 0 0
POINTS 3
DATA ascii
1.0 2.0 3.0 10
-1.5 0.0 0.25 20
nan nan nan 0
";

    #[test]
    fn parses_xyz_and_drops_nan_rows() {
        let points = parse_pcd(SAMPLE).unwrap();
        assert_eq!(points, vec![Point3::new(1.0, 2.0, 3.0), Point3::new(-1.5, 0.0, 0.25)]);
    }

    #[test]
    fn field_order_and_counts_are_respected() {
        let text = "FIELDS normal y x z\nCOUNT 3 1 1 1\nDATA ascii\n9 9 9 2 1 3\n";
        let points = parse_pcd(text).unwrap();
        assert_eq!(points, vec![Point3::new(1.0, 2.0, 3.0)]);
    }

    #[test]
    fn binary_data_is_rejected() {
        let err = parse_pcd("FIELDS x y z\nDATA binary\n").unwrap_err();
        assert!(err.contains("binary"));
    }

    #[test]
    fn missing_column_is_rejected() {
        let err = parse_pcd("FIELDS x y\nDATA ascii\n1 2\n").unwrap_err();
        assert!(err.contains("\"z\""));
    }

    #[test]
    fn short_row_is_rejected() {
        assert!(parse_pcd("FIELDS x y z\nDATA ascii\n1 2\n").is_err());
    }

    #[test]
    fn cloud_without_points_is_rejected() {
        let header_only = "FIELDS x y z\nPOINTS 0\nDATA ascii\n";
        assert!(parse_pcd(header_only).unwrap_err().contains("no points"));
        let all_nan = "FIELDS x y z\nDATA ascii\nnan 0 0\n";
        assert!(parse_pcd(all_nan).unwrap_err().contains("no points"));
    }

    #[test]
    fn read_pcd_from_file() -> Result<(), Box<dyn std::error::Error>> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(SAMPLE.as_bytes())?;
        let points = read_pcd(file.path())?;
        assert_eq!(points.len(), 2);
        Ok(())
    }

    #[test]
    fn missing_file_is_point_cloud_file_error() {
        let result = read_pcd(Path::new("/nonexistent/strider/map.pcd"));
        assert!(matches!(result, Err(StriderError::PointCloudFile { .. })));
    }
}
