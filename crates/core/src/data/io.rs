use std::path::Path;

use crate::error::{PccaError, Result};
use crate::types::DenseMatrix;

/// Read a headered CSV file into a dense matrix.
///
/// The first row is treated as a header and discarded; every remaining
/// field must parse as `f64`. Rows become matrix rows (trials), columns
/// become features.
///
/// # Errors
/// Returns an error if the file cannot be opened, the CSV is malformed,
/// rows have inconsistent field counts, or any field is non-numeric.
pub fn read_matrix_csv<P: AsRef<Path>>(path: P) -> Result<DenseMatrix> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .trim(csv::Trim::All)
        .from_path(path.as_ref())?;

    let ncols = reader.headers()?.len();
    if ncols == 0 {
        return Err(PccaError::Data("CSV file has no columns".into()));
    }

    let mut values: Vec<f64> = Vec::new();
    let mut nrows = 0usize;
    for result in reader.records() {
        let record = result?;
        if record.len() != ncols {
            return Err(PccaError::Data(format!(
                "Row {} has {} fields but header has {} columns",
                nrows + 1,
                record.len(),
                ncols
            )));
        }
        for field in record.iter() {
            let v: f64 = field.parse().map_err(|_| {
                PccaError::Data(format!(
                    "value '{}' in row {} is not numeric",
                    field,
                    nrows + 1
                ))
            })?;
            values.push(v);
        }
        nrows += 1;
    }

    if nrows == 0 {
        return Err(PccaError::Data("CSV file has no data rows".into()));
    }

    Ok(DenseMatrix::from_row_slice(nrows, ncols, &values))
}

/// Write a dense matrix to a headered CSV file. Column names are
/// `{column_prefix}1 .. {column_prefix}N`.
pub fn write_matrix_csv<P: AsRef<Path>>(
    path: P,
    m: &DenseMatrix,
    column_prefix: &str,
) -> Result<()> {
    let mut writer = csv::Writer::from_path(path.as_ref())?;

    let header: Vec<String> = (1..=m.ncols())
        .map(|j| format!("{column_prefix}{j}"))
        .collect();
    writer.write_record(&header)?;

    for i in 0..m.nrows() {
        let row: Vec<String> = (0..m.ncols()).map(|j| m[(i, j)].to_string()).collect();
        writer.write_record(&row)?;
    }

    writer.flush()?;
    Ok(())
}
