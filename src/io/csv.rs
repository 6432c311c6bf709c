/*!
# CSV export of sampler output

Enable via the `csv` feature (on by default).
*/

use csv::Writer;
use ndarray::{Array2, Array3, Axis};
use std::fs::File;
use std::path::Path;

use crate::errors::{CosmoError, Result};

fn check_names(names: &[&str], n_dims: usize) -> Result<()> {
    if names.len() != n_dims {
        return Err(CosmoError::InvalidInput(format!(
            "{} column names for {n_dims} dimensions",
            names.len()
        )));
    }
    Ok(())
}

/**
Saves a raw chain (walker × step × dimension) as CSV.

The header row is `walker,step` followed by `names`; every following row is one
step of one walker.

```rust
use cosmo_mcmc::io::csv::save_chain_csv;
use ndarray::arr3;

let chain = arr3(&[[[70.1, -2.3], [70.2, -2.2]]]);
let file = tempfile::NamedTempFile::new().unwrap();
save_chain_csv(&chain, &["H0", "lnsig"], file.path()).unwrap();
```
*/
pub fn save_chain_csv<P: AsRef<Path>>(chain: &Array3<f64>, names: &[&str], path: P) -> Result<()> {
    check_names(names, chain.len_of(Axis(2)))?;
    let mut wtr = Writer::from_writer(File::create(path)?);

    let mut header: Vec<String> = vec!["walker".to_string(), "step".to_string()];
    header.extend(names.iter().map(|n| n.to_string()));
    wtr.write_record(&header)?;

    for (walker_idx, walker) in chain.axis_iter(Axis(0)).enumerate() {
        for (step_idx, step) in walker.axis_iter(Axis(0)).enumerate() {
            let mut row = vec![walker_idx.to_string(), step_idx.to_string()];
            row.extend(step.iter().map(|v| v.to_string()));
            wtr.write_record(&row)?;
        }
    }

    wtr.flush()?;
    Ok(())
}

/// Saves flattened samples (draw × dimension) with `names` as the header row.
pub fn save_samples_csv<P: AsRef<Path>>(
    samples: &Array2<f64>,
    names: &[&str],
    path: P,
) -> Result<()> {
    check_names(names, samples.ncols())?;
    let mut wtr = Writer::from_writer(File::create(path)?);
    wtr.write_record(names)?;
    for row in samples.outer_iter() {
        wtr.write_record(row.iter().map(|v| v.to_string()))?;
    }
    wtr.flush()?;
    Ok(())
}
