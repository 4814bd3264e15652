use std::error::Error;
use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::bail;
use log::info;

use crate::tree::{from_typed_newick, TypedTree};
use crate::Result;

pub(crate) struct DataError {
    pub(crate) message: String,
}
impl fmt::Debug for DataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}
impl fmt::Display for DataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}
impl Error for DataError {}

/// Reads typed trees from a newick file, see [`from_typed_newick`] for the format.
/// Bails if the file cannot be read, is malformed or holds no tree.
pub fn read_typed_newick(path: &Path) -> Result<Vec<TypedTree>> {
    info!("Reading typed newick trees from file {}", path.display());
    let newick = fs::read_to_string(path)?;
    info!("Read file successfully");
    if newick.trim().is_empty() {
        bail!(DataError {
            message: format!("No trees found in file {}", path.display())
        });
    }
    from_typed_newick(&newick)
}
