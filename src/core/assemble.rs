use std::path::Path;

use crate::{
    error::{Result, StemError},
    types::ResultEntry,
};

/// Turns written files into entries addressable under the public file prefix.
#[derive(Clone, Debug)]
pub struct ResultAssembler {
    public_prefix: String,
}

impl ResultAssembler {
    pub fn new(public_prefix: &str) -> Self {
        Self {
            public_prefix: public_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn public_prefix(&self) -> &str {
        &self.public_prefix
    }

    /// `<prefix>/<request_id>/<base name>`
    pub fn url_for(&self, request_id: &str, path: &Path) -> Result<String> {
        let base = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                StemError::Anyhow(anyhow::anyhow!(
                    "output path has no file name: {}",
                    path.display()
                ))
            })?;
        Ok(format!("{}/{request_id}/{base}", self.public_prefix))
    }

    pub fn assemble<P: AsRef<Path>>(
        &self,
        request_id: &str,
        written: &[(String, P)],
    ) -> Result<Vec<ResultEntry>> {
        written
            .iter()
            .map(|(name, path)| {
                let path = path.as_ref();
                Ok(ResultEntry {
                    name: name.clone(),
                    path: path.to_string_lossy().into_owned(),
                    url: self.url_for(request_id, path)?,
                })
            })
            .collect()
    }
}
