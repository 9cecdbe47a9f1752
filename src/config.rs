use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::LoadError;
use crate::loader::{CollectionName, CollectionSource, CsvFileSource, HttpSource, JsonFileSource, Sources};

pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Where each collection is read from. Built by the binary from its command line.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub api_url: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub attendance_csv: Option<PathBuf>,
    pub timeout: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            data_dir: None,
            attendance_csv: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl SourceConfig {
    /// `api_url` takes precedence over `data_dir`. Collections with neither stay unconfigured and
    /// load as `NotConfigured`.
    pub fn build_sources(&self) -> Result<Sources, LoadError> {
        let mut sources: Sources = BTreeMap::new();

        if let Some(api_url) = &self.api_url {
            let http = HttpSource::client(self.timeout)?;
            for name in CollectionName::ALL {
                let source = HttpSource::new(http.clone(), api_url, &name.default_path());
                sources.insert(name, Box::new(source));
            }
        } else if let Some(dir) = &self.data_dir {
            for name in CollectionName::ALL {
                let path = dir.join(format!("{}.json", name.as_str()));
                sources.insert(name, Box::new(JsonFileSource::new(path)));
            }
        }

        if let Some(csv) = &self.attendance_csv {
            let source: Box<dyn CollectionSource> = Box::new(CsvFileSource::new(csv));
            sources.insert(CollectionName::Attendance, source);
        }

        for (name, source) in &sources {
            tracing::debug!(collection = %name, origin = %source.describe(), "source configured");
        }

        Ok(sources)
    }
}
