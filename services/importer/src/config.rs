//! Import configuration.
//!
//! Loaded from a JSON document; every field is optional and falls back to
//! the layout of the public extracts (see [`ImportConfig::default`]).
//!
//! ```json
//! {
//!   "facilities":   { "path": "Estabelecimentos.csv", "delimiter": ";" },
//!   "assignments":  { "path": "EstabelecimentoProfissionais.csv" },
//!   "demographics": { "encoding": "latin1", "null_markers": ["..."] },
//!   "facility_code_width": 7,
//!   "municipality_code_width": 6,
//!   "physician_codes": ["225125"],
//!   "nurse_codes": ["223505"]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use encoding_rs::Encoding;
use serde::Deserialize;

use crate::error::EtlError;
use crate::professionals::OccupationLists;
use crate::reader::{CsvSource, SourceFormat};

pub const DEFAULT_FACILITY_CODE_WIDTH: usize = 7;
pub const DEFAULT_MUNICIPALITY_CODE_WIDTH: usize = 6;

/// Where one extract lives and how to decode it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFileConfig {
    pub path: PathBuf,
    pub delimiter: char,
    /// WHATWG encoding label (`utf-8`, `latin1`, `windows-1252`, ...).
    pub encoding: String,
    pub null_markers: Vec<String>,
    /// Logical column name -> source header, overriding the stage defaults.
    pub headers: BTreeMap<String, String>,
}

impl SourceFileConfig {
    fn new(path: &str, delimiter: char, encoding: &str, null_markers: &[&str]) -> Self {
        Self {
            path: PathBuf::from(path),
            delimiter,
            encoding: encoding.to_string(),
            null_markers: null_markers.iter().map(|m| m.to_string()).collect(),
            headers: BTreeMap::new(),
        }
    }

    pub fn format(&self) -> Result<SourceFormat, EtlError> {
        if !self.delimiter.is_ascii() {
            return Err(EtlError::Config(format!(
                "delimiter '{}' for {} must be a single ASCII character",
                self.delimiter,
                self.path.display()
            )));
        }
        let encoding = Encoding::for_label(self.encoding.trim().as_bytes()).ok_or_else(|| {
            EtlError::Config(format!(
                "unknown encoding '{}' for {}",
                self.encoding,
                self.path.display()
            ))
        })?;

        Ok(SourceFormat {
            delimiter: self.delimiter as u8,
            encoding,
            null_markers: self.null_markers.clone(),
        })
    }

    pub fn source(&self) -> Result<CsvSource, EtlError> {
        Ok(CsvSource::new(self.path.clone(), self.format()?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportConfig {
    pub facilities: SourceFileConfig,
    pub assignments: SourceFileConfig,
    pub demographics: SourceFileConfig,
    pub facility_code_width: usize,
    pub municipality_code_width: usize,
    pub occupations: OccupationLists,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            facilities: SourceFileConfig::new("Estabelecimentos.csv", ';', "utf-8", &[]),
            assignments: SourceFileConfig::new("EstabelecimentoProfissionais.csv", ',', "utf-8", &[]),
            demographics: SourceFileConfig::new(
                "Agregados_por_municipios_demografia_BR.csv",
                ';',
                "latin1",
                &["..."],
            ),
            facility_code_width: DEFAULT_FACILITY_CODE_WIDTH,
            municipality_code_width: DEFAULT_MUNICIPALITY_CODE_WIDTH,
            occupations: OccupationLists::default(),
        }
    }
}

impl ImportConfig {
    pub fn from_json(text: &str) -> Result<Self, EtlError> {
        let file: ConfigFile = serde_json::from_str(text)
            .map_err(|e| EtlError::Config(format!("parsing import config: {e}")))?;
        let config = file.resolve(Self::default());
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, EtlError> {
        let text = std::fs::read_to_string(path).map_err(|source| EtlError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Resolve relative source paths against `data_dir`.
    pub fn with_data_dir(mut self, data_dir: &Path) -> Self {
        for source in [
            &mut self.facilities,
            &mut self.assignments,
            &mut self.demographics,
        ] {
            if source.path.is_relative() {
                source.path = data_dir.join(&source.path);
            }
        }
        self
    }

    pub fn validate(&self) -> Result<(), EtlError> {
        if self.facility_code_width == 0 {
            return Err(EtlError::Config("facility_code_width must be positive".into()));
        }
        if self.municipality_code_width == 0 {
            return Err(EtlError::Config(
                "municipality_code_width must be positive".into(),
            ));
        }
        for source in [&self.facilities, &self.assignments, &self.demographics] {
            source.format()?;
        }
        Ok(())
    }
}

// =============================================================================
// JSON document
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SourceFileSection {
    path: Option<PathBuf>,
    delimiter: Option<char>,
    encoding: Option<String>,
    null_markers: Option<Vec<String>>,
    headers: BTreeMap<String, String>,
}

impl SourceFileSection {
    fn apply(self, mut base: SourceFileConfig) -> SourceFileConfig {
        if let Some(path) = self.path {
            base.path = path;
        }
        if let Some(delimiter) = self.delimiter {
            base.delimiter = delimiter;
        }
        if let Some(encoding) = self.encoding {
            base.encoding = encoding;
        }
        if let Some(null_markers) = self.null_markers {
            base.null_markers = null_markers;
        }
        base.headers.extend(self.headers);
        base
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    facilities: SourceFileSection,
    assignments: SourceFileSection,
    demographics: SourceFileSection,
    facility_code_width: Option<usize>,
    municipality_code_width: Option<usize>,
    physician_codes: Option<Vec<String>>,
    nurse_codes: Option<Vec<String>>,
}

impl ConfigFile {
    fn resolve(self, base: ImportConfig) -> ImportConfig {
        let occupations = match (self.physician_codes, self.nurse_codes) {
            (None, None) => base.occupations,
            (physicians, nurses) => OccupationLists::new(
                physicians.unwrap_or_else(|| base.occupations.physician_codes().to_vec()),
                nurses.unwrap_or_else(|| base.occupations.nurse_codes().to_vec()),
            ),
        };

        ImportConfig {
            facilities: self.facilities.apply(base.facilities),
            assignments: self.assignments.apply(base.assignments),
            demographics: self.demographics.apply(base.demographics),
            facility_code_width: self.facility_code_width.unwrap_or(base.facility_code_width),
            municipality_code_width: self
                .municipality_code_width
                .unwrap_or(base.municipality_code_width),
            occupations,
        }
    }
}
