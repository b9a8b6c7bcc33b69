// src/config.rs

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

static STATEMENTS_URL: &str = "https://dadosabertos.ans.gov.br/FTP/PDA/demonstracoes_contabeis/";
static REGISTRY_URL: &str =
    "https://dadosabertos.ans.gov.br/FTP/PDA/operadoras_de_plano_de_saude_ativas/";

/// Everything the pipeline needs, passed explicitly into each stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    pub sources: SourcesConfig,
    pub input: InputConfig,
    pub expense_keywords: Vec<String>,
    pub tax_id: TaxIdConfig,
    pub output: OutputConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            sources: SourcesConfig::default(),
            input: InputConfig::default(),
            expense_keywords: vec!["EVENTO".into(), "SINISTRO".into(), "DESPESA".into()],
            tax_id: TaxIdConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from a YAML file; absent keys fall back to the defaults.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text =
            fs::read_to_string(path).with_context(|| format!("reading config {:?}", path))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing config {:?}", path))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let cfg: Self = serde_yaml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the readers cannot honour.
    pub fn validate(&self) -> Result<()> {
        if !self.input.delimiter.is_ascii() {
            bail!(
                "input.delimiter must be a single ASCII character, got {:?}",
                self.input.delimiter
            );
        }
        Ok(())
    }

    /// `path` when given, otherwise the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_yaml_file(p),
            None => Ok(Self::default()),
        }
    }

    pub fn consolidated_path(&self) -> PathBuf {
        self.paths.processed_dir.join(&self.output.consolidated_file)
    }

    pub fn consolidated_zip_path(&self) -> PathBuf {
        self.paths.processed_dir.join(&self.output.consolidated_zip)
    }

    pub fn final_path(&self) -> PathBuf {
        self.paths.processed_dir.join(&self.output.final_file)
    }

    pub fn aggregated_path(&self) -> PathBuf {
        self.paths.processed_dir.join(&self.output.aggregated_file)
    }

    pub fn summary_path(&self) -> PathBuf {
        self.paths.processed_dir.join(&self.output.summary_file)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    pub raw_dir: PathBuf,
    pub processed_dir: PathBuf,
    /// Local copy of the operator registry; fetched when absent.
    pub registry_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from("data/raw"),
            processed_dir: PathBuf::from("data/processed"),
            registry_file: PathBuf::from("data/raw/cadastro_operadoras.csv"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourcesConfig {
    pub statements_url: String,
    pub registry_url: String,
    /// Substring identifying the registry file among the listing's links.
    pub registry_link_marker: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub latest_quarters: usize,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            statements_url: STATEMENTS_URL.into(),
            registry_url: REGISTRY_URL.into(),
            registry_link_marker: "Relatorio_Cadop".into(),
            user_agent: "Mozilla/5.0 (compatible; ansrecon/0.1)".into(),
            timeout_secs: 10,
            latest_quarters: 3,
        }
    }
}

impl SourcesConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Text encoding of the delimited files inside the archives.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TextEncoding {
    Latin1,
    Utf8,
}

impl TextEncoding {
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            // ISO-8859-1 maps every byte onto the code point of the same value
            TextEncoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
            TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InputConfig {
    pub delimiter: char,
    pub encoding: TextEncoding,
    /// Extensions (without dot) treated as delimited text, compared case-insensitively.
    pub tabular_extensions: Vec<String>,
    /// Entry path prefixes ignored inside archives.
    pub reserved_prefixes: Vec<String>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            delimiter: ';',
            encoding: TextEncoding::Latin1,
            tabular_extensions: vec!["csv".into(), "txt".into()],
            reserved_prefixes: vec!["__MACOSX/".into()],
        }
    }
}

impl InputConfig {
    pub fn delimiter_byte(&self) -> u8 {
        u8::try_from(u32::from(self.delimiter)).unwrap_or(b';')
    }
}

/// Weight vectors for the two CNPJ check digits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TaxIdConfig {
    pub first_weights: Vec<u32>,
    pub second_weights: Vec<u32>,
}

impl Default for TaxIdConfig {
    fn default() -> Self {
        Self {
            first_weights: vec![5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2],
            second_weights: vec![6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub consolidated_file: String,
    pub consolidated_zip: String,
    pub zip_consolidated: bool,
    pub final_file: String,
    pub aggregated_file: String,
    pub summary_file: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            consolidated_file: "consolidado.csv".into(),
            consolidated_zip: "consolidado_despesas.zip".into(),
            zip_consolidated: true,
            final_file: "consolidado_despesas_final.csv".into(),
            aggregated_file: "despesas_agregadas.csv".into(),
            summary_file: "run_summary.json".into(),
        }
    }
}
