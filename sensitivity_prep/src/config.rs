//! Pipeline configuration.
//!
//! Everything an operator may want to re-tune without touching code lives
//! here: input locations, column names, the missingness cutoff and the
//! imputer hyper-parameters. The file is optional; missing keys fall back to
//! the defaults below.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

pub const CONFIG_FILE_NAME: &str = "sensitivity_prep.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputPaths {
    pub screen_path: String,
    pub cell_line_path: String,
    pub compound_path: String,
    pub depmap_annotation_path: String,
    pub mutation_path: String,
    pub target_list_path: String,
}

impl Default for InputPaths {
    fn default() -> Self {
        Self {
            screen_path: "data/ctrp/v20.data.per_cpd_post_qc.txt".to_string(),
            cell_line_path: "data/ctrp/v20.meta.per_cell_line.txt".to_string(),
            compound_path: "data/ctrp/v20.meta.per_compound.txt".to_string(),
            depmap_annotation_path: "data/depmap/sample_info.txt".to_string(),
            mutation_path: "data/depmap/CCLE_mutations.csv".to_string(),
            target_list_path: "data/kinobeads/target_list.csv".to_string(),
        }
    }
}

/// Raw column names of the input tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnNames {
    pub cell_line_id: String,
    pub cell_line_name: String,
    pub compound_id: String,
    pub compound_name: String,
    pub viability: String,
    pub depmap_id: String,
    pub depmap_cell_line_name: String,
    pub target_drug: String,
    pub target_name: String,
    pub target_affinity: String,
    pub target_confidence: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            cell_line_id: "master_ccl_id".to_string(),
            cell_line_name: "ccl_name".to_string(),
            compound_id: "master_cpd_id".to_string(),
            compound_name: "cpd_name".to_string(),
            viability: "cpd_avg_pv".to_string(),
            depmap_id: "DepMap_ID".to_string(),
            depmap_cell_line_name: "stripped_cell_line_name".to_string(),
            target_drug: "Drug".to_string(),
            target_name: "Gene Name".to_string(),
            target_affinity: "Apparent Kd".to_string(),
            target_confidence: "Target Classification".to_string(),
        }
    }
}

/// How raw affinity values are mapped before decorrelation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AffinityTransform {
    /// Kd in nM → pKd = 9 − log10(Kd).
    NegLog10Molar,
    Identity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImputerConfig {
    pub n_trees: usize,
    pub max_depth: Option<usize>,
    pub min_samples_leaf: usize,
    pub max_features: Option<usize>,
    pub max_iter: usize,
    pub seed: u64,
}

impl Default for ImputerConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: None,
            min_samples_leaf: 1,
            max_features: None,
            max_iter: 10,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub inputs: InputPaths,
    pub columns: ColumnNames,
    pub output_dir: String,
    /// Cell lines with more missing drug responses than this are dropped.
    pub missingness_cutoff: usize,
    /// Upper end of the diagnostic curve; `None` means the number of drugs.
    pub missingness_max_threshold: Option<usize>,
    pub affinity_transform: AffinityTransform,
    pub decorrelation_threshold: f64,
    /// Replaces the built-in synonym table when set.
    pub synonym_table_path: Option<String>,
    pub imputer: ImputerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            inputs: InputPaths::default(),
            columns: ColumnNames::default(),
            output_dir: "results".to_string(),
            missingness_cutoff: 15,
            missingness_max_threshold: None,
            affinity_transform: AffinityTransform::NegLog10Molar,
            decorrelation_threshold: 0.95,
            synonym_table_path: None,
            imputer: ImputerConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Reads `sensitivity_prep.json` from `project_root`, or returns the defaults.
    pub fn load(project_root: &Path) -> Result<Self> {
        let path = project_root.join(CONFIG_FILE_NAME);
        if !path.exists() {
            info!("No {} in {}, using defaults", CONFIG_FILE_NAME, project_root.display());
            return Ok(Self::default());
        }
        Self::from_file(&path)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg: PipelineConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        info!("Loaded configuration from {}", path.display());
        Ok(cfg)
    }

    /// Resolves a configured path against the project root unless it is absolute.
    pub fn resolve(&self, project_root: &Path, relative: &str) -> PathBuf {
        let p = Path::new(relative);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            project_root.join(p)
        }
    }

    pub fn write_effective(&self, output_dir: &Path) -> Result<()> {
        fs::create_dir_all(output_dir)
            .with_context(|| format!("creating {}", output_dir.display()))?;
        let path = output_dir.join("effective_config.json");
        let json = serde_json::to_string_pretty(self)?;
        info!("Effective configuration:\n{}", json);
        fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}
