//! Drug name harmonization between the kinobead target list and the
//! viability screen.
//!
//! Screen-side compound names are reduced to a matching token (lower case,
//! hyphens and spaces removed). Target-side names are matched as they are,
//! after a single pass through a curated [`SynonymTable`]. The drugs present
//! on both sides after that pass are the only drugs any later stage sees.
//! There is no fuzzy fallback.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::helper_functions::keep_first_occurrence;
use crate::models::{polars_err, DRUG_COL};

/// Version tag of the built-in override table. Bump whenever an entry changes.
pub const BUILTIN_SYNONYM_VERSION: &str = "kinobeads-ctrp-v1";

/// Lower-cases `name` and deletes every `-` and ` `; nothing else changes.
pub fn normalize_drug_token(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter(|c| *c != '-' && *c != ' ')
        .collect()
}

/// Hand-curated token → token overrides for names normalization cannot
/// reconcile (internal codes vs. published names, trade vs. generic names).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynonymTable {
    pub version: String,
    pub entries: BTreeMap<String, String>,
}

impl SynonymTable {
    pub fn builtin() -> Self {
        let entries = [("bms387032", "sns032")]
            .into_iter()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect();
        Self { version: BUILTIN_SYNONYM_VERSION.to_string(), entries }
    }

    /// Loads a replacement table, e.g. `{"version": "v2", "entries": {"bms387032": "sns032"}}`.
    pub fn from_json_file(path: &Path) -> PolarsResult<Self> {
        let raw = fs::read_to_string(path).map_err(|e| polars_err(Box::new(e)))?;
        let table: SynonymTable = serde_json::from_str(&raw).map_err(|e| polars_err(Box::new(e)))?;
        for (from, to) in &table.entries {
            if normalize_drug_token(to) != *to {
                warn!("Synonym target '{}' (from '{}') is not a normalized token and can never match", to, from);
            }
        }
        info!("Loaded synonym table {} ({} entries) from {}", table.version, table.entries.len(), path.display());
        Ok(table)
    }

    /// Looks `name` up once; overrides never chain.
    pub fn apply<'a>(&'a self, name: &'a str) -> &'a str {
        self.entries.get(name).map(String::as_str).unwrap_or(name)
    }
}

impl Default for SynonymTable {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Outcome of matching the two vocabularies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Harmonization {
    pub synonym_version: String,
    /// Exact matches before any override.
    pub initial: BTreeSet<String>,
    /// Authoritative drug set after overrides.
    pub final_drugs: BTreeSet<String>,
    /// Target-side names that were rewritten, as (original, replacement).
    pub overrides_applied: Vec<(String, String)>,
}

/// Pure set-level harmonization.
///
/// `affinity_names` are target-list drug names used verbatim,
/// `response_names` are screen-side canonical names and get normalized here.
pub fn harmonize_names<'a, A, R>(affinity_names: A, response_names: R, synonyms: &SynonymTable) -> Harmonization
where
    A: IntoIterator<Item = &'a str>,
    R: IntoIterator<Item = &'a str>,
{
    let affinity: BTreeSet<String> = affinity_names.into_iter().map(str::to_string).collect();
    let response: BTreeSet<String> = response_names.into_iter().map(normalize_drug_token).collect();

    let initial: BTreeSet<String> = affinity.intersection(&response).cloned().collect();

    let mut overrides_applied = Vec::new();
    let overridden: BTreeSet<String> = affinity
        .iter()
        .map(|name| {
            let replaced = synonyms.apply(name);
            if replaced != name {
                overrides_applied.push((name.clone(), replaced.to_string()));
            }
            replaced.to_string()
        })
        .collect();

    let final_drugs: BTreeSet<String> = overridden.intersection(&response).cloned().collect();

    Harmonization {
        synonym_version: synonyms.version.clone(),
        initial,
        final_drugs,
        overrides_applied,
    }
}

/// Adds the matching token as `drug` to the screen-side compound annotation.
///
/// Rows without a canonical name are dropped and only the first row of each
/// duplicated canonical name is kept.
pub fn tokenize_compounds(compounds: &DataFrame, name_col: &str) -> PolarsResult<DataFrame> {
    let named = compounds
        .clone()
        .lazy()
        .with_column(col(name_col).cast(DataType::String))
        .filter(col(name_col).is_not_null())
        .collect()?;
    let mut unique = keep_first_occurrence(&named, name_col)?;
    debug!(
        "Compound annotation: {} rows, {} named, {} unique names",
        compounds.height(),
        named.height(),
        unique.height()
    );

    let tokens: Vec<Option<String>> = unique
        .column(name_col)?
        .str()?
        .into_iter()
        .map(|name| name.map(normalize_drug_token))
        .collect();
    unique.with_column(Series::new(PlSmallStr::from(DRUG_COL), tokens))?;
    Ok(unique)
}

/// Rewrites the `drug` column of the target list through the synonym table.
pub fn apply_synonyms(targets: &DataFrame, synonyms: &SynonymTable) -> PolarsResult<DataFrame> {
    let renamed: Vec<Option<String>> = targets
        .column(DRUG_COL)?
        .str()?
        .into_iter()
        .map(|name| name.map(|n| synonyms.apply(n).to_string()))
        .collect();
    let mut out = targets.clone();
    out.with_column(Series::new(PlSmallStr::from(DRUG_COL), renamed))?;
    Ok(out)
}

pub struct HarmonizedTables {
    pub harmonization: Harmonization,
    /// Target list restricted to the final drug set, synonyms applied.
    pub targets: DataFrame,
    /// Tokenized compound annotation restricted to the final drug set.
    pub compounds: DataFrame,
}

/// Table-level harmonization: `targets` carries raw names in `drug`,
/// `compounds` must come from [`tokenize_compounds`].
pub fn harmonize(targets: &DataFrame, compounds: &DataFrame, synonyms: &SynonymTable) -> PolarsResult<HarmonizedTables> {
    let affinity_names = distinct_strings(targets, DRUG_COL)?;
    let response_tokens = distinct_strings(compounds, DRUG_COL)?;

    // Tokens are already normalized and normalization is idempotent.
    let harmonization = harmonize_names(
        affinity_names.iter().map(String::as_str),
        response_tokens.iter().map(String::as_str),
        synonyms,
    );

    info!(
        "Drug harmonization ({}): {} target-list drugs, {} screen drugs, {} exact matches, {} after {} override(s)",
        harmonization.synonym_version,
        affinity_names.len(),
        response_tokens.len(),
        harmonization.initial.len(),
        harmonization.final_drugs.len(),
        harmonization.overrides_applied.len()
    );
    for (from, to) in &harmonization.overrides_applied {
        debug!("Synonym override applied: {} -> {}", from, to);
    }

    let keep = DataFrame::new(vec![Series::new(
        PlSmallStr::from(DRUG_COL),
        harmonization.final_drugs.iter().cloned().collect::<Vec<String>>(),
    )
    .into()])?;

    let targets = apply_synonyms(targets, synonyms)?
        .lazy()
        .join(keep.clone().lazy(), [col(DRUG_COL)], [col(DRUG_COL)], JoinArgs::new(JoinType::Semi))
        .collect()?;
    let compounds = compounds
        .clone()
        .lazy()
        .join(keep.lazy(), [col(DRUG_COL)], [col(DRUG_COL)], JoinArgs::new(JoinType::Semi))
        .collect()?;

    Ok(HarmonizedTables { harmonization, targets, compounds })
}

fn distinct_strings(df: &DataFrame, name: &str) -> PolarsResult<BTreeSet<String>> {
    Ok(df
        .column(name)?
        .str()?
        .into_iter()
        .flatten()
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_drop_only_case_hyphens_and_spaces() {
        assert_eq!(normalize_drug_token("SNS-032"), "sns032");
        assert_eq!(normalize_drug_token("Bosutinib (SKI-606)"), "bosutinib(ski606)");
        assert_eq!(normalize_drug_token("PD 0325901"), "pd0325901");
        assert_eq!(normalize_drug_token("ki8751"), "ki8751");
    }

    #[test]
    fn code_name_override_reaches_the_final_set() {
        let h = harmonize_names(
            ["bms387032", "dasatinib", "nilotinib"],
            ["SNS-032", "Dasatinib", "erlotinib"],
            &SynonymTable::builtin(),
        );

        assert_eq!(h.initial, BTreeSet::from(["dasatinib".to_string()]));
        assert_eq!(
            h.final_drugs,
            BTreeSet::from(["dasatinib".to_string(), "sns032".to_string()])
        );
        assert_eq!(h.overrides_applied, vec![("bms387032".to_string(), "sns032".to_string())]);
        assert_eq!(h.synonym_version, BUILTIN_SYNONYM_VERSION);
    }

    #[test]
    fn harmonization_is_idempotent() {
        let affinity = ["bms387032", "dasatinib", "lapatinib", "AZD-7762"];
        let response = ["SNS-032", "Dasatinib", "LAPATINIB", "azd7762"];
        let synonyms = SynonymTable::builtin();

        let first = harmonize_names(affinity, response, &synonyms);
        let second = harmonize_names(affinity, response, &synonyms);
        assert_eq!(first, second);

        // Feeding the tokens back in gives the same answer.
        let tokens: Vec<String> = response.iter().map(|n| normalize_drug_token(n)).collect();
        let third = harmonize_names(affinity, tokens.iter().map(String::as_str), &synonyms);
        assert_eq!(first.final_drugs, third.final_drugs);
    }

    #[test]
    fn overrides_do_not_chain() {
        let synonyms = SynonymTable {
            version: "test".into(),
            entries: BTreeMap::from([
                ("a".to_string(), "b".to_string()),
                ("b".to_string(), "c".to_string()),
            ]),
        };
        assert_eq!(synonyms.apply("a"), "b");
        assert_eq!(synonyms.apply("b"), "c");

        let h = harmonize_names(["a"], ["c"], &synonyms);
        assert!(h.final_drugs.is_empty());
    }

    #[test]
    fn unmatched_names_are_silently_excluded() {
        let h = harmonize_names(["gleevec"], ["imatinib"], &SynonymTable::builtin());
        assert!(h.initial.is_empty());
        assert!(h.final_drugs.is_empty());
    }

    #[test]
    fn compounds_keep_first_named_occurrence() {
        let compounds = df![
            "master_cpd_id" => &[1i64, 2, 3, 4],
            "cpd_name" => &[Some("SNS-032"), None, Some("SNS-032"), Some("Dasatinib")]
        ]
        .unwrap();

        let out = tokenize_compounds(&compounds, "cpd_name").unwrap();
        assert_eq!(out.height(), 2);
        let ids: Vec<i64> = out.column("master_cpd_id").unwrap().i64().unwrap().into_no_null_iter().collect();
        assert_eq!(ids, vec![1, 4]);
        let tokens: Vec<&str> = out.column(DRUG_COL).unwrap().str().unwrap().into_no_null_iter().collect();
        assert_eq!(tokens, vec!["sns032", "dasatinib"]);
    }

    #[test]
    fn tables_are_restricted_to_the_final_set() {
        let targets = df![
            DRUG_COL => &["bms387032", "bms387032", "dasatinib", "gefitinib"],
            "target" => &["CDK9", "CDK2", "ABL1", "EGFR"]
        ]
        .unwrap();
        let compounds = tokenize_compounds(
            &df![
                "master_cpd_id" => &[10i64, 11, 12],
                "cpd_name" => &["SNS-032", "dasatinib", "vorinostat"]
            ]
            .unwrap(),
            "cpd_name",
        )
        .unwrap();

        let out = harmonize(&targets, &compounds, &SynonymTable::builtin()).unwrap();

        assert_eq!(out.harmonization.final_drugs.len(), 2);
        assert_eq!(out.targets.height(), 3);
        let mut drugs: Vec<&str> = out.targets.column(DRUG_COL).unwrap().str().unwrap().into_no_null_iter().collect();
        drugs.sort();
        assert_eq!(drugs, vec!["dasatinib", "sns032", "sns032"]);
        assert_eq!(out.compounds.height(), 2);
    }

    #[test]
    fn synonym_file_replaces_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("synonyms.json");
        fs::write(&path, r#"{"version": "v2", "entries": {"bms387032": "sns032", "sti571": "imatinib"}}"#).unwrap();

        let table = SynonymTable::from_json_file(&path).unwrap();
        assert_eq!(table.version, "v2");
        assert_eq!(table.entries.len(), 2);
        assert_eq!(table.apply("sti571"), "imatinib");
    }
}
