//! Stage-by-stage orchestration.
//!
//! `process` is pure over in-memory tables; `run` adds the file loading and
//! writing around it.

use std::path::Path;

use polars::prelude::*;
use tracing::{info, warn};

use crate::affinity_matrix::{build_affinity_matrix, AffinityMetadata, AffinityProcessor, TransformAndDecorrelate};
use crate::config::PipelineConfig;
use crate::data_handling::annotation::AnnotationTable;
use crate::data_handling::mutations::MutationDataset;
use crate::data_handling::screen::ScreenDataset;
use crate::data_handling::target_list::TargetListDataset;
use crate::harmonizer::{harmonize, tokenize_compounds, Harmonization, SynonymTable};
use crate::helper_functions::dataframe_to_csv;
use crate::identifier_resolver::{resolve_identifiers, resolve_mutations};
use crate::imputer::{Imputer, RandomForestImputer};
use crate::matrix::LabeledMatrix;
use crate::missingness::{apply_cutoff, missingness_curve, report_curve, CutoffOutcome, MissingnessCurve};
use crate::models::{Dataset, CELL_LINE_COL};
use crate::normalizer::standardize_columns;
use crate::response_matrix::{align_rows, build_response_matrix};
use crate::serializer::{write_outputs, MissingnessSummary, PipelineOutputs};

const COMPOUND_NAME_COL: &str = "compound_name";

/// The loaded input tables, untouched.
pub struct RawTables {
    pub screen: DataFrame,
    pub cell_lines: DataFrame,
    pub compounds: DataFrame,
    pub depmap_annotation: DataFrame,
    pub mutations: DataFrame,
    pub targets: DataFrame,
}

impl RawTables {
    pub fn load(config: &PipelineConfig, project_root: &Path) -> PolarsResult<Self> {
        let c = &config.columns;
        let p = &config.inputs;

        let screen = ScreenDataset {
            path: config.resolve(project_root, &p.screen_path),
            cell_line_id_col: c.cell_line_id.clone(),
            compound_id_col: c.compound_id.clone(),
            value_col: c.viability.clone(),
        }
        .load()?;
        let cell_lines = AnnotationTable {
            label: "cell line",
            path: config.resolve(project_root, &p.cell_line_path),
            separator: b'\t',
            id_col: c.cell_line_id.clone(),
            name_col: c.cell_line_name.clone(),
        }
        .load()?;
        let compounds = AnnotationTable {
            label: "compound",
            path: config.resolve(project_root, &p.compound_path),
            separator: b'\t',
            id_col: c.compound_id.clone(),
            name_col: c.compound_name.clone(),
        }
        .load()?;
        let depmap_annotation = AnnotationTable {
            label: "DepMap sample",
            path: config.resolve(project_root, &p.depmap_annotation_path),
            separator: b'\t',
            id_col: c.depmap_id.clone(),
            name_col: c.depmap_cell_line_name.clone(),
        }
        .load()?;
        let mutations = MutationDataset {
            path: config.resolve(project_root, &p.mutation_path),
            depmap_id_col: c.depmap_id.clone(),
        }
        .load()?;
        let targets = TargetListDataset {
            path: config.resolve(project_root, &p.target_list_path),
            drug_col: c.target_drug.clone(),
            target_col: c.target_name.clone(),
            affinity_col: c.target_affinity.clone(),
            confidence_col: c.target_confidence.clone(),
        }
        .load()?;

        Ok(Self { screen, cell_lines, compounds, depmap_annotation, mutations, targets })
    }
}

/// Everything the pipeline derives, stage by stage.
pub struct Processed {
    pub harmonization: Harmonization,
    pub affinity: LabeledMatrix,
    pub affinity_metadata: AffinityMetadata,
    /// Aligned response matrix before the missingness cutoff.
    pub response_raw: LabeledMatrix,
    pub curve: MissingnessCurve,
    pub cutoff: CutoffOutcome,
    /// Imputed and standardized response matrix.
    pub response: LabeledMatrix,
    /// Mutation calls for the cell lines that survived the cutoff.
    pub mutations: DataFrame,
}

pub fn process(tables: &RawTables, config: &PipelineConfig, synonyms: &SynonymTable) -> PolarsResult<Processed> {
    let c = &config.columns;

    // ─── identifier resolution ───────────────────────────────────────────
    let screen = resolve_identifiers(
        &tables.screen,
        &tables.cell_lines,
        &c.cell_line_id,
        &c.cell_line_id,
        &c.cell_line_name,
        CELL_LINE_COL,
    )?;
    let screen = resolve_identifiers(
        &screen.frame,
        &tables.compounds,
        &c.compound_id,
        &c.compound_id,
        &c.compound_name,
        COMPOUND_NAME_COL,
    )?;
    if screen.dropped_rows() > 0 {
        warn!("{} resolved screen rows have no compound name", screen.dropped_rows());
    }
    let mutations = resolve_mutations(
        &tables.mutations,
        &tables.depmap_annotation,
        &tables.cell_lines,
        &c.depmap_id,
        &c.depmap_cell_line_name,
        &c.cell_line_name,
        CELL_LINE_COL,
    )?;

    // ─── drug name harmonization ─────────────────────────────────────────
    let compounds = tokenize_compounds(&tables.compounds, &c.compound_name)?;
    let harmonized = harmonize(&tables.targets, &compounds, synonyms)?;
    if harmonized.harmonization.final_drugs.is_empty() {
        return Err(PolarsError::ComputeError(
            "no drug is shared between the target list and the screen".into(),
        ));
    }

    // ─── matrices ────────────────────────────────────────────────────────
    let (affinity_raw, n_high) = build_affinity_matrix(&harmonized.targets)?;
    let processor = TransformAndDecorrelate {
        transform: config.affinity_transform,
        threshold: config.decorrelation_threshold,
    };
    let (affinity, affinity_metadata) = processor.process(&affinity_raw, n_high)?;

    let response = build_response_matrix(&screen.frame, &harmonized.compounds, &c.compound_id, &c.viability)?;
    let (affinity, response_raw) = align_rows(&affinity, &response)?;
    if response_raw.nrows() == 0 {
        return Err(PolarsError::ComputeError(
            "no drug has both high-confidence targets and screen data".into(),
        ));
    }

    // ─── missingness policy ──────────────────────────────────────────────
    let curve = missingness_curve(&response_raw, config.missingness_max_threshold);
    let cutoff = apply_cutoff(&response_raw, config.missingness_cutoff);
    if cutoff.matrix.ncols() == 0 {
        return Err(PolarsError::ComputeError(
            format!("missingness cutoff {} leaves no cell lines", config.missingness_cutoff).into(),
        ));
    }

    // ─── imputation + normalization ──────────────────────────────────────
    let imputer = RandomForestImputer::from(&config.imputer);
    let by_sample = cutoff.matrix.transpose();
    let imputed = by_sample.with_values(imputer.impute(&by_sample.values)?)?.transpose();
    let response = standardize_columns(&imputed)?;

    // ─── mutation calls for retained cell lines ──────────────────────────
    let retained = DataFrame::new(vec![Series::new(
        PlSmallStr::from(CELL_LINE_COL),
        response.col_labels.clone(),
    )
    .into()])?;
    let mutations = mutations
        .frame
        .lazy()
        .join(retained.lazy(), [col(CELL_LINE_COL)], [col(CELL_LINE_COL)], JoinArgs::new(JoinType::Semi))
        .collect()?;

    info!(
        "Processed: {} drugs, {} targets, {} cell lines, {} mutation calls",
        response.nrows(),
        affinity.ncols(),
        response.ncols(),
        mutations.height()
    );

    Ok(Processed {
        harmonization: harmonized.harmonization,
        affinity,
        affinity_metadata,
        response_raw,
        curve,
        cutoff,
        response,
        mutations,
    })
}

/// Loads inputs, processes them and writes every output under the configured directory.
pub fn run(config: &PipelineConfig, project_root: &Path) -> PolarsResult<Processed> {
    let synonyms = match &config.synonym_table_path {
        Some(path) => SynonymTable::from_json_file(&config.resolve(project_root, path))?,
        None => SynonymTable::builtin(),
    };
    let output_dir = config.resolve(project_root, &config.output_dir);

    let tables = RawTables::load(config, project_root)?;
    let processed = process(&tables, config, &synonyms)?;

    report_curve(&processed.curve, config.missingness_cutoff, &output_dir)?;

    write_outputs(
        PipelineOutputs {
            affinity: &processed.affinity,
            response: &processed.response,
            affinity_metadata: &processed.affinity_metadata,
            harmonization: &processed.harmonization,
            missingness: MissingnessSummary {
                cutoff: processed.cutoff.cutoff,
                dropped_cell_lines: &processed.cutoff.dropped_columns,
                curve: &processed.curve,
            },
        },
        &output_dir,
    )?;

    let mut mutations = processed.mutations.clone();
    dataframe_to_csv(&mut mutations, &output_dir.join("mutations_resolved.csv"))?;

    Ok(processed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImputerConfig;
    use polars::io::SerWriter;
    use crate::models::{AFFINITY_COL, CONFIDENCE_COL, DRUG_COL, TARGET_COL};

    const DRUGS: [&str; 5] = ["SNS-032", "Dasatinib", "erlotinib", "Lapatinib", "gefitinib"];

    fn value(d: usize, c: usize) -> f64 {
        ((7 * d + 3 * c) % 10) as f64 / 10.0 + 0.05
    }

    fn tables() -> RawTables {
        let mut ccl = Vec::new();
        let mut cpd = Vec::new();
        let mut pv = Vec::new();
        for c in 1..=6i64 {
            for d in 0..5usize {
                if (d, c) == (1, 2) {
                    continue; // dasatinib never measured in cell line 2
                }
                for rep in 0..2 {
                    ccl.push(c);
                    cpd.push(100 + d as i64);
                    pv.push(value(d, c as usize) + if rep == 0 { 0.01 } else { -0.01 });
                }
            }
        }
        // cell line 7: only one drug measured
        ccl.push(7);
        cpd.push(100);
        pv.push(0.4);
        // unresolvable cell line
        ccl.push(99);
        cpd.push(100);
        pv.push(0.9);
        // compound outside the target list
        ccl.push(1);
        cpd.push(105);
        pv.push(0.5);

        let screen = df![
            "master_ccl_id" => ccl,
            "master_cpd_id" => cpd,
            "cpd_avg_pv" => pv
        ]
        .unwrap();

        let cell_lines = df![
            "master_ccl_id" => &[1i64, 2, 3, 4, 5, 6, 7],
            "ccl_name" => &["C1", "C2", "C3", "C4", "C5", "C6", "C7"]
        ]
        .unwrap();

        let mut names: Vec<&str> = DRUGS.to_vec();
        names.push("vorinostat");
        let compounds = df![
            "master_cpd_id" => &[100i64, 101, 102, 103, 104, 105],
            "cpd_name" => names
        ]
        .unwrap();

        let depmap_annotation = df![
            "DepMap_ID" => &["ACH-1", "ACH-2", "ACH-7"],
            "stripped_cell_line_name" => &["C1", "C2", "C7"]
        ]
        .unwrap();
        let mutations = df![
            "DepMap_ID" => &["ACH-1", "ACH-2", "ACH-7", "ACH-9"],
            "Hugo_Symbol" => &["KRAS", "TP53", "EGFR", "BRAF"]
        ]
        .unwrap();

        let targets = df![
            DRUG_COL => &["bms387032", "bms387032", "dasatinib", "erlotinib", "lapatinib", "gefitinib", "gefitinib", "imatinib"],
            TARGET_COL => &["CDK9", "CDK2", "ABL1", "EGFR", "ERBB2", "EGFR", "RIPK2", "ABL1"],
            AFFINITY_COL => &[10.0, 50.0, 0.5, 1.0, 20.0, 2.0, 30.0, 5.0],
            CONFIDENCE_COL => &["High confidence", "High confidence", "High confidence", "High confidence",
                                "High confidence", "High confidence", "Low confidence", "High confidence"]
        ]
        .unwrap();

        RawTables { screen, cell_lines, compounds, depmap_annotation, mutations, targets }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            missingness_cutoff: 1,
            imputer: ImputerConfig { n_trees: 10, max_iter: 3, ..ImputerConfig::default() },
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn end_to_end_on_small_tables() {
        let out = process(&tables(), &config(), &SynonymTable::builtin()).unwrap();

        let expected_drugs = vec!["dasatinib", "erlotinib", "gefitinib", "lapatinib", "sns032"];
        assert_eq!(out.affinity.row_labels, expected_drugs);
        assert_eq!(out.response.row_labels, out.affinity.row_labels);
        assert!(out.harmonization.final_drugs.contains("sns032"));
        assert!(!out.harmonization.initial.contains("sns032"));

        // C7 misses four of five drugs and is cut; C2 misses one and is imputed.
        assert_eq!(out.response_raw.col_labels, vec!["C1", "C2", "C3", "C4", "C5", "C6", "C7"]);
        assert_eq!(out.cutoff.dropped_columns, vec!["C7"]);
        assert_eq!(out.response.col_labels, vec!["C1", "C2", "C3", "C4", "C5", "C6"]);
        assert_eq!(out.response.missing_count(), 0);
        assert_eq!(out.curve.points.len(), 6);

        // Replicates 0.01 above and below the base value average out.
        let sns = out.response_raw.row_labels.iter().position(|d| d == "sns032").unwrap();
        assert!((out.response_raw.values[[sns, 0]] - value(0, 1)).abs() < 1e-9);

        // Only high-confidence targets of harmonized drugs remain.
        assert!(!out.affinity.col_labels.contains(&"RIPK2".to_string()));
        assert_eq!(out.affinity_metadata.high_confidence_records, 6);

        // Mutations: ACH-7 belongs to the dropped cell line, ACH-9 is unknown.
        assert_eq!(out.mutations.height(), 2);
    }

    #[test]
    fn no_shared_drugs_is_an_error() {
        let mut t = tables();
        t.targets = df![
            DRUG_COL => &["imatinib"],
            TARGET_COL => &["ABL1"],
            AFFINITY_COL => &[5.0],
            CONFIDENCE_COL => &["High confidence"]
        ]
        .unwrap();
        assert!(process(&t, &config(), &SynonymTable::builtin()).is_err());
    }

    const TARGET_LIST_CSV: &str = "Drug,Gene Name,Apparent Kd,Target Classification,EC50\n\
        bms387032,CDK9,10,High confidence,30\n\
        bms387032,CDK2,50,High confidence,90\n\
        dasatinib,ABL1,0.5,High confidence,1\n\
        erlotinib,EGFR,1,High confidence,3\n\
        lapatinib,ERBB2,20,High confidence,60\n\
        gefitinib,EGFR,2,High confidence,5\n\
        gefitinib,RIPK2,30,Low confidence,80\n\
        imatinib,ABL1,5,High confidence,12\n";

    fn write_table(df: &DataFrame, path: &Path, separator: u8) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut file = std::fs::File::create(path).unwrap();
        CsvWriter::new(&mut file)
            .include_header(true)
            .with_separator(separator)
            .finish(&mut df.clone())
            .unwrap();
    }

    /// Lays the fixture out on disk under the default input paths and column names.
    fn write_inputs(root: &Path, cfg: &PipelineConfig) {
        let t = tables();
        let p = &cfg.inputs;
        write_table(&t.screen, &root.join(&p.screen_path), b'\t');
        write_table(&t.cell_lines, &root.join(&p.cell_line_path), b'\t');
        write_table(&t.compounds, &root.join(&p.compound_path), b'\t');
        write_table(&t.depmap_annotation, &root.join(&p.depmap_annotation_path), b'\t');
        write_table(&t.mutations, &root.join(&p.mutation_path), b',');
        let targets = root.join(&p.target_list_path);
        std::fs::create_dir_all(targets.parent().unwrap()).unwrap();
        std::fs::write(targets, TARGET_LIST_CSV).unwrap();
    }

    #[test]
    fn run_reads_default_layout_and_writes_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config();
        write_inputs(dir.path(), &cfg);

        let out = run(&cfg, dir.path()).unwrap();
        assert_eq!(out.affinity.row_labels, vec!["dasatinib", "erlotinib", "gefitinib", "lapatinib", "sns032"]);
        assert_eq!(out.cutoff.dropped_columns, vec!["C7"]);
        assert_eq!(out.mutations.height(), 2);

        let results = dir.path().join("results");
        for file in [
            "preprocessed_bundle.json",
            "affinity_matrix.csv",
            "response_matrix.csv",
            "missingness_curve.csv",
            "mutations_resolved.csv",
        ] {
            assert!(results.join(file).is_file(), "missing {file}");
        }
    }

    #[test]
    fn curve_write_failure_stops_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config();
        write_inputs(dir.path(), &cfg);
        std::fs::create_dir_all(dir.path().join("results").join("missingness_curve.csv")).unwrap();

        assert!(run(&cfg, dir.path()).is_err());
        assert!(!dir.path().join("results").join("preprocessed_bundle.json").exists());
    }
}
