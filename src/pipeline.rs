// src/pipeline.rs

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use glob::glob;
use serde::Serialize;
use std::{fs, path::PathBuf};
use tracing::{error, info, warn};

use crate::aggregate::{aggregate, write_aggregated};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::fetch::{urls::discover_statement_archives, zips, Fetch};
use crate::process::columns::{SchemaWarning, ALIAS_TABLE_VERSION};
use crate::process::consolidate::{
    consolidate_archives, read_consolidated, write_consolidated, zip_consolidated, ArchiveSummary,
    SkippedArchive,
};
use crate::registry::{
    columns::REGISTRY_RULES_VERSION,
    join::{join_registry, JoinReport},
    load_registry,
    reconciled::{annotate_tax_ids, read_final, write_final},
};
use crate::validate::TaxIdValidator;

#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchReport {
    pub selected: Vec<String>,
    pub downloaded: usize,
    pub already_present: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsolidationReport {
    pub processed: Vec<ArchiveSummary>,
    pub skipped: Vec<SkippedArchive>,
    pub schema_warnings: Vec<SchemaWarning>,
    pub rows_written: usize,
    pub artifact: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentReport {
    pub registry_file: PathBuf,
    pub registry_rows: usize,
    pub registry_rows_skipped: usize,
    pub join: JoinReport,
    pub invalid_tax_ids: usize,
    pub rows_written: usize,
    pub artifact: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregationReport {
    pub rows_read: usize,
    pub groups: usize,
    pub artifact: PathBuf,
}

/// What `run_all` did, written next to the artifacts as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub alias_table_version: u32,
    pub registry_rules_version: u32,
    pub fetch: Option<FetchReport>,
    pub fetch_error: Option<String>,
    pub consolidation: ConsolidationReport,
    pub enrichment: Option<EnrichmentReport>,
    pub enrichment_error: Option<String>,
    pub aggregation: Option<AggregationReport>,
}

/// Download the latest statement archives into the raw dir.
#[tracing::instrument(level = "info", skip(fetcher, cfg), fields(dest = %cfg.paths.raw_dir.display()))]
pub fn fetch_statements(fetcher: &dyn Fetch, cfg: &PipelineConfig) -> Result<FetchReport> {
    let selected = discover_statement_archives(fetcher, &cfg.sources)?;
    let mut report = FetchReport::default();

    for (period, url) in selected {
        report.selected.push(period.to_string());
        match zips::download_archive(fetcher, &url, &cfg.paths.raw_dir) {
            Ok((_, true)) => report.downloaded += 1,
            Ok((_, false)) => report.already_present += 1,
            Err(e) => {
                error!(%url, error = %format!("{:#}", e), "download failed");
                report.failed += 1;
            }
        }
    }

    info!(
        downloaded = report.downloaded,
        already_present = report.already_present,
        failed = report.failed,
        "fetch finished"
    );
    Ok(report)
}

/// Every `*.zip` in the raw dir, consolidated into one per-period artifact.
#[tracing::instrument(level = "info", skip(cfg), fields(raw = %cfg.paths.raw_dir.display()))]
pub fn consolidate_stage(cfg: &PipelineConfig) -> Result<ConsolidationReport> {
    let raw_dir = &cfg.paths.raw_dir;
    if !raw_dir.is_dir() {
        return Err(
            PipelineError::missing(raw_dir, "run `fetch` or place statement archives there").into(),
        );
    }

    let pattern = raw_dir.join("*.zip");
    let pattern = pattern.to_string_lossy();
    let archives: Vec<PathBuf> = glob(&pattern)
        .with_context(|| format!("Failed to read glob pattern '{}'", pattern))?
        .filter_map(|entry| entry.ok())
        .collect();
    if archives.is_empty() {
        return Err(PipelineError::missing(raw_dir, "no .zip archives found").into());
    }
    info!(archives = archives.len(), "consolidating");

    let consolidation = consolidate_archives(&archives, cfg);
    for skipped in &consolidation.skipped {
        warn!(archive = %skipped.archive, reason = %skipped.reason, "archive skipped");
    }

    let artifact = cfg.consolidated_path();
    let rows_written = write_consolidated(&artifact, &consolidation.records)?;
    if cfg.output.zip_consolidated {
        zip_consolidated(&artifact, cfg.consolidated_zip_path())?;
    }
    info!(rows = rows_written, path = %artifact.display(), "consolidated artifact written");

    Ok(ConsolidationReport {
        processed: consolidation.processed,
        skipped: consolidation.skipped,
        schema_warnings: consolidation.warnings,
        rows_written,
        artifact,
    })
}

/// Join the consolidated artifact onto the registry and flag tax ids.
/// The registry is fetched once when no local copy exists.
#[tracing::instrument(level = "info", skip(fetcher, cfg))]
pub fn enrich_stage(fetcher: &dyn Fetch, cfg: &PipelineConfig) -> Result<EnrichmentReport> {
    let consolidated = cfg.consolidated_path();
    if !consolidated.is_file() {
        return Err(PipelineError::missing(&consolidated, "run `consolidate` first").into());
    }

    let registry_file = if cfg.paths.registry_file.is_file() {
        cfg.paths.registry_file.clone()
    } else {
        info!(path = %cfg.paths.registry_file.display(), "no local registry; fetching");
        zips::fetch_registry(fetcher, cfg)?
    };

    let expenses = read_consolidated(&consolidated)?;
    let registry = load_registry(&registry_file, &cfg.input).map_err(|e| {
        PipelineError::UnreadableRegistry {
            path: registry_file.clone(),
            reason: format!("{:#}", e),
        }
    })?;

    let (joined, join) = join_registry(expenses, &registry.records);
    let validator = TaxIdValidator::new(&cfg.tax_id);
    let (records, invalid_tax_ids) = annotate_tax_ids(joined, &validator);

    let artifact = cfg.final_path();
    let rows_written = write_final(&artifact, &records)?;
    info!(rows = rows_written, path = %artifact.display(), "final artifact written");

    Ok(EnrichmentReport {
        registry_file,
        registry_rows: registry.len(),
        registry_rows_skipped: registry.skipped_rows,
        join,
        invalid_tax_ids,
        rows_written,
        artifact,
    })
}

#[tracing::instrument(level = "info", skip(cfg))]
pub fn aggregate_stage(cfg: &PipelineConfig) -> Result<AggregationReport> {
    let final_path = cfg.final_path();
    if !final_path.is_file() {
        return Err(PipelineError::missing(&final_path, "run `enrich` first").into());
    }
    let records = read_final(&final_path)?;
    let rows = aggregate(&records);

    let artifact = cfg.aggregated_path();
    let groups = write_aggregated(&artifact, &rows)?;
    info!(groups, path = %artifact.display(), "aggregated artifact written");

    Ok(AggregationReport {
        rows_read: records.len(),
        groups,
        artifact,
    })
}

/// fetch → consolidate → enrich → aggregate.
///
/// A fetch failure falls back to whatever archives are already local. Any
/// enrichment failure skips aggregation but keeps the consolidated artifact
/// and still writes the summary. Missing raw input aborts the run.
pub fn run_all(fetcher: &dyn Fetch, cfg: &PipelineConfig) -> Result<RunSummary> {
    let started_at = Utc::now();

    let (fetch, fetch_error) = match fetch_statements(fetcher, cfg) {
        Ok(report) => (Some(report), None),
        Err(e) => {
            warn!(error = %format!("{:#}", e), "fetch failed; continuing with local archives");
            (None, Some(format!("{:#}", e)))
        }
    };

    let consolidation = consolidate_stage(cfg)?;

    let (enrichment, enrichment_error) = match enrich_stage(fetcher, cfg) {
        Ok(report) => (Some(report), None),
        Err(e) => {
            error!(error = %format!("{:#}", e), "enrichment aborted");
            (None, Some(format!("{:#}", e)))
        }
    };

    let aggregation = match enrichment {
        Some(_) => Some(aggregate_stage(cfg)?),
        None => None,
    };

    let summary = RunSummary {
        started_at,
        finished_at: Utc::now(),
        alias_table_version: ALIAS_TABLE_VERSION,
        registry_rules_version: REGISTRY_RULES_VERSION,
        fetch,
        fetch_error,
        consolidation,
        enrichment,
        enrichment_error,
        aggregation,
    };
    write_summary(cfg, &summary)?;
    Ok(summary)
}

fn write_summary(cfg: &PipelineConfig, summary: &RunSummary) -> Result<()> {
    let path = cfg.summary_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {:?}", parent))?;
    }
    let json = serde_json::to_string_pretty(summary)?;
    fs::write(&path, json).with_context(|| format!("writing {:?}", path))?;
    info!(path = %path.display(), "run summary written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::test_support::StubFetcher;
    use crate::process::test_support::{latin1, zip_bytes};
    use std::path::Path;
    use tempfile::tempdir;
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    fn init_tracing() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new("info,ansrecon=debug")),
            )
            .with_test_writer()
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }

    fn config(root: &Path) -> PipelineConfig {
        let mut cfg = PipelineConfig::default();
        cfg.paths.raw_dir = root.join("raw");
        cfg.paths.processed_dir = root.join("processed");
        cfg.paths.registry_file = root.join("registry/cadop.csv");
        cfg.sources.statements_url = "https://example.test/demonstracoes/".into();
        cfg.sources.registry_url = "https://example.test/operadoras/".into();
        cfg
    }

    fn seed_archives(raw: &Path) -> Result<()> {
        fs::create_dir_all(raw)?;
        let q1 = latin1(
            "\"DATA\";\"REG_ANS\";\"CD_CONTA_CONTABIL\";\"DESCRICAO\";\"VL_SALDO_FINAL\"\n\
             \"2024-01-01\";\"419761\";\"411\";\"EVENTOS INDENIZÁVEIS\";\"100,00\"\n\
             \"2024-01-01\";\"419761\";\"311\";\"CONTRAPRESTAÇÕES\";\"999,00\"\n\
             \"2024-01-01\";\"322\";\"411\";\"SINISTROS\";\"50,00\"\n",
        );
        let q2 = latin1(
            "REGISTRO_ANS;CONTA;DESCRIÇÃO;VALOR\n\
             419761;41;Despesas com Eventos;200,00\n\
             777;41;Despesas com Eventos;1.000,00\n",
        );
        fs::write(raw.join("1T2024.zip"), zip_bytes(&[("1T2024.csv", &q1)])?)?;
        fs::write(raw.join("2T2024.zip"), zip_bytes(&[("2T2024.csv", &q2)])?)?;
        fs::write(raw.join("3T2024.zip"), b"not a zip")?;
        Ok(())
    }

    const REGISTRY: &str = "Registro_ANS;CNPJ;Razao_Social;Modalidade;UF\n\
        419761;11.444.777/0001-61;OPERADORA A;Medicina de Grupo;SP\n\
        322;11444777000160;OPERADORA B;Cooperativa Médica;RJ\n";

    #[test]
    fn full_run_with_unreachable_listing_uses_local_archives() -> Result<()> {
        init_tracing();
        let dir = tempdir()?;
        let cfg = config(dir.path());
        seed_archives(&cfg.paths.raw_dir)?;
        fs::create_dir_all(dir.path().join("registry"))?;
        fs::write(&cfg.paths.registry_file, latin1(REGISTRY))?;

        let summary = run_all(&StubFetcher::default(), &cfg)?;

        assert!(summary.fetch.is_none());
        assert!(summary.fetch_error.is_some());
        assert_eq!(summary.consolidation.processed.len(), 2);
        assert_eq!(summary.consolidation.skipped.len(), 1);
        assert_eq!(summary.consolidation.rows_written, 4);
        assert!(cfg.consolidated_zip_path().is_file());

        let enrichment = summary.enrichment.as_ref().expect("enrichment ran");
        assert_eq!(enrichment.rows_written, 4);
        assert_eq!(enrichment.join.unmatched_rows, 1);
        assert_eq!(enrichment.invalid_tax_ids, 2);

        let final_text = fs::read_to_string(cfg.final_path())?;
        assert!(final_text.contains("777;2024;2;1000;;DESCONHECIDO;IND;Desconhecida;false"));

        let agg = fs::read_to_string(cfg.aggregated_path())?;
        let lines: Vec<&str> = agg.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("DESCONHECIDO;IND;1000;1000;;1"));
        assert!(lines[2].starts_with("OPERADORA A;SP;300;150;70.71"));
        assert_eq!(lines[3], "OPERADORA B;RJ;50;50;;1");

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(cfg.summary_path())?)?;
        assert_eq!(json["enrichment"]["join"]["joined_rows"], 4);
        assert!(json["started_at"].is_string());
        assert_eq!(json["alias_table_version"], ALIAS_TABLE_VERSION);
        Ok(())
    }

    #[test]
    fn registry_fetch_failure_keeps_consolidated_artifact() -> Result<()> {
        init_tracing();
        let dir = tempdir()?;
        let cfg = config(dir.path());
        seed_archives(&cfg.paths.raw_dir)?;

        let summary = run_all(&StubFetcher::default(), &cfg)?;

        assert!(summary.enrichment.is_none());
        assert!(summary
            .enrichment_error
            .as_deref()
            .is_some_and(|e| e.contains("network error")));
        assert!(summary.aggregation.is_none());
        assert!(cfg.consolidated_path().is_file());
        assert!(!cfg.final_path().exists());
        Ok(())
    }

    #[test]
    fn corrupt_cached_registry_aborts_enrichment_only() -> Result<()> {
        init_tracing();
        let dir = tempdir()?;
        let mut cfg = config(dir.path());
        cfg.paths.registry_file = dir.path().join("registry/cadop.zip");
        seed_archives(&cfg.paths.raw_dir)?;
        fs::create_dir_all(dir.path().join("registry"))?;
        fs::write(&cfg.paths.registry_file, b"not a zip")?;

        let err = enrich_stage(&StubFetcher::default(), &cfg).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::UnreadableRegistry { .. })
        ));

        let summary = run_all(&StubFetcher::default(), &cfg)?;
        assert!(summary.enrichment.is_none());
        assert!(summary
            .enrichment_error
            .as_deref()
            .is_some_and(|e| e.contains("unreadable registry")));
        assert!(summary.aggregation.is_none());
        assert!(cfg.consolidated_path().is_file());
        assert!(cfg.summary_path().is_file());
        Ok(())
    }

    #[test]
    fn missing_raw_dir_is_missing_input() -> Result<()> {
        let dir = tempdir()?;
        let cfg = config(dir.path());
        let err = consolidate_stage(&cfg).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::MissingInput { .. })
        ));
        assert!(!cfg.consolidated_path().exists());
        Ok(())
    }

    #[test]
    fn stages_refuse_to_run_without_upstream_artifacts() -> Result<()> {
        let dir = tempdir()?;
        let cfg = config(dir.path());
        for err in [
            enrich_stage(&StubFetcher::default(), &cfg).unwrap_err(),
            aggregate_stage(&cfg).unwrap_err(),
        ] {
            assert!(matches!(
                err.downcast_ref::<PipelineError>(),
                Some(PipelineError::MissingInput { .. })
            ));
        }
        Ok(())
    }

    #[test]
    fn fetch_downloads_latest_archives() -> Result<()> {
        let dir = tempdir()?;
        let mut cfg = config(dir.path());
        cfg.sources.latest_quarters = 2;
        let fetcher = StubFetcher::default()
            .with(
                "https://example.test/demonstracoes/",
                r#"<a href="../">up</a><a href="2024/">2024/</a>"#,
            )
            .with(
                "https://example.test/demonstracoes/2024/",
                r#"<a href="1T2024.zip">a</a><a href="2T2024.zip">b</a><a href="3T2024.zip">c</a>"#,
            )
            .with("https://example.test/demonstracoes/2024/3T2024.zip", b"z3".to_vec());

        let report = fetch_statements(&fetcher, &cfg)?;
        assert_eq!(report.selected, vec!["3T2024", "2T2024"]);
        assert_eq!(report.downloaded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(fs::read(cfg.paths.raw_dir.join("3T2024.zip"))?, b"z3");
        Ok(())
    }
}
