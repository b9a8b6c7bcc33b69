// src/fetch/urls.rs
use anyhow::{Context, Result};
use scraper::{Html, Selector};
use tracing::{debug, info, trace, warn};
use url::Url;

use super::Fetch;
use crate::config::SourcesConfig;
use crate::error::PipelineError;
use crate::process::period::{parse_period, Period};

/// All `href`s on a listing page, resolved against `base`, with their link text.
fn links(html: &str, base: &Url) -> Vec<(Url, String)> {
    let doc = Html::parse_document(html);
    let sel = Selector::parse("a[href]").expect("selector should parse");
    doc.select(&sel)
        .filter_map(|el| {
            let href = el.value().attr("href")?;
            let full = base.join(href).ok()?;
            Some((full, href.to_string()))
        })
        .collect()
}

/// Sub-directory links of a listing page, excluding the parent link.
pub fn list_dirs(html: &str, base: &Url) -> Vec<Url> {
    links(html, base)
        .into_iter()
        .filter(|(full, href)| {
            href.ends_with('/')
                && href != "../"
                && !href.starts_with('?')
                && full.as_str().len() > base.as_str().len()
                && full.as_str().starts_with(base.as_str())
        })
        .map(|(full, _)| {
            trace!(url = %full, "Found subdirectory");
            full
        })
        .collect()
}

/// `.zip` links on a listing page that carry a period token.
pub fn list_period_zips(html: &str, base: &Url) -> Vec<(Period, Url)> {
    links(html, base)
        .into_iter()
        .filter(|(_, href)| href.to_lowercase().ends_with(".zip"))
        .filter_map(|(full, href)| {
            let period = parse_period(&href)?;
            trace!(url = %full, %period, "Found archive");
            Some((period, full))
        })
        .collect()
}

/// First link containing `marker` and ending in `.csv` or `.zip`.
pub fn find_registry_link(html: &str, base: &Url, marker: &str) -> Option<Url> {
    links(html, base)
        .into_iter()
        .find(|(_, href)| {
            let lower = href.to_lowercase();
            href.contains(marker) && (lower.ends_with(".csv") || lower.ends_with(".zip"))
        })
        .map(|(full, _)| full)
}

/// Keep the newest `n` periods; one URL per period, newest first.
pub fn select_latest(mut found: Vec<(Period, Url)>, n: usize) -> Vec<(Period, Url)> {
    found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.as_str().cmp(b.1.as_str())));
    found.dedup_by_key(|(p, _)| *p);
    found.truncate(n);
    found
}

fn listing(fetcher: &dyn Fetch, url: &Url) -> Result<String, PipelineError> {
    fetcher
        .get_text(url.as_str())
        .map_err(|e| PipelineError::network(url.as_str(), format!("{:#}", e)))
}

/// Crawl the statements listing (year directories, then archives) and return
/// the archives of the latest configured quarters.
pub fn discover_statement_archives(
    fetcher: &dyn Fetch,
    sources: &SourcesConfig,
) -> Result<Vec<(Period, Url)>, PipelineError> {
    let base = Url::parse(&sources.statements_url)
        .with_context(|| format!("parsing statements URL {}", sources.statements_url))
        .map_err(|e| PipelineError::network(&sources.statements_url, format!("{:#}", e)))?;

    let root = listing(fetcher, &base)?;
    let mut found = list_period_zips(&root, &base);
    let dirs = list_dirs(&root, &base);
    debug!(dirs = dirs.len(), "statement listing directories");

    for dir in dirs {
        match listing(fetcher, &dir) {
            Ok(html) => found.extend(list_period_zips(&html, &dir)),
            Err(e) => warn!(error = %e, "skipping listing directory"),
        }
    }

    let selected = select_latest(found, sources.latest_quarters);
    info!(
        periods = ?selected.iter().map(|(p, _)| p.to_string()).collect::<Vec<_>>(),
        "selected statement archives"
    );
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::test_support::StubFetcher;

    const ROOT: &str = r#"<html><body>
        <a href="../">Parent Directory</a>
        <a href="?C=M;O=A">Last modified</a>
        <a href="2023/">2023/</a>
        <a href="2024/">2024/</a>
        <a href="leiame.txt">leiame.txt</a>
    </body></html>"#;

    const Y2023: &str = r#"<a href="../">Parent</a>
        <a href="3T2023.zip">3T2023.zip</a>
        <a href="4T2023.zip">4T2023.zip</a>"#;

    const Y2024: &str = r#"<a href="1T2024.zip">1T2024.zip</a>
        <a href="2T2024.ZIP">2T2024.ZIP</a>
        <a href="notas.zip">notas.zip</a>"#;

    fn sources() -> SourcesConfig {
        SourcesConfig {
            statements_url: "https://example.test/demonstracoes/".into(),
            ..SourcesConfig::default()
        }
    }

    #[test]
    fn list_dirs_skips_parent_and_sort_links() -> anyhow::Result<()> {
        let base = Url::parse("https://example.test/demonstracoes/")?;
        let dirs: Vec<String> = list_dirs(ROOT, &base).iter().map(|u| u.to_string()).collect();
        assert_eq!(
            dirs,
            vec![
                "https://example.test/demonstracoes/2023/",
                "https://example.test/demonstracoes/2024/"
            ]
        );
        Ok(())
    }

    #[test]
    fn discovers_latest_quarters_across_year_dirs() -> anyhow::Result<()> {
        let fetcher = StubFetcher::default()
            .with("https://example.test/demonstracoes/", ROOT)
            .with("https://example.test/demonstracoes/2023/", Y2023)
            .with("https://example.test/demonstracoes/2024/", Y2024);

        let selected = discover_statement_archives(&fetcher, &sources())?;
        let tokens: Vec<String> = selected.iter().map(|(p, _)| p.to_string()).collect();
        assert_eq!(tokens, vec!["2T2024", "1T2024", "4T2023"]);
        assert_eq!(
            selected[0].1.as_str(),
            "https://example.test/demonstracoes/2024/2T2024.ZIP"
        );
        Ok(())
    }

    #[test]
    fn unreachable_listing_is_a_network_error() {
        let err = discover_statement_archives(&StubFetcher::default(), &sources()).unwrap_err();
        assert!(matches!(err, PipelineError::Network { .. }));
    }

    #[test]
    fn finds_registry_link_by_marker() -> anyhow::Result<()> {
        let base = Url::parse("https://example.test/operadoras/")?;
        let html = r#"<a href="leiame.pdf">x</a>
            <a href="Relatorio_cadop.csv">csv</a>
            <a href="Relatorio_cadop.zip">zip</a>"#;
        assert_eq!(
            find_registry_link(html, &base, "Relatorio_cadop").map(|u| u.to_string()),
            Some("https://example.test/operadoras/Relatorio_cadop.csv".into())
        );
        assert_eq!(find_registry_link(html, &base, "Relatorio_Cadop"), None);
        Ok(())
    }
}
