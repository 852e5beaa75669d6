//! One run of the tool: find a release, pick an asset, download, verify and
//! extract it, and remember what was installed.

use crate::cache::Cache;
use crate::cli::Cli;
use crate::config::{
    default_cache_path, load_config_file, resolve_options, ConfigFile, Environment, Options,
};
use crate::detect::{build_detector, Detection};
use crate::extract::{
    new_extractor, BinaryChooser, Chooser, Codec, ExtractError, ExtractedFile, Extractor,
    GlobChooser, SingleFileExtractor,
};
use crate::fetch::{Client, HttpFetcher};
use crate::finder::{
    DirectAssetFinder, FindError, FindResult, GithubAssetFinder, GithubSourceFinder,
};
use crate::platform::PlatformTable;
use crate::target::Target;
use crate::types::{base_name, Asset};
use crate::verify::{select_verifier, Sha256Printer, Verification, Verifier};
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Duration as TimeDelta, Utc};
use std::fmt;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const MAX_TTL_HOURS: u64 = 24 * 365 * 10;

/// Writes progress lines to stderr unless quiet.
#[derive(Debug, Clone, Copy)]
pub struct Reporter {
    quiet: bool,
}

impl Reporter {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }

    pub fn line(&self, message: impl fmt::Display) {
        if !self.quiet {
            eprintln!("{}", message);
        }
    }
}

/// Aborts the cache sweeper when the run ends, however it ends.
struct SweeperGuard(JoinHandle<()>);

impl Drop for SweeperGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Entry point for the binary.
pub async fn run(cli: Cli) -> Result<()> {
    let env = Environment::from_process();
    let file = load_config_file(&env)?;

    let cache_path = default_cache_path(&env)?;
    let cache = Arc::new(
        Cache::load_from_file(&cache_path)
            .with_context(|| format!("Could not load cache at {}", cache_path.display()))?,
    );
    let _sweeper = SweeperGuard(Arc::clone(&cache).spawn_sweeper(SWEEP_INTERVAL));

    if cli.download_all {
        return download_all(&cli, &file, &env, &cache).await;
    }

    let Some(input) = cli.target.clone() else {
        bail!("no target given (see --help)");
    };
    run_target(&cli, &input, &file, &env, &cache).await
}

/// Installs every repository named in the config file.
async fn download_all(cli: &Cli, file: &ConfigFile, env: &Environment, cache: &Cache) -> Result<()> {
    let mut failures = Vec::new();
    for key in file.repositories.keys() {
        if let Err(e) = run_target(cli, key, file, env, cache).await {
            tracing::warn!("Failed to download {}: {:#}", key, e);
            failures.push(format!("{}: {:#}", key, e));
        }
    }
    if !failures.is_empty() {
        bail!(
            "one or more errors occurred while downloading: {}",
            failures.join("; ")
        );
    }
    Ok(())
}

async fn run_target(
    cli: &Cli,
    input: &str,
    file: &ConfigFile,
    env: &Environment,
    cache: &Cache,
) -> Result<()> {
    let target = Target::parse(input)?;
    let options = resolve_options(cli, file, &target.key(), env);
    let reporter = Reporter::new(options.quiet);

    if options.remove {
        return remove_installed(&options, &target, reporter);
    }

    let count = install(&options, &target, cache, reporter).await?;
    tracing::info!("Number of extracted files: {}", count);
    Ok(())
}

/// Deletes a previously installed binary from the install directory.
pub fn remove_installed(options: &Options, target: &Target, reporter: Reporter) -> Result<()> {
    let dir = options
        .bin_dir
        .clone()
        .or_else(|| options.output.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));
    let path = dir.join(tool_name(options, target));

    std::fs::remove_file(&path).with_context(|| format!("Could not remove {}", path.display()))?;
    reporter.line(format!("Removed `{}`", path.display()));
    Ok(())
}

fn tool_name(options: &Options, target: &Target) -> String {
    options.name.clone().unwrap_or_else(|| target.tool_name())
}

fn cache_expiry(options: &Options) -> DateTime<Utc> {
    let hours = options.cache_ttl_hours.min(MAX_TTL_HOURS) as i64;
    Utc::now() + TimeDelta::hours(hours)
}

/// Where a tool named `tool` ends up given `--to` and `$RELGET_BIN`.
pub fn installed_binary_path(options: &Options, tool: &str) -> PathBuf {
    let bin_dir = options.bin_dir.as_deref();
    match options.output.as_deref() {
        Some(to) if Path::new(to).is_dir() => Path::new(to).join(tool),
        Some(to) if !to.contains(std::path::MAIN_SEPARATOR) => {
            bin_dir.unwrap_or(Path::new(".")).join(to)
        }
        Some(to) => PathBuf::from(to),
        None => bin_dir.unwrap_or(Path::new(".")).join(tool),
    }
}

fn modified_time(path: &Path) -> Option<DateTime<Utc>> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

/// True when `found` is not a newer semantic version than `installed`.
/// Tags that do not parse never block an upgrade.
pub fn is_not_newer(found: &str, installed: &str) -> bool {
    let parse = |tag: &str| semver::Version::parse(tag.trim_start_matches('v')).ok();
    match (parse(found), parse(installed)) {
        (Some(found), Some(installed)) => found <= installed,
        _ => false,
    }
}

/// Destination for an extracted file, following `--to`, `--all` and
/// `$RELGET_BIN`.
pub fn output_path(options: &Options, file: &ExtractedFile) -> Result<PathBuf> {
    let name = base_name(&file.name);
    let mut out = match options.output.as_deref() {
        Some(crate::extract::fs::STDOUT) => PathBuf::from(crate::extract::fs::STDOUT),
        Some(to) if Path::new(to).is_dir() => Path::new(to).join(name),
        Some(to) if options.all => {
            std::fs::create_dir_all(to)
                .with_context(|| format!("Could not create directory {}", to))?;
            Path::new(to).join(name)
        }
        Some(to) => PathBuf::from(to),
        None => PathBuf::from(name),
    };

    // $RELGET_BIN only applies to executables when --to is not a path
    if let Some(bin_dir) = options.bin_dir.as_deref() {
        let bare = out.components().count() == 1 && out != Path::new(crate::extract::fs::STDOUT);
        if bare && file.mode() & 0o111 != 0 && !file.is_dir {
            out = bin_dir.join(out);
        }
    }
    Ok(out)
}

/// Installs `target`, returning the number of files extracted.
pub async fn install(
    options: &Options,
    target: &Target,
    cache: &Cache,
    reporter: Reporter,
) -> Result<usize> {
    let key = target.key();
    let tool = tool_name(options, target);
    let mut options = options.clone();

    if options.asset_filters.is_empty() {
        if let Some(entry) = cache.get(&key) {
            if !entry.filters.is_empty() {
                tracing::debug!("Using cached asset filters {:?}", entry.filters);
                options.asset_filters = entry.filters;
            }
        }
    }

    let client = Client::new(options.github_token.clone(), options.show_progress)?;
    let found = match find(&mut options, target, cache, &client, &tool).await {
        Ok(found) => found,
        Err(FindError::NoUpgrade) => {
            reporter.line(format!("{}: {}", key, FindError::NoUpgrade));
            return Ok(0);
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(limit) = found.rate_limit {
        cache.set_rate_limit(limit.limit, limit.remaining, limit.reset)?;
    }

    if target.repository().is_some() {
        if options.upgrade_only {
            if let Some(entry) = cache.get(&key) {
                if is_not_newer(&found.tag, &entry.last_download_tag) {
                    reporter.line(format!("{}: {}", key, FindError::NoUpgrade));
                    return Ok(0);
                }
            }
        }
        remember_repository(cache, &key, &tool, &options)?;
    }

    let table = PlatformTable::standard()?;
    let detector = build_detector(&options.system, &options.asset_filters, &[], &table)?;
    let asset = match detector.detect(&found.assets) {
        Ok(Detection::Direct(asset)) => asset,
        Ok(Detection::Candidates(candidates)) => {
            let message = format!("{} candidates found", candidates.len());
            choose_asset(cache, &key, &message, candidates, options.no_interaction).await?
        }
        Err(e) if !e.candidates().is_empty() => {
            let message = e.to_string();
            choose_asset(cache, &key, &message, e.into_candidates(), options.no_interaction)
                .await?
        }
        Err(e) => return Err(e.into()),
    };

    reporter.line(format!("› downloading {}...", asset.download_url));
    let body = client
        .download(&asset.download_url)
        .await
        .with_context(|| format!("Download failed (URL: {})", asset.download_url))?;

    if target.repository().is_some() {
        let tag = if found.tag.is_empty() {
            "latest"
        } else {
            found.tag.as_str()
        };
        cache.record_download(&key, tag)?;
        if let Some(created_at) = found.created_at {
            cache.set_release_date(&key, created_at)?;
        }
    }

    let assets = found.assets;
    tokio::task::spawn_blocking(move || {
        verify(&options, &asset, &assets, &body, reporter)?;
        extract(&options, &asset, &tool, &body, reporter)
    })
    .await
    .context("extraction task failed")?
}

async fn find(
    options: &mut Options,
    target: &Target,
    cache: &Cache,
    client: &Client,
    tool: &str,
) -> Result<FindResult, FindError> {
    match target {
        Target::Repository { tag, .. } => {
            if let Some(reset) = cache.rate_limit().exceeded_until(Utc::now()) {
                tracing::warn!("GitHub API rate limit exceeded until {}", reset);
            }

            let repo = target.repository().unwrap_or_default();
            let tag = options.tag.clone().or_else(|| tag.clone());

            if options.source {
                // The tarball is kept as downloaded
                options.system = "all".to_string();
                options.download_only = true;
                return Ok(GithubSourceFinder::new(repo, tag, tool).find());
            }
            let min_time = if options.upgrade_only {
                modified_time(&installed_binary_path(options, tool))
            } else {
                None
            };
            GithubAssetFinder::new(repo, tag, options.prerelease)
                .upgrade_from(min_time)
                .find(client)
                .await
        }
        Target::Url(url) => {
            options.system = "all".to_string();
            Ok(DirectAssetFinder::new(url).find())
        }
        Target::LocalFile(path) => {
            options.system = "all".to_string();
            Ok(DirectAssetFinder::new(path.to_string_lossy()).find())
        }
    }
}

/// Records the repository on first resolution and refreshes its check time
/// on later runs. Expired entries are recreated.
fn remember_repository(cache: &Cache, key: &str, tool: &str, options: &Options) -> Result<()> {
    if cache.has(key) && cache.touch(key)? {
        if !options.asset_filters.is_empty() {
            cache.set_filters(key, options.asset_filters.clone())?;
        }
        return Ok(());
    }

    cache.add_repository(key, tool, options.asset_filters.clone(), cache_expiry(options))?;
    Ok(())
}

async fn choose_asset(
    cache: &Cache,
    key: &str,
    message: &str,
    candidates: Vec<Asset>,
    no_interaction: bool,
) -> Result<Asset> {
    let names: Vec<String> = candidates.iter().map(|a| a.base_name().to_string()).collect();
    let message = message.to_string();
    let index = tokio::task::spawn_blocking(move || {
        prompt_selection(&message, &names, no_interaction)
    })
    .await
    .context("selection prompt failed")??;

    let asset = candidates
        .into_iter()
        .nth(index)
        .ok_or_else(|| anyhow!("selection out of range"))?;

    // Remember the choice so the next run picks the same asset
    cache.set_filters(key, vec![asset.base_name().to_string()])?;
    Ok(asset)
}

/// Lists `choices` on stderr and reads a 1-based selection from stdin.
/// Fails without prompting when interaction is disabled or stdin is not a
/// terminal.
pub fn prompt_selection(message: &str, choices: &[String], no_interaction: bool) -> Result<usize> {
    let stdin = io::stdin();
    let blocked = if no_interaction {
        Some("user interaction disabled")
    } else if !stdin.is_terminal() {
        Some("stdin is not a terminal")
    } else {
        None
    };
    prompt_from(message, choices, blocked, &mut stdin.lock())
}

fn prompt_from(
    message: &str,
    choices: &[String],
    blocked: Option<&str>,
    input: &mut dyn BufRead,
) -> Result<usize> {
    let mut stderr = io::stderr();
    for (i, choice) in choices.iter().enumerate() {
        writeln!(stderr, "({}) {}", i + 1, choice)?;
    }
    if let Some(reason) = blocked {
        bail!("{}: cannot select automatically ({})", message, reason);
    }

    writeln!(stderr, "{}: please select manually", message)?;
    loop {
        write!(stderr, "Enter selection number: ")?;
        stderr.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            bail!("Error reading selection");
        }
        match line.trim().parse::<usize>() {
            Ok(n) if (1..=choices.len()).contains(&n) => return Ok(n - 1),
            Ok(n) => writeln!(stderr, "Invalid selection: {} is out of bounds", n)?,
            Err(e) => writeln!(stderr, "Invalid selection: {}", e)?,
        }
    }
}

fn verify(
    options: &Options,
    asset: &Asset,
    assets: &[Asset],
    body: &[u8],
    reporter: Reporter,
) -> Result<()> {
    let fetcher = Arc::new(HttpFetcher::new(options.github_token.clone())?);
    let verification = select_verifier(
        options.verify_sha256.as_deref(),
        options.show_hash,
        asset,
        assets,
        fetcher,
    )?;

    let (verifier, proof) = match verification {
        Verification::Skip => return Ok(()),
        Verification::Print(printer) => {
            printer.verify(body)?;
            return Ok(());
        }
        Verification::Check { verifier, proof } => (verifier, proof),
    };

    reporter.line(format!("› performing verification for {}...", asset.name));
    verifier
        .verify(body)
        .with_context(|| format!("verification failed ({})", verifier))?;
    match proof {
        Some(proof) => reporter.line(format!("verified with {} ✔", proof.name)),
        None => reporter.line("verified ✔"),
    }

    if options.show_hash {
        Sha256Printer::new().verify(body)?;
    }
    Ok(())
}

fn extractor_for(options: &Options, asset: &Asset, tool: &str) -> Result<Box<dyn Extractor>> {
    let filename = base_name(&asset.download_url);

    if options.download_only {
        return Ok(Box::new(SingleFileExtractor::new(filename, filename, Codec::None)));
    }

    let chooser: Box<dyn Chooser> = match options.file.as_deref() {
        Some(expr) => Box::new(GlobChooser::new(expr)?),
        None => Box::new(BinaryChooser::new(tool)),
    };
    Ok(new_extractor(filename, tool, chooser))
}

fn extract(
    options: &Options,
    asset: &Asset,
    tool: &str,
    body: &[u8],
    reporter: Reporter,
) -> Result<usize> {
    let extractor = extractor_for(options, asset, tool)?;

    let files = match extractor.extract(body, options.all) {
        Ok(file) => vec![file],
        Err(e @ ExtractError::Candidates { .. }) if options.all => e.into_candidates(),
        Err(e @ ExtractError::Candidates { .. }) => {
            let message = e.to_string();
            let mut candidates = e.into_candidates();
            let mut choices: Vec<String> = candidates.iter().map(ToString::to_string).collect();
            choices.push("all".to_string());

            let index = prompt_selection(&message, &choices, options.no_interaction)?;
            if index == candidates.len() {
                candidates
            } else {
                vec![candidates.swap_remove(index)]
            }
        }
        Err(e) => return Err(e.into()),
    };

    for file in &files {
        let out = output_path(options, file)?;
        file.extract(&out)
            .with_context(|| format!("Could not extract `{}`", file.archive_name))?;
        reporter.line(format!(
            "› extracted `{}` to `{}` ✔",
            file.archive_name,
            out.display()
        ));
    }
    Ok(files.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ExtractAction;
    use std::io::Cursor;

    fn options() -> Options {
        let cli = <Cli as clap::Parser>::parse_from(["relget", "owner/tool"]);
        resolve_options(
            &cli,
            &ConfigFile::default(),
            "owner/tool",
            &Environment::default(),
        )
    }

    #[tokio::test]
    async fn test_source_mode_finds_tarball() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path().join("cache.json"));
        let client = Client::new(None, false).unwrap();
        let target = Target::parse("owner/tool@v1.2.0").unwrap();
        let mut options = options();
        options.source = true;

        let found = find(&mut options, &target, &cache, &client, "tool").await.unwrap();
        assert_eq!(found.tag, "v1.2.0");
        assert_eq!(
            found.assets[0].download_url,
            "https://github.com/owner/tool/tarball/v1.2.0/tool.tar.gz"
        );
        assert!(options.download_only);
        assert_eq!(options.system, "all");
    }

    #[test]
    fn test_remember_repository_adds_then_touches() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path().join("cache.json"));
        let mut options = options();

        remember_repository(&cache, "owner/tool", "tool", &options).unwrap();
        let first = cache.get("owner/tool").unwrap();
        assert_eq!(first.target, "tool");
        assert!(first.filters.is_empty());
        assert!(cache.has("OWNER/tool"));

        options.asset_filters = vec!["musl".to_string()];
        remember_repository(&cache, "owner/tool", "tool", &options).unwrap();
        let second = cache.get("owner/tool").unwrap();
        assert_eq!(second.id, first.id);
        assert!(second.last_check_at >= first.last_check_at);
        assert_eq!(second.filters, vec!["musl"]);

        // Local paths are not repository references
        assert!(remember_repository(&cache, "./tool.tar.gz", "tool", &options).is_err());
    }

    fn file(name: &str, mode: u32) -> ExtractedFile {
        ExtractedFile {
            name: name.to_string(),
            archive_name: format!("pkg/{name}"),
            mode,
            is_dir: false,
            action: ExtractAction::Write {
                data: Arc::from(&b"data"[..]),
                mode,
            },
        }
    }

    #[test]
    fn test_output_path_defaults_to_basename() {
        let options = options();
        assert_eq!(
            output_path(&options, &file("dir/tool", 0o755)).unwrap(),
            PathBuf::from("tool")
        );
    }

    #[test]
    fn test_output_path_honors_to_and_bin_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = options();

        options.output = Some(dir.path().to_string_lossy().into_owned());
        assert_eq!(
            output_path(&options, &file("tool", 0o755)).unwrap(),
            dir.path().join("tool")
        );

        options.output = Some("-".to_string());
        options.bin_dir = Some(dir.path().to_path_buf());
        assert_eq!(
            output_path(&options, &file("tool", 0o755)).unwrap(),
            PathBuf::from("-")
        );

        options.output = None;
        assert_eq!(
            output_path(&options, &file("tool", 0o755)).unwrap(),
            dir.path().join("tool")
        );
        assert_eq!(
            output_path(&options, &file("notes.txt", 0o644)).unwrap(),
            PathBuf::from("notes.txt")
        );
    }

    #[test]
    fn test_output_path_creates_directory_for_all() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out");
        let mut options = options();
        options.all = true;
        options.output = Some(target.to_string_lossy().into_owned());

        let out = output_path(&options, &file("tool", 0o755)).unwrap();
        assert_eq!(out, target.join("tool"));
        assert!(target.is_dir());
    }

    #[test]
    fn test_installed_binary_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = options();
        assert_eq!(installed_binary_path(&options, "tool"), PathBuf::from("./tool"));

        options.bin_dir = Some(dir.path().to_path_buf());
        assert_eq!(installed_binary_path(&options, "tool"), dir.path().join("tool"));

        options.output = Some("renamed".to_string());
        assert_eq!(installed_binary_path(&options, "tool"), dir.path().join("renamed"));

        options.output = Some("/opt/tools/tool".to_string());
        assert_eq!(
            installed_binary_path(&options, "tool"),
            PathBuf::from("/opt/tools/tool")
        );
    }

    #[test]
    fn test_is_not_newer() {
        assert!(is_not_newer("v1.0.0", "v1.0.0"));
        assert!(is_not_newer("1.0.0", "v1.2.0"));
        assert!(!is_not_newer("v1.3.0", "v1.2.0"));
        assert!(!is_not_newer("nightly", "v1.2.0"));
        assert!(!is_not_newer("v1.0.0", ""));
    }

    #[test]
    fn test_prompt_reads_until_valid() {
        let choices = vec!["a".to_string(), "b".to_string()];
        let mut input = Cursor::new("x\n7\n2\n");
        assert_eq!(prompt_from("pick", &choices, None, &mut input).unwrap(), 1);

        let mut empty = Cursor::new("");
        assert!(prompt_from("pick", &choices, None, &mut empty).is_err());

        let mut unused = Cursor::new("1\n");
        let err = prompt_from("2 candidates", &choices, Some("stdin is not a terminal"), &mut unused)
            .unwrap_err();
        assert!(err.to_string().contains("not a terminal"));
    }

    #[test]
    fn test_no_interaction_never_prompts() {
        let choices = vec!["a".to_string(), "b".to_string()];
        let err = prompt_selection("2 candidates", &choices, true).unwrap_err();
        assert_eq!(
            err.to_string(),
            "2 candidates: cannot select automatically (user interaction disabled)"
        );
    }

    #[test]
    fn test_extract_writes_to_destination() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = options();
        options.output = Some(dir.path().to_string_lossy().into_owned());

        let asset = Asset::new("tool.gz", "https://example.com/dl/tool.gz");
        let body = crate::extract::archive::tests::gzip(b"#!/bin/sh\n");
        let count = extract(&options, &asset, "tool", &body, Reporter::new(true)).unwrap();

        assert_eq!(count, 1);
        assert_eq!(std::fs::read(dir.path().join("tool")).unwrap(), b"#!/bin/sh\n");
    }

    #[test]
    fn test_download_only_keeps_payload() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = options();
        options.download_only = true;
        options.output = Some(dir.path().to_string_lossy().into_owned());

        let asset = Asset::new("tool.tar.gz", "https://example.com/dl/tool.tar.gz");
        let count = extract(&options, &asset, "tool", b"opaque", Reporter::new(true)).unwrap();

        assert_eq!(count, 1);
        assert_eq!(std::fs::read(dir.path().join("tool.tar.gz")).unwrap(), b"opaque");
    }

    #[test]
    fn test_remove_installed() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = options();
        options.bin_dir = Some(dir.path().to_path_buf());
        std::fs::write(dir.path().join("tool"), b"bin").unwrap();

        let target = Target::parse("owner/tool").unwrap();
        remove_installed(&options, &target, Reporter::new(true)).unwrap();
        assert!(!dir.path().join("tool").exists());
        assert!(remove_installed(&options, &target, Reporter::new(true)).is_err());
    }
}
