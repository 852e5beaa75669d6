use clap::{ArgAction, Parser};

fn get_version() -> &'static str {
    // A git tag at HEAD marks a release build
    if let Some(tag) = option_env!("RELGET_GIT_TAG") {
        return tag;
    }

    match option_env!("RELGET_GIT_COMMIT") {
        Some(commit) => {
            let version = format!("v{}-{}", env!("CARGO_PKG_VERSION"), commit);
            Box::leak(version.into_boxed_str())
        }
        None => env!("CARGO_PKG_VERSION"),
    }
}

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "relget")]
#[command(about = "Download, verify and unpack pre-built binaries from GitHub releases")]
#[command(version = get_version())]
#[command(after_help = "Examples:\n  relget BurntSushi/ripgrep\n  relget -a ^musl --to ~/.local/bin sharkdp/fd\n  relget zyedidia/micro@v2.0.10 -f '*.1'\n  relget https://example.com/tool-linux-amd64.tar.gz")]
pub struct Cli {
    /// owner/repo[@tag], a GitHub repository URL, a download URL or a local file
    pub target: Option<String>,

    /// Tagged release to use instead of latest
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Include pre-releases when fetching the latest version
    #[arg(long)]
    pub pre_release: bool,

    /// Move to given location after extracting ('-' for stdout)
    #[arg(long)]
    pub to: Option<String>,

    /// Target system to download for (os/arch, or "all" for all choices)
    #[arg(short, long)]
    pub system: Option<String>,

    /// Glob to select files for extraction
    #[arg(short, long)]
    pub file: Option<String>,

    /// Extract all candidate files
    #[arg(long)]
    pub all: bool,

    /// Only print essential output
    #[arg(short, long)]
    pub quiet: bool,

    /// Increase verbosity (use multiple times for more detail)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Stop after downloading the asset (no extraction)
    #[arg(short, long)]
    pub download_only: bool,

    /// Only download if the release is more recent than the installed binary
    #[arg(long)]
    pub upgrade_only: bool,

    /// Download a specific asset containing the given string; repeat for additional filtering; prefix with ^ or ! to exclude
    #[arg(short, long, action = ArgAction::Append, allow_hyphen_values = true)]
    pub asset: Vec<String>,

    /// Show the SHA-256 hash of the downloaded asset
    #[arg(short = 'H', long, visible_alias = "sha256")]
    pub hash: bool,

    /// Verify the downloaded asset against the given SHA-256 digest
    #[arg(long, value_name = "HASH")]
    pub verify_sha256: Option<String>,

    /// Remove the given file from $RELGET_BIN or the current directory
    #[arg(short, long)]
    pub remove: bool,

    /// Download all repositories defined in the config file
    #[arg(short = 'D', long)]
    pub download_all: bool,

    /// Download the source code for the target repo instead of a release
    #[arg(long)]
    pub source: bool,

    /// Do not prompt for user input; fail when a choice is ambiguous
    #[arg(long)]
    pub no_interaction: bool,

    /// Do not show download progress
    #[arg(long)]
    pub no_progress: bool,

    /// How long a repository cache entry stays valid
    #[arg(long, value_name = "HOURS")]
    pub cache_ttl_hours: Option<u64>,
}
