use std::fs::{self, File};
use std::io::{self, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser};
use clap_complete::{generate, Shell};
use pws_crawler::{
    extract, sink_for, CancelToken, Crawler, CrawlerConfig, OnError, Url,
};
use pws_scraper::{ListingSpec, TargetSpec};
use tokio::runtime;

/// Paginated Web Scraper
#[derive(Debug, Parser)]
#[clap(version)]
pub struct Args {
    #[clap(subcommand)]
    pub cmd: SubCommand,
}

#[derive(Debug, clap::Subcommand)]
pub enum SubCommand {
    #[clap(name = "crawl")]
    Crawl(CrawlArgs),
    #[clap(name = "scrap")]
    Scrap(ScrapArgs),
    #[clap(hide = true)]
    Completion,
}

/// Crawl every listing of a target and write their records
#[derive(Debug, clap::Args)]
pub struct CrawlArgs {
    /// Path to the yaml file that describes the target site
    #[clap(long, short)]
    pub target: PathBuf,
    /// Directory where listing outputs are written
    #[clap(long, short, default_value = ".")]
    pub output_dir: PathBuf,
    /// Optional crawler yaml configuration file, replaces the target's one
    #[clap(env = "PWS_CRAWLER_CONFIG", long)]
    pub crawler_config: Option<PathBuf>,
    /// Override crawler's user agents with a single one
    #[clap(long)]
    pub user_agent: Option<String>,
    /// Override crawler's maximum attempts per request
    #[clap(long)]
    pub max_attempts: Option<NonZeroUsize>,
    /// Override crawler's per attempt timeout
    #[clap(long)]
    pub timeout_ms: Option<u64>,
    /// Override every listing's page cap
    #[clap(long)]
    pub max_pages: Option<NonZeroUsize>,
    /// Override crawler's random seed
    #[clap(long)]
    pub seed: Option<u64>,
    /// Override crawler's partial results handling strategy
    #[clap(value_enum, long)]
    pub on_partial: Option<OnError>,
    /// Crawl listings concurrently
    #[clap(long)]
    pub parallel: bool,
    /// No SIGINT handling, an interrupted crawl writes nothing
    #[clap(long)]
    pub no_sigint: bool,
    /// When quiet no logs are outputted
    #[clap(long, short)]
    pub quiet: bool,
}

impl CrawlArgs {
    /// The target's crawler section, or `--crawler-config`, with flags applied.
    pub fn crawler_conf(&self, target: &TargetSpec) -> anyhow::Result<CrawlerConfig> {
        let mut conf = if let Some(file) = self.crawler_config.as_ref().map(File::open) {
            serde_yaml::from_reader(file?)?
        } else {
            target.crawler.clone().unwrap_or_default()
        };
        if let Some(user_agent) = &self.user_agent {
            conf.user_agents = vec![user_agent.to_string()];
        }
        if let Some(max_attempts) = self.max_attempts {
            conf.max_attempts = max_attempts;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            conf.timeout_ms = timeout_ms;
        }
        if let Some(seed) = self.seed {
            conf.seed = Some(seed);
        }
        if let Some(on_partial) = self.on_partial {
            conf.on_partial = on_partial;
        }
        Ok(conf)
    }
}

pub fn crawl(args: CrawlArgs) -> anyhow::Result<()> {
    let target = TargetSpec::from_path(&args.target)?;
    let crawler_conf = args.crawler_conf(&target)?;
    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    rt.block_on(crawl_target(&args, crawler_conf, &target))
}

async fn crawl_target(
    args: &CrawlArgs,
    crawler_conf: CrawlerConfig,
    target: &TargetSpec,
) -> anyhow::Result<()> {
    let base = target.base()?;
    let on_partial = crawler_conf.on_partial;
    let crawler = Crawler::new(crawler_conf)?.with_referer(base.as_str());

    let cancel = CancelToken::new();
    if !args.no_sigint {
        cancel.cancel_on_ctrl_c();
    }

    if let Some(url) = target.warmup_url()? {
        let mut session = crawler.session();
        crawler.warmup(&mut session, url.as_str(), &cancel).await;
    }

    let jobs = target.listings.iter().map(|spec| {
        crawl_listing(&crawler, spec, &base, args, on_partial, &cancel)
    });
    let results = if args.parallel {
        futures::future::join_all(jobs).await
    } else {
        let mut results = vec![];
        for job in jobs {
            results.push(job.await);
        }
        results
    };

    let mut failed = 0;
    for (spec, res) in target.listings.iter().zip(results) {
        if let Err(e) = res {
            log::error!("Listing {} failed: {e:#}", spec.name);
            failed += 1;
        }
    }
    if failed > 0 {
        anyhow::bail!("{failed}/{} listings failed", target.listings.len());
    }
    Ok(())
}

async fn crawl_listing(
    crawler: &Crawler,
    spec: &ListingSpec,
    base: &Url,
    args: &CrawlArgs,
    on_partial: OnError,
    cancel: &CancelToken,
) -> anyhow::Result<()> {
    let mut listing = spec.build(base)?;
    if let Some(max_pages) = args.max_pages {
        listing.policy.max_pages = Some(max_pages);
    }
    let detail = match &spec.detail {
        Some(detail) => Some((detail.build(base)?, detail.sample)),
        None => None,
    };

    let output = crawler
        .run(
            &listing,
            detail.as_ref().map(|(target, sample)| (target, *sample)),
            cancel,
        )
        .await;

    let dest = spec.output_path(&args.output_dir);
    sink_for(&dest).write(&output.records, &dest)?;
    log::info!(
        "Wrote {} records of {} to {}",
        output.records.len(),
        spec.name,
        dest.display()
    );

    output.report.ensure(on_partial)
}

/// Extract the records of a single listing page and print them to stdout
#[derive(Debug, clap::Args)]
#[clap(group = clap::ArgGroup::new("page").required(true))]
pub struct ScrapArgs {
    /// Path to the yaml file that describes the target site
    #[clap(long, short)]
    pub target: PathBuf,
    /// Name of the listing whose item selector and fields are used
    #[clap(long, short)]
    pub listing: String,
    /// A local html page to scrap
    #[clap(group = "page", long)]
    pub file: Option<PathBuf>,
    /// A distant html page to scrap, relative to the target base url or absolute
    #[clap(group = "page", long)]
    pub url: Option<String>,
    /// Custom user agent to download the page
    #[clap(long, conflicts_with = "file")]
    pub ua: Option<String>,
}

pub fn scrap(args: ScrapArgs) -> anyhow::Result<()> {
    let target = TargetSpec::from_path(&args.target)?;
    let base = target.base()?;
    let listing = target.listing(&args.listing)?.build(&base)?;

    let page = if let Some(url) = args.url {
        let mut builder = reqwest::blocking::ClientBuilder::new();
        if let Some(ua) = args.ua {
            builder = builder.user_agent(ua);
        }
        let client = builder.build()?;
        client
            .get(base.join(&url)?)
            .send()?
            .error_for_status()?
            .text()?
    } else if let Some(path) = args.file {
        read_page(&path)?
    } else {
        anyhow::bail!("Missing `url` or `file`");
    };

    let records = listing
        .parser
        .items(&page)
        .iter()
        .map(|fragment| extract(&listing.schema, fragment))
        .collect::<Vec<_>>();

    let mut out = io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, &records)?;
    writeln!(out)?;
    Ok(())
}

fn read_page(path: &Path) -> anyhow::Result<String> {
    fs::read_to_string(path).map_err(|e| anyhow::anyhow!("Couldn't read {}: {e}", path.display()))
}

fn init_logs(default_filter: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.cmd {
        SubCommand::Crawl(args) => {
            if !args.quiet {
                init_logs("pws_crawler=info,pws_scraper=warn,pws=info");
            }
            crawl(args)
        }
        SubCommand::Scrap(args) => {
            init_logs("pws_crawler=warn,pws_scraper=warn");
            scrap(args)
        }
        SubCommand::Completion => {
            generate(Shell::Bash, &mut Args::command(), "pws", &mut io::stdout());
            Ok(())
        }
    }
}
