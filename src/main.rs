mod cache;
mod config;
mod dashboard;
mod logging;
mod net;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;

use cache::{CacheStorage, Interceptor, MemoryStorage, SqliteStorage};
use dashboard::{CacheSource, DashboardClient, Fetched};
use net::HttpFetcher;

#[derive(Parser, Debug)]
#[command(name = "mgnrega-offline")]
#[command(about = "Offline cache for the Maharashtra MGNREGA district dashboard")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/mgnrega-offline/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Dashboard origin, e.g. https://mgnrega.example.in
  #[arg(short, long)]
  origin: Option<String>,

  /// Keep the cache in memory for this run only
  #[arg(long)]
  ephemeral: bool,

  /// Also log to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-cache the app shell, then activate
  Install,
  /// Remove partitions from other cache versions
  Activate,
  /// Send one GET through the interceptor and print the response
  Fetch {
    /// Path on the origin (e.g. /api/districts) or absolute URL
    target: String,
    /// Print status line and headers before the body
    #[arg(short, long)]
    include: bool,
  },
  /// Fetch a dashboard resource and print it as JSON
  Get {
    resource: Resource,
    /// District id (required for everything except `districts`)
    id: Option<u32>,
  },
  /// List cache partitions and their entry counts
  Partitions,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Resource {
  Districts,
  District,
  Performance,
  Trends,
  Compare,
  Alerts,
}

impl Resource {
  fn district_id(self, id: Option<u32>) -> Result<u32> {
    id.ok_or_else(|| eyre!("A district id is required for {:?}", self))
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override origin if specified on command line
  let config = if let Some(origin) = args.origin.clone() {
    config::Config { origin, ..config }
  } else {
    config
  };

  let _guard = logging::init(&config::data_dir()?.join("logs"), args.verbose)?;

  if args.ephemeral {
    run(MemoryStorage::new(), &config, args.command).await
  } else {
    let storage = SqliteStorage::open(&config.database_path()?)?;
    run(storage, &config, args.command).await
  }
}

async fn run<S: CacheStorage + 'static>(
  storage: S,
  config: &config::Config,
  command: Command,
) -> Result<()> {
  let fetcher = HttpFetcher::new(config.fetch_timeout())?;
  let interceptor = Interceptor::new(storage, fetcher, config.origin_url()?)
    .with_partitions(config.partition_names())
    .with_classifier(config.classifier.clone())
    .with_freshness_window(config.freshness_window())
    .with_seed_urls(config.cache.seed_urls.clone());

  match command {
    Command::Install => {
      let cached = interceptor.install().await?;
      println!(
        "Cached {} documents in {}",
        cached,
        interceptor.partitions().static_assets
      );
      report_removed(&interceptor.activate()?);
    }
    Command::Activate => {
      report_removed(&interceptor.activate()?);
    }
    Command::Fetch { target, include } => {
      interceptor.activate()?;
      let request = interceptor.request(&target)?;
      let response = interceptor.handle(&request).await?;

      let mut stdout = std::io::stdout().lock();
      if include {
        writeln!(stdout, "{} {}", response.status, response.status_text)?;
        for (name, value) in &response.headers {
          writeln!(stdout, "{}: {}", name, value)?;
        }
        writeln!(stdout)?;
      }
      stdout.write_all(&response.body)?;
      stdout.flush()?;
    }
    Command::Get { resource, id } => {
      interceptor.activate()?;
      let client = DashboardClient::new(interceptor);
      match resource {
        Resource::Districts => print_fetched(client.districts().await?)?,
        Resource::District => print_fetched(client.district(resource.district_id(id)?).await?)?,
        Resource::Performance => {
          print_fetched(client.performance(resource.district_id(id)?).await?)?
        }
        Resource::Trends => print_fetched(client.trends(resource.district_id(id)?).await?)?,
        Resource::Compare => print_fetched(client.compare(resource.district_id(id)?).await?)?,
        Resource::Alerts => print_fetched(client.alerts(resource.district_id(id)?).await?)?,
      }
    }
    Command::Partitions => {
      let storage = interceptor.storage();
      for name in storage.partitions()? {
        let marker = if interceptor.partitions().contains(&name) {
          "*"
        } else {
          " "
        };
        println!("{} {:<32} {:>6}", marker, name, storage.entry_count(&name)?);
      }
    }
  }

  Ok(())
}

/// Pretty-print a payload, noting on stderr when it came from the cache.
fn print_fetched<T: Serialize>(fetched: Fetched<T>) -> Result<()> {
  if let CacheSource::Cache { cached_at } = fetched.source {
    eprintln!("(cached {})", cached_at.format("%Y-%m-%d %H:%M UTC"));
  }
  println!("{}", serde_json::to_string_pretty(&fetched.data)?);
  Ok(())
}

fn report_removed(removed: &[String]) {
  if removed.is_empty() {
    println!("No outdated partitions");
  }
  for name in removed {
    println!("Removed outdated partition {}", name);
  }
}
