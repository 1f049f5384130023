//! Exposes the command line application.
use std::fs;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use url::Url;

use presently_service::caching::CachePackage;
use presently_service::config::Config;
use presently_service::documents::{
    FutureDocumentFromFilesystem, FutureDocumentFromUri, GeneralDocumentFuture, SourceDocument,
};
use presently_service::metrics;
use presently_service::pipeline::AsyncRef;

use crate::logging;

/// Presently commands.
#[derive(Subcommand)]
enum Command {
    /// Fetch documents through the document caches.
    Fetch(FetchArgs),

    /// Print the XML description of a document.
    Describe {
        #[command(flatten)]
        document: DocumentArgs,

        /// Write file system paths relative to this directory.
        #[arg(long, value_name = "DIR")]
        base: Option<PathBuf>,
    },

    /// Print the cache key of a document description.
    Hash {
        /// Path to the XML description.
        #[arg(value_name = "FILE")]
        description: PathBuf,

        /// Also print the hashed metadata.
        #[arg(long, short)]
        verbose: bool,
    },
}

#[derive(Args)]
struct DocumentArgs {
    /// A file system path or an URI.
    #[arg(value_name = "DOCUMENT")]
    document: String,

    /// The page of the document.
    #[arg(long, short, default_value_t = 0)]
    page: u32,
}

impl DocumentArgs {
    fn future(&self) -> Result<GeneralDocumentFuture> {
        parse_document(&self.document, self.page)
    }
}

#[derive(Args)]
struct FetchArgs {
    /// File system paths or URIs of the documents.
    #[arg(value_name = "DOCUMENT", required = true)]
    documents: Vec<String>,

    /// The page of the documents.
    #[arg(long, short, default_value_t = 0)]
    page: u32,

    /// Fetch on the compute scheduler instead of the calling thread.
    #[arg(long = "async")]
    asynchronous: bool,

    /// Raise the priority of the n-th document (zero based) on the scheduler.
    ///
    /// Given as `INDEX=DELTA`, may be repeated.
    #[arg(long = "priority", value_name = "INDEX=DELTA", value_parser = parse_priority)]
    priorities: Vec<(usize, i32)>,
}

/// Command line interface parser.
#[derive(Parser)]
#[command(version, bin_name = "presently")]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Interprets `document` as an URI if it has a scheme, and as a path otherwise.
fn parse_document(document: &str, page: u32) -> Result<GeneralDocumentFuture> {
    match Url::parse(document) {
        // single letter schemes are windows drive letters
        Ok(uri) if uri.scheme().len() > 1 => Ok(GeneralDocumentFuture::new(
            FutureDocumentFromUri::new(uri, page),
        )),
        _ => {
            let future = FutureDocumentFromFilesystem::new(document, page)
                .with_context(|| format!("invalid document path `{document}`"))?;
            Ok(GeneralDocumentFuture::new(future))
        }
    }
}

fn parse_priority(value: &str) -> Result<(usize, i32)> {
    let (index, delta) = value
        .split_once('=')
        .context("expected a priority as INDEX=DELTA")?;
    let index = index.parse().context("invalid document index")?;
    let delta = delta.parse().context("invalid priority delta")?;
    Ok((index, delta))
}

fn print_document(out: &mut impl Write, document: &SourceDocument) -> io::Result<()> {
    writeln!(
        out,
        "{} (page {}): {} bytes",
        document.location,
        document.page_number,
        document.bytes.len()
    )
}

fn fetch(package: &CachePackage, args: &FetchArgs) -> Result<()> {
    let documents = args
        .documents
        .iter()
        .map(|document| parse_document(document, args.page))
        .collect::<Result<Vec<_>>>()?;

    let mut stdout = io::stdout().lock();
    if !args.asynchronous {
        for document in &documents {
            let fetched = document.realize_synchronously(package)?;
            print_document(&mut stdout, &fetched)?;
        }
        return Ok(());
    }

    let presents: Vec<_> = documents
        .iter()
        .map(|document| {
            document
                .get_asynchronous_future(package)
                .realize("presently::fetch")
        })
        .collect();
    let refs = presents
        .iter()
        .map(|present| present.as_async_ref().context("expected an asynchronous result"))
        .collect::<Result<Vec<&AsyncRef>>>()?;

    for &(index, delta) in &args.priorities {
        let async_ref = refs
            .get(index)
            .with_context(|| format!("no document at index {index}"))?;
        async_ref.change_priority(delta);
    }

    let completed = futures::executor::block_on(futures::future::join_all(
        refs.iter().map(|async_ref| async_ref.completion()),
    ));
    for completed in completed {
        let completed = completed.context("scheduler stopped before the document was fetched")?;
        let fetched = completed.wait().into_typed::<SourceDocument>()?;
        print_document(&mut stdout, &fetched)?;
    }
    Ok(())
}

fn describe(document: &DocumentArgs, base: Option<&Path>) -> Result<()> {
    let future = document.future()?;
    let base = match base {
        Some(base) => std::path::absolute(base)?,
        None => std::env::current_dir()?,
    };
    let mut stdout = io::stdout().lock();
    future.write_xml(&mut stdout, &base)?;
    writeln!(stdout)?;
    Ok(())
}

fn hash(description: &Path, verbose: bool) -> Result<()> {
    let file = fs::File::open(description)
        .with_context(|| format!("failed to open `{}`", description.display()))?;
    let base = std::path::absolute(description)?
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let document = GeneralDocumentFuture::parse(BufReader::new(file), &base)
        .with_context(|| format!("invalid description `{}`", description.display()))?;

    let key = document.robust_hash();
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", key.hex())?;
    if verbose {
        write!(stdout, "{}", key.metadata())?;
    }
    Ok(())
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        ..Default::default()
    });

    // SAFETY: Nothing else has been spawned at this point.
    unsafe { logging::init_logging(&config) };
    if let Some(ref statsd) = config.metrics.statsd {
        metrics::configure_statsd(
            &config.metrics.prefix,
            statsd.as_str(),
            config.metrics.custom_tags.clone(),
        )
        .context("failed to configure statsd")?;
    }

    match cli.command {
        Command::Fetch(args) => {
            let package = CachePackage::new(&config).context("failed to start the scheduler")?;
            let result = fetch(&package, &args);
            package.shutdown();
            result?
        }
        Command::Describe { document, base } => describe(&document, base.as_deref())?,
        Command::Hash {
            description,
            verbose,
        } => hash(&description, verbose)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use presently_service::documents::DocumentFuture;

    use super::*;

    #[test]
    fn test_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_document() {
        let document = parse_document("https://example.com/city.pdf", 2).unwrap();
        let DocumentFuture::Uri(future) = document.document_future() else {
            panic!("expected an URI document");
        };
        assert_eq!(future.uri().as_str(), "https://example.com/city.pdf");
        assert_eq!(future.page_number(), 2);

        let document = parse_document("/maps/city.pdf", 0).unwrap();
        let DocumentFuture::Filesystem(future) = document.document_future() else {
            panic!("expected a file system document");
        };
        assert_eq!(future.path(), Path::new("/maps/city.pdf"));
    }

    #[test]
    fn test_parse_priority() {
        assert_eq!(parse_priority("2=-5").unwrap(), (2, -5));
        assert!(parse_priority("2").is_err());
        assert!(parse_priority("x=1").is_err());
    }

    #[test]
    fn test_fetch_args() {
        let cli = Cli::parse_from([
            "presently",
            "fetch",
            "--async",
            "--priority",
            "1=10",
            "a.pdf",
            "b.pdf",
        ]);
        let Command::Fetch(args) = cli.command else {
            panic!("expected the fetch command");
        };
        assert!(args.asynchronous);
        assert_eq!(args.priorities, [(1, 10)]);
        assert_eq!(args.documents, ["a.pdf", "b.pdf"]);
    }
}
