use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use miniapp_sandbox::{
    config::{
        errors::{ERR_CLI_RUNTIME, ERR_CLI_UNKNOWN_SLUG, ERR_CLI_USAGE},
        paths::{CATALOG_FILE, DEFAULT_MOUNT_PREFIX},
    },
    init_tracing_subsystem, AssetFetcher, Catalog, DirectoryFetcher, EventTarget, HttpFetcher,
    MiniAppLoader, SandboxConfig, TracingSink,
};
use serde_json::json;

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_tracing_subsystem();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("miniapp-run: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn print_usage() {
    eprintln!(
        "Usage:\n  miniapp-run list --dir <apps-dir>\n  miniapp-run load --dir <apps-dir> --slug <slug> \
         [--origin <http-origin>] [--advance <ms>] [--resize <w>x<h>] [--fullscreen <dpr>] [--event <type>]"
    );
}

fn run() -> Result<()> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        print_usage();
        return Err(anyhow!("{ERR_CLI_USAGE}: missing command"));
    }
    let cmd = args.remove(0);
    match cmd.as_str() {
        "list" => list_cmd(&Options::parse(&args)?),
        "load" => load_cmd(Options::parse(&args)?),
        "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => Err(anyhow!("{ERR_CLI_USAGE}: unknown command '{other}'")),
    }
}

#[derive(Debug, Default)]
struct Options {
    dir: Option<PathBuf>,
    slug: Option<String>,
    origin: Option<String>,
    advance_ms: u64,
    resize: Option<(u32, u32)>,
    fullscreen: Option<f64>,
    events: Vec<String>,
}

impl Options {
    fn parse(args: &[String]) -> Result<Self> {
        let mut opts = Options::default();
        let mut idx = 0usize;
        while idx < args.len() {
            let flag = args[idx].as_str();
            idx += 1;
            let value = args
                .get(idx)
                .with_context(|| format!("{ERR_CLI_USAGE}: {flag} expects a value"));
            match flag {
                "--dir" => opts.dir = Some(PathBuf::from(value?)),
                "--slug" => opts.slug = Some(value?.clone()),
                "--origin" => opts.origin = Some(value?.clone()),
                "--advance" => {
                    opts.advance_ms = value?
                        .parse()
                        .with_context(|| format!("{ERR_CLI_USAGE}: --advance expects milliseconds"))?
                }
                "--resize" => {
                    let raw = value?;
                    let (w, h) = raw
                        .split_once('x')
                        .with_context(|| format!("{ERR_CLI_USAGE}: --resize expects <w>x<h>"))?;
                    opts.resize = Some((
                        w.parse().context("width")?,
                        h.parse().context("height")?,
                    ));
                }
                "--fullscreen" => {
                    opts.fullscreen = Some(
                        value?
                            .parse()
                            .with_context(|| format!("{ERR_CLI_USAGE}: --fullscreen expects a ratio"))?,
                    )
                }
                "--event" => opts.events.push(value?.clone()),
                other => return Err(anyhow!("{ERR_CLI_USAGE}: unexpected flag '{other}'")),
            }
            idx += 1;
        }
        Ok(opts)
    }

    fn dir(&self) -> Result<&PathBuf> {
        self.dir
            .as_ref()
            .with_context(|| format!("{ERR_CLI_USAGE}: --dir is required"))
    }
}

fn catalog_for(dir: &Path) -> Result<Catalog> {
    let manifest = dir.join(CATALOG_FILE);
    let catalog = if manifest.is_file() {
        Catalog::load(&manifest)?
    } else {
        Catalog::discover(dir, DEFAULT_MOUNT_PREFIX)?
    };
    Ok(catalog)
}

fn list_cmd(opts: &Options) -> Result<()> {
    let catalog = catalog_for(opts.dir()?)?;
    println!("{}", serde_json::to_string_pretty(catalog.entries())?);
    Ok(())
}

fn load_cmd(opts: Options) -> Result<()> {
    let dir = opts.dir()?.clone();
    let slug = opts
        .slug
        .clone()
        .with_context(|| format!("{ERR_CLI_USAGE}: --slug is required"))?;
    let catalog = catalog_for(&dir)?;
    let descriptor = catalog
        .descriptor(&slug)
        .with_context(|| format!("{ERR_CLI_UNKNOWN_SLUG}: no mini-app named '{slug}'"))?;

    let mut config = SandboxConfig::from_env();
    let fetcher: Arc<dyn AssetFetcher> = match opts.origin.clone() {
        Some(origin) => {
            config.http_origin = origin;
            Arc::new(HttpFetcher::new(&config)?)
        }
        None => Arc::new(DirectoryFetcher::new(&dir)),
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .with_context(|| format!("{ERR_CLI_RUNTIME}: failed to start runtime"))?;
    let loader = MiniAppLoader::new(fetcher, Box::new(TracingSink), config);
    runtime.block_on(loader.select(descriptor));

    if let Some(ratio) = opts.fullscreen {
        loader.set_fullscreen(Some(ratio));
    }
    let advanced = loader.advance(opts.advance_ms);
    let resized = opts.resize.map(|(w, h)| loader.resize(w, h));
    let dispatched: Vec<_> = opts
        .events
        .iter()
        .map(|event| loader.dispatch_event(EventTarget::Window, event))
        .collect();

    let summary = json!({
        "slug": slug,
        "phase": loader.phase(),
        "ticket": loader.current_ticket(),
        "scripts": loader.last_report(),
        "advanced": advanced,
        "resized": resized,
        "dispatched": dispatched,
        "html": loader.root_html(),
        "console": loader.console(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
