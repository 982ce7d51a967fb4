//! CLI binary for edgequake-pdf2img.
//!
//! A thin shim over the library crate that maps CLI flags and the vault
//! settings file to `ConversionConfig` and prints the image embeds.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdf2img::pipeline::input::resolve_vault_link;
use edgequake_pdf2img::{
    convert, convert_link, extract_link_target, format_embeds, inspect, ConversionConfig,
    ConversionOutput, ConversionProgressCallback, FileNaming, OutputFormat, PageSelection,
    ProgressCallback, Settings,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar plus one log line per page.
/// Writes finish out of order, so per-page state is keyed by page number.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// The bar length is set by `on_conversion_start`.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);

        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Printing");
        self.bar.reset_eta();
    }

    fn elapsed(&self, page_num: usize) -> String {
        let elapsed_ms = self
            .start_times
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&page_num)
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);
        dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0))
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Printing {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        self.start_times
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(page_num, Instant::now());
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_rendered(&self, page_num: usize, _total: usize, width: u32, height: u32) {
        self.bar
            .set_message(format!("page {page_num} rendered {width}x{height}"));
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            self.elapsed(page_num),
        ));
        self.bar.inc(1);
    }

    fn on_page_written(&self, page_num: usize, total: usize, path: &str) {
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            green("✓"),
            page_num,
            total,
            dim(path),
            self.elapsed(page_num),
        ));
        self.bar.inc(1);
    }

    fn on_conversion_complete(&self, total_pages: usize, success_count: usize) {
        let failed = total_pages.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} pages printed",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} pages printed  ({} skipped)",
                if failed == total_pages {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_pages,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Print a PDF into the current vault; embeds go to stdout
  pdf2img papers/attention.pdf

  # Resolve a note link inside a vault
  pdf2img --vault ~/notes '![[attention.pdf]]'

  # JPEG at 3x into a dedicated folder, and remember these choices
  pdf2img --format jpeg --quality 0.8 --scale 3 --folder attachments/printed \
          --save-settings slides.pdf

  # Specific pages, transparent background
  pdf2img --pages 1-5 --transparent paper.pdf

  # Print from a URL
  pdf2img https://arxiv.org/pdf/1706.03762

  # Inspect PDF metadata
  pdf2img --inspect-only document.pdf

  # JSON output with per-page diagnostics
  pdf2img --json document.pdf > output.json

OUTPUT LAYOUT:
  {vault}/{folder}/{name}-{16 hex}/{name}-{page}.{ext}
  A new random folder is created for every run.

ENVIRONMENT VARIABLES:
  PDFIUM_LIB_PATH         Path to libpdfium; otherwise the system library is used
  PDF2IMG_VAULT           Vault root (default: current directory)
  RUST_LOG                Override log filtering
"#;

/// Print PDF pages into images stored next to your notes.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2img",
    version,
    about = "Print PDF pages into images stored next to your notes",
    long_about = "Render every page of a PDF (local file, URL, or ![[note link]]) to PNG or \
JPEG, write the images into a fresh folder inside your vault, and print Markdown embeds \
for them.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF path, HTTP/HTTPS URL, or a `![[document.pdf]]` link.
    input: String,

    /// Vault root; output paths and note links are relative to it.
    #[arg(short = 'r', long, env = "PDF2IMG_VAULT", default_value = ".")]
    vault: PathBuf,

    /// Settings file. Default: {vault}/.pdf2img.json
    #[arg(long, env = "PDF2IMG_SETTINGS")]
    settings: Option<PathBuf>,

    /// Write the effective preferences back to the settings file.
    #[arg(long)]
    save_settings: bool,

    /// Vault folder for printed images (overrides settings).
    #[arg(long, env = "PDF2IMG_FOLDER")]
    folder: Option<String>,

    /// Device pixels per PDF point, 0.1–10 (overrides settings).
    #[arg(long, env = "PDF2IMG_SCALE")]
    scale: Option<f32>,

    /// Lossy quality, 0–1 (overrides settings).
    #[arg(long, env = "PDF2IMG_QUALITY")]
    quality: Option<f32>,

    /// Image format (overrides settings).
    #[arg(long, env = "PDF2IMG_FORMAT", value_enum)]
    format: Option<FormatArg>,

    /// Embed line template with a ${filename} placeholder (overrides settings).
    #[arg(long, env = "PDF2IMG_EMBED_FORMAT")]
    embed_format: Option<String>,

    /// Keep the PDF link above the printed images (overrides settings).
    #[arg(long)]
    preserve_link: bool,

    /// Keep page backgrounds transparent.
    #[arg(long, env = "PDF2IMG_TRANSPARENT")]
    transparent: bool,

    /// File name template; must contain {page}.
    #[arg(long, env = "PDF2IMG_NAMING", default_value = "{name}-{page}.{ext}")]
    naming: String,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "PDF2IMG_PAGES", default_value = "all")]
    pages: String,

    /// Longest rendered edge in pixels.
    #[arg(long, env = "PDF2IMG_MAX_PIXELS", default_value_t = 10_000)]
    max_pixels: u32,

    /// Concurrent encode and write tasks.
    #[arg(short, long, env = "PDF2IMG_CONCURRENCY", default_value_t = 8)]
    concurrency: usize,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2IMG_PASSWORD")]
    password: Option<String>,

    /// Path to the pdfium shared library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Fail if any page was skipped, not only if all were.
    #[arg(long)]
    strict: bool,

    /// Output structured JSON (ConversionOutput) instead of embeds.
    #[arg(long, env = "PDF2IMG_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2IMG_NO_PROGRESS")]
    no_progress: bool,

    /// Print PDF metadata only, no rendering.
    #[arg(long)]
    inspect_only: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2IMG_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2IMG_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDF2IMG_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Png,
    Jpeg,
}

impl From<FormatArg> for OutputFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Png => OutputFormat::Png,
            FormatArg::Jpeg => OutputFormat::Jpeg,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.inspect_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Settings ─────────────────────────────────────────────────────────
    let settings_path = cli
        .settings
        .clone()
        .unwrap_or_else(|| Settings::path_in(&cli.vault));
    let settings = merge_settings(
        &cli,
        Settings::load(&settings_path).context("Failed to load settings")?,
    );
    if cli.save_settings {
        settings
            .save(&settings_path)
            .context("Failed to save settings")?;
        if !cli.quiet {
            eprintln!("{} settings saved to {}", dim("·"), settings_path.display());
        }
    }

    let is_link = cli.input.contains("![[");

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let source = if is_link {
            let target = extract_link_target(&cli.input)?;
            resolve_vault_link(&cli.vault, &target)?
                .to_string_lossy()
                .into_owned()
        } else {
            cli.input.clone()
        };
        let config = build_config(&cli, &settings, None)?;
        let meta = inspect(&source, &config)
            .await
            .context("Failed to inspect PDF")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&meta).context("Failed to serialize metadata")?
            );
        } else {
            println!("File:         {}", source);
            if let Some(ref t) = meta.title {
                println!("Title:        {}", t);
            }
            if let Some(ref a) = meta.author {
                println!("Author:       {}", a);
            }
            if let Some(ref s) = meta.subject {
                println!("Subject:      {}", s);
            }
            println!("Pages:        {}", meta.page_count);
            println!("PDF Version:  {}", meta.pdf_version);
            println!("Size:         {} bytes", meta.byte_size);
            if let Some(ref p) = meta.producer {
                println!("Producer:     {}", p);
            }
            if let Some(ref c) = meta.creator {
                println!("Creator:      {}", c);
            }
        }
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, &settings, progress_cb)?;

    // ── Run conversion ───────────────────────────────────────────────────
    let output = if is_link {
        convert_link(&cli.input, &config).await
    } else {
        convert(&cli.input, &config).await
    }
    .context("Conversion failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else {
        let original_link = if is_link {
            cli.input.trim().to_string()
        } else {
            format!("![[{}]]", cli.input.trim())
        };
        let text = format_embeds(
            &output.manifest,
            &settings.embed_options(),
            Some(&original_link),
        );
        if !text.is_empty() {
            println!("{text}");
        }
    }

    if !cli.quiet && !show_progress && !cli.json {
        print_summary(&output);
    }

    // All pages skipped is a failed run for the shell, even though the
    // library reports it as Done.
    if cli.strict {
        output
            .into_strict_result()
            .context("Some pages could not be printed")?;
    } else {
        output.into_result().context("No page could be printed")?;
    }

    Ok(())
}

fn print_summary(output: &ConversionOutput) {
    let stats = &output.stats;
    let namespace = output
        .manifest
        .namespace
        .as_deref()
        .unwrap_or("(nothing written)");
    eprintln!(
        "{}  {}/{} pages  {}ms  →  {}",
        if stats.skipped_pages == 0 {
            green("✔")
        } else {
            cyan("⚠")
        },
        stats.written_pages,
        stats.selected_pages,
        stats.total_duration_ms,
        bold(namespace),
    );
    for page in output.pages.iter().filter(|p| p.error.is_some()) {
        if let Some(ref e) = page.error {
            eprintln!("   {} {}", red("✗"), e);
        }
    }
}

/// Layer CLI overrides on top of the stored settings.
fn merge_settings(cli: &Cli, mut settings: Settings) -> Settings {
    if let Some(ref folder) = cli.folder {
        settings.image_folder = folder.clone();
    }
    if let Some(quality) = cli.quality {
        settings.image_quality = quality;
    }
    if let Some(scale) = cli.scale {
        settings.scale = scale;
    }
    if let Some(format) = cli.format {
        settings.image_format = format.into();
    }
    if let Some(ref template) = cli.embed_format {
        settings.image_embed_format = template.clone();
    }
    if cli.preserve_link {
        settings.preserve_pdf_link = true;
    }
    settings.normalized()
}

/// Map CLI args and settings to `ConversionConfig`.
fn build_config(
    cli: &Cli,
    settings: &Settings,
    progress: Option<ProgressCallback>,
) -> Result<ConversionConfig> {
    let pages = parse_pages(&cli.pages)?;
    let naming = FileNaming::new(&cli.naming).context("Invalid --naming template")?;

    let mut builder = settings
        .apply(ConversionConfig::builder())
        .output_root(&cli.vault)
        .naming(naming)
        .pages(pages)
        .transparent(cli.transparent)
        .max_rendered_pixels(cli.max_pixels)
        .concurrency(cli.concurrency)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd);
    }
    if let Some(ref lib) = cli.pdfium_lib {
        builder = builder.pdfium_library(lib);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--pages` string into `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    // Range: "3-15"
    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start
            .trim()
            .parse()
            .context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;

        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!(
                "Invalid page range '{}-{}': start must be <= end",
                start,
                end
            );
        }

        return Ok(PageSelection::Range(start, end));
    }

    // Set: "1,3,5,7"
    if s.contains(',') {
        let pages: Vec<usize> = s
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<usize>()
                    .context(format!("Invalid page number: '{}'", p.trim()))
            })
            .collect::<Result<Vec<_>>>()?;

        if let Some(&p) = pages.iter().find(|&&p| p < 1) {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", p);
        }

        return Ok(PageSelection::Set(pages));
    }

    // Single page: "5"
    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }

    Ok(PageSelection::Single(page))
}
