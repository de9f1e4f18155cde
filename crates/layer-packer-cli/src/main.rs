use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use globset::{Glob, GlobSetBuilder};
use layer_packer_core::prelude::*;
use serde::Deserialize;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(
    name = "layer-packer",
    about = "Pack images into layered texture arrays",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action=ArgAction::Count, global=true, help_heading = "Logging/UX")]
    verbose: u8,
    /// Quiet mode (overrides verbose)
    #[arg(
        short,
        long,
        default_value_t = false,
        global = true,
        help_heading = "Logging/UX"
    )]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build texture arrays: one PNG per layer plus a JSON layout
    Build(BuildArgs),
    /// Plan only: probe image sizes, place them and export the layout JSON (no pixels)
    Plan(PlanArgs),
}

#[derive(Parser, Debug, Clone)]
struct InputArgs {
    /// Manifest (.yaml/.yml/.json), image directory or single image
    #[arg(help_heading = "Input")]
    input: PathBuf,
    /// Include patterns (glob) for directory input
    #[arg(long, help_heading = "Input")]
    include: Vec<String>,
    /// Exclude patterns (glob) for directory input
    #[arg(long, help_heading = "Input")]
    exclude: Vec<String>,
    /// Directory input: images in the same folder share one layer
    #[arg(long, default_value_t = false, help_heading = "Input")]
    group_by_dir: bool,

    /// Number of texture units (arrays) available
    #[arg(long, help_heading = "Limits")]
    units: Option<u32>,
    /// Maximum layers per array
    #[arg(long, help_heading = "Limits")]
    layers: Option<u32>,
    /// Maximum layer width and height
    #[arg(long, help_heading = "Limits")]
    max_size: Option<u32>,
    /// Free-space cell size in pixels
    #[arg(long, help_heading = "Limits")]
    cell_size: Option<u32>,
}

#[derive(Parser, Debug, Clone)]
struct BuildArgs {
    #[command(flatten)]
    input: InputArgs,
    /// Output directory
    #[arg(short, long, default_value = "out", help_heading = "Output")]
    out_dir: PathBuf,
    /// Base name (files will be name_u<unit>_z<layer>.png and name.json)
    #[arg(short, long, default_value = "layers", help_heading = "Output")]
    name: String,
    /// Draw red outlines around uploaded regions (debug)
    #[arg(long, default_value_t = false, help_heading = "Output")]
    outlines: bool,
    /// Compute and upload but do not write files
    #[arg(long, default_value_t = false, help_heading = "Output")]
    dry_run: bool,
    /// Exit with an error if any request is left unplaced
    #[arg(long, default_value_t = false, help_heading = "Output")]
    strict: bool,
}

#[derive(Parser, Debug, Clone)]
struct PlanArgs {
    #[command(flatten)]
    input: InputArgs,
    /// Write the layout JSON here instead of stdout
    #[arg(short, long, help_heading = "Output")]
    out: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing_with_level(cli.quiet, cli.verbose);
    match &cli.command {
        Commands::Build(args) => run_build(args),
        Commands::Plan(args) => run_plan(args),
    }
}

/// One subregion to pack, resolved from a manifest or a directory walk.
#[derive(Debug, Clone)]
struct Job {
    key: String,
    rect: Rect,
    group: Option<u32>,
}

/// Everything a run needs: the jobs, where their keys are rooted, and the limits to use.
struct Plan {
    root: Option<PathBuf>,
    jobs: Vec<Job>,
    limits: HardwareLimits,
    config: AtlasConfig,
}

fn run_build(args: &BuildArgs) -> anyhow::Result<()> {
    let plan = resolve_input(&args.input)?;
    info!(requests = plan.jobs.len(), "resolved input");

    let backend = SoftwareBackend::new(plan.limits).with_outlines(args.outlines);
    let loader = match &plan.root {
        Some(root) => FsImageLoader::with_root(root),
        None => FsImageLoader::new(),
    };
    let mut atlas = Atlas::with_config(backend, loader, plan.config.clone())?;

    let mut keys: HashMap<RequestHandle, String> = HashMap::new();
    for job in &plan.jobs {
        let h = atlas.add_request(job.group.map(GroupId), job.key.clone(), job.rect);
        keys.insert(h, job.key.clone());
    }
    let report = atlas.build()?;
    for (h, failure) in &report.failures {
        warn!(key = keys.get(h).map(String::as_str).unwrap_or("?"), %failure, "unplaced");
    }
    info!(
        arrays = report.stats.num_arrays,
        layers = report.stats.num_layers,
        placed = report.placed,
        failed = report.failures.len(),
        occupancy = format!("{:.2}%", report.stats.occupancy * 100.0),
        "stats"
    );

    if !args.dry_run {
        fs::create_dir_all(&args.out_dir)
            .with_context(|| format!("create out_dir {}", args.out_dir.display()))?;
        for live in atlas.live_arrays() {
            for z in 0..live.depth {
                let Some(layer) = atlas.backend().layer_image(live.handle, z) else {
                    continue;
                };
                let png_path = args
                    .out_dir
                    .join(format!("{}_u{}_z{}.png", args.name, live.unit, z));
                layer
                    .save(&png_path)
                    .with_context(|| format!("write {}", png_path.display()))?;
                info!(?png_path, unit = live.unit, z, "wrote layer");
            }
        }
        let mut json_value = to_json(atlas.layout(), &atlas.limits());
        json_value["failures"] = failures_json(&report, &keys);
        let json_path = args.out_dir.join(format!("{}.json", args.name));
        let json = serde_json::to_string_pretty(&json_value)?;
        fs::write(&json_path, json).with_context(|| format!("write {}", json_path.display()))?;
        info!(?json_path, arrays = atlas.live_arrays().len(), "layout written");
    }

    if args.strict && !report.is_complete() {
        anyhow::bail!("{} request(s) left unplaced", report.failures.len());
    }
    Ok(())
}

fn run_plan(args: &PlanArgs) -> anyhow::Result<()> {
    let plan = resolve_input(&args.input)?;
    let backend = SoftwareBackend::new(plan.limits);
    let mut atlas = Atlas::with_config(backend, FsImageLoader::new(), plan.config.clone())?;

    let mut keys: HashMap<RequestHandle, String> = HashMap::new();
    for job in &plan.jobs {
        let h = atlas.add_request(job.group.map(GroupId), job.key.clone(), job.rect);
        keys.insert(h, job.key.clone());
    }
    let (layout, report) = atlas.plan()?;
    info!(summary = %report.stats.summary(), failed = report.failures.len(), "plan complete");

    let mut json_value = to_json(&layout, &atlas.limits());
    json_value["failures"] = failures_json(&report, &keys);
    let json = serde_json::to_string_pretty(&json_value)?;
    match &args.out {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
            fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
            info!(?path, "layout written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn failures_json(report: &BuildReport, keys: &HashMap<RequestHandle, String>) -> serde_json::Value {
    report
        .failures
        .iter()
        .map(|(h, f)| {
            serde_json::json!({
                "id": h.id(),
                "key": keys.get(h),
                "reason": f.to_string(),
                "failure": f,
            })
        })
        .collect()
}

/// Turns the input argument into jobs: a manifest file, a directory tree, or one image.
fn resolve_input(args: &InputArgs) -> anyhow::Result<Plan> {
    let path = &args.input;
    let mut plan = if path.is_file() && is_manifest(path) {
        load_manifest(path)?
    } else if path.is_dir() || (path.is_file() && is_image(path)) {
        gather_directory(path, &args.include, &args.exclude, args.group_by_dir)?
    } else {
        anyhow::bail!(
            "input {} is neither a manifest, a directory nor an image",
            path.display()
        );
    };
    if let Some(v) = args.units {
        plan.limits.max_texture_units = v;
    }
    if let Some(v) = args.layers {
        plan.limits.max_array_layers = v;
    }
    if let Some(v) = args.max_size {
        plan.limits.max_texture_size = v;
    }
    if let Some(v) = args.cell_size {
        plan.config.cell_size = v;
    }
    plan.limits
        .validate()
        .with_context(|| format!("limits {:?}", plan.limits))?;
    debug!(limits = ?plan.limits, cell = plan.config.cell_size, "effective settings");
    Ok(plan)
}

#[derive(Debug, Deserialize, Default)]
struct Manifest {
    #[serde(default)]
    limits: ManifestLimits,
    cell_size: Option<u32>,
    #[serde(default)]
    requests: Vec<ManifestRequest>,
}

#[derive(Debug, Deserialize, Default)]
struct ManifestLimits {
    max_texture_units: Option<u32>,
    max_array_layers: Option<u32>,
    max_texture_size: Option<u32>,
}

impl ManifestLimits {
    fn into_limits(self, mut limits: HardwareLimits) -> HardwareLimits {
        if let Some(v) = self.max_texture_units {
            limits.max_texture_units = v;
        }
        if let Some(v) = self.max_array_layers {
            limits.max_array_layers = v;
        }
        if let Some(v) = self.max_texture_size {
            limits.max_texture_size = v;
        }
        limits
    }
}

#[derive(Debug, Deserialize)]
struct ManifestRequest {
    path: String,
    /// Subregion of the image; the whole image when absent.
    rect: Option<Rect>,
    group: Option<u32>,
}

fn load_manifest(path: &Path) -> anyhow::Result<Plan> {
    let text =
        fs::read_to_string(path).with_context(|| format!("read manifest {}", path.display()))?;
    let manifest: Manifest = if has_extension(path, &["json"]) {
        serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))?
    } else {
        serde_yaml::from_str(&text).with_context(|| format!("parse {}", path.display()))?
    };
    let root = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf);

    let mut jobs = Vec::with_capacity(manifest.requests.len());
    for r in manifest.requests {
        let rect = match r.rect {
            Some(rect) => rect,
            None => {
                let full = match &root {
                    Some(root) => root.join(&r.path),
                    None => PathBuf::from(&r.path),
                };
                probe_full_rect(&full)?
            }
        };
        jobs.push(Job {
            key: r.path,
            rect,
            group: r.group,
        });
    }
    info!(path = %path.display(), requests = jobs.len(), "loaded manifest");

    let mut config = AtlasConfig::default();
    if let Some(v) = manifest.cell_size {
        config.cell_size = v;
    }
    Ok(Plan {
        root,
        jobs,
        limits: manifest.limits.into_limits(HardwareLimits::default()),
        config,
    })
}

fn gather_directory(
    path: &Path,
    include: &[String],
    exclude: &[String],
    group_by_dir: bool,
) -> anyhow::Result<Plan> {
    let paths = gather_paths(path, include, exclude)?;
    let mut dir_groups: HashMap<PathBuf, u32> = HashMap::new();
    let mut jobs = Vec::with_capacity(paths.len());
    for p in paths {
        let rect = match probe_full_rect(&p) {
            Ok(rect) => rect,
            Err(e) => {
                error!(path = %p.display(), error = %e, "skipping unreadable image");
                continue;
            }
        };
        let group = if group_by_dir {
            let dir = p.parent().map(Path::to_path_buf).unwrap_or_default();
            let next = dir_groups.len() as u32;
            Some(*dir_groups.entry(dir).or_insert(next))
        } else {
            None
        };
        jobs.push(Job {
            key: p.to_string_lossy().into_owned(),
            rect,
            group,
        });
    }
    Ok(Plan {
        root: None,
        jobs,
        limits: HardwareLimits::default(),
        config: AtlasConfig::default(),
    })
}

fn probe_full_rect(path: &Path) -> anyhow::Result<Rect> {
    let (w, h) = image::image_dimensions(path)
        .with_context(|| format!("read image size {}", path.display()))?;
    Ok(Rect::sized(w, h))
}

fn gather_paths(
    path: &Path,
    include: &[String],
    exclude: &[String],
) -> anyhow::Result<Vec<PathBuf>> {
    // Build glob matchers
    let mut inc_set = None;
    if !include.is_empty() {
        let mut b = GlobSetBuilder::new();
        for pat in include {
            b.add(Glob::new(pat)?);
        }
        inc_set = Some(b.build()?);
    }
    let mut exc_set = None;
    if !exclude.is_empty() {
        let mut b = GlobSetBuilder::new();
        for pat in exclude {
            b.add(Glob::new(pat)?);
        }
        exc_set = Some(b.build()?);
    }
    let mut list: Vec<PathBuf> = Vec::new();
    if path.is_file() {
        if !should_skip(path, inc_set.as_ref(), exc_set.as_ref()) && is_image(path) {
            list.push(path.to_path_buf());
        }
    } else {
        // Sorted so units and layers come out the same on every run.
        for entry in WalkDir::new(path)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let p = entry.path();
            if p.is_file() && !should_skip(p, inc_set.as_ref(), exc_set.as_ref()) && is_image(p) {
                list.push(p.to_path_buf());
            }
        }
    }
    Ok(list)
}

fn should_skip(
    p: &Path,
    include: Option<&globset::GlobSet>,
    exclude: Option<&globset::GlobSet>,
) -> bool {
    let s = p.to_string_lossy().replace('\\', "/");
    if let Some(ex) = exclude {
        if ex.is_match(&s) {
            return true;
        }
    }
    if let Some(inc) = include {
        if !inc.is_match(&s) {
            return true;
        }
    }
    false
}

fn has_extension(p: &Path, exts: &[&str]) -> bool {
    p.extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_ascii_lowercase())
        .is_some_and(|ext| exts.contains(&ext.as_str()))
}

fn is_manifest(p: &Path) -> bool {
    has_extension(p, &["yaml", "yml", "json"])
}

fn is_image(p: &Path) -> bool {
    has_extension(p, &["png", "jpg", "jpeg"])
}

fn init_tracing_with_level(quiet: bool, verbose: u8) {
    let level = if quiet {
        "error".to_string()
    } else {
        match verbose {
            0 => "info".into(),
            1 => "debug".into(),
            _ => "trace".into(),
        }
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_target(false)
        .try_init();
}
