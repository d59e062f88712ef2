mod cli;

use reelforge::config::{self, Settings, SettingsStore};
use reelforge::{ConversionRequest, ConverterService, Downloader, HttpVideoSource, QueueManager};
use reelforge_av::{ToolPaths, ToolRegistry};
use reelforge_core::events::{Event, EventBus};
use reelforge_core::{ConversionState, DownloadState, OutputFormat, PresetCategory, TrimOptions};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "reelforge=trace,reelforge_av=debug,reelforge_core=debug".to_string()
        } else {
            "reelforge=info,reelforge_av=info,reelforge_core=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Presets { category } => list_presets(category),
        Commands::Probe { file, json } => block_on(probe_file(config_path, &file, json)),
        Commands::Convert {
            input,
            preset,
            args,
            output,
            start,
            end,
        } => {
            let trim = start.zip(end).map(|(s, e)| TrimOptions::new(s, e));
            block_on(convert(config_path, input, preset, args, output, trim))
        }
        Commands::Download {
            urls,
            format,
            save_path,
            concurrency,
        } => block_on(download(config_path, urls, format, save_path, concurrency)),
        Commands::Waveform { file, points } => block_on(waveform(config_path, &file, points)),
        Commands::Thumbnail { file, at, width } => {
            block_on(thumbnail(config_path, &file, at, width))
        }
        Commands::CheckTools => check_tools(config_path),
        Commands::Version => {
            println!("reelforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn block_on<F: std::future::Future<Output = Result<()>>>(fut: F) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(fut)
}

/// Settings, event bus and converter shared by the async commands.
struct Services {
    settings: Settings,
    bus: Arc<EventBus>,
    converter: ConverterService,
}

impl Services {
    fn load(config_path: Option<&Path>) -> Result<Self> {
        let settings = config::load_config_or_default(config_path)?;
        let tools = Arc::new(ToolRegistry::discover(&ToolPaths::from_settings(&settings)));
        let bus = Arc::new(EventBus::default());
        let converter =
            ConverterService::new(tools, bus.clone(), settings.effective_temp_dir());
        Ok(Self {
            settings,
            bus,
            converter,
        })
    }
}

fn list_presets(category: Option<PresetCategory>) -> Result<()> {
    let categories = match category {
        Some(c) => vec![c],
        None => PresetCategory::ALL.to_vec(),
    };
    for category in categories {
        println!("{category}:");
        for preset in reelforge_av::presets::by_category(category) {
            println!(
                "  {:<16} .{:<5} {}",
                preset.id, preset.output_ext, preset.description
            );
        }
        println!();
    }
    Ok(())
}

async fn probe_file(config_path: Option<&Path>, file: &Path, json: bool) -> Result<()> {
    let services = Services::load(config_path)?;
    let info = services.converter.analyze_file(file).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("File: {}", file.display());
    println!("Container: {}", info.container_format);
    println!("Size: {} bytes", info.size_bytes);
    let secs = info.duration_seconds as u64;
    println!(
        "Duration: {:02}:{:02}:{:02}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60
    );
    if info.bitrate > 0 {
        println!("Bitrate: {} kb/s", info.bitrate / 1000);
    }
    if let Some(ref video) = info.video_stream {
        println!(
            "Video: {} {}x{} {:.3} fps",
            video.codec, video.width, video.height, video.fps
        );
    }
    if let Some(ref audio) = info.audio_stream {
        println!(
            "Audio: {} {}ch {} Hz",
            audio.codec, audio.channels, audio.sample_rate
        );
    }
    Ok(())
}

async fn convert(
    config_path: Option<&Path>,
    input: PathBuf,
    preset: Option<String>,
    args: Option<String>,
    output: Option<PathBuf>,
    trim: Option<TrimOptions>,
) -> Result<()> {
    let services = Services::load(config_path)?;
    let converter = &services.converter;

    let mut request = match (preset, args) {
        (Some(id), _) => ConversionRequest::preset(&input, id),
        (None, Some(args)) => ConversionRequest::custom(&input, args.split_whitespace()),
        (None, None) => anyhow::bail!("either --preset or --args is required"),
    };
    if let Some(output) = output {
        request = request.with_output(output);
    }
    if let Some(trim) = trim {
        request = request.with_trim(trim);
    }

    let mut rx = services.bus.subscribe();
    let job = converter.start_conversion(request)?;
    println!("{} -> {}", job.input_path.display(), job.output_path.display());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    let mut last_bucket = None;

    loop {
        let Some(current) = converter.job(&job.id) else {
            anyhow::bail!("conversion job {} disappeared", job.id);
        };
        if current.state.is_terminal() {
            return match current.state {
                ConversionState::Completed => {
                    println!("Done: {}", current.output_path.display());
                    Ok(())
                }
                ConversionState::Cancelled => anyhow::bail!("conversion cancelled"),
                _ => anyhow::bail!(
                    "conversion failed: {}",
                    current.error.unwrap_or_default()
                ),
            };
        }

        tokio::select! {
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                eprintln!("Cancelling...");
                converter.cancel_conversion(&job.id)?;
            }
            event = rx.recv() => match event {
                Ok(Event::ConversionProgress(p)) if p.job_id == job.id => {
                    let bucket = (p.state, (p.percent / 10.0) as u32);
                    if last_bucket != Some(bucket) {
                        last_bucket = Some(bucket);
                        println!("[{}] {:5.1}%  speed {:.2}x", p.state, p.percent, p.speed);
                    }
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    anyhow::bail!("event bus closed")
                }
            },
        }
    }
}

async fn download(
    config_path: Option<&Path>,
    urls: Vec<String>,
    format: OutputFormat,
    save_path: Option<PathBuf>,
    concurrency: Option<usize>,
) -> Result<()> {
    let services = Services::load(config_path)?;
    let settings = services.settings.clone();
    let save_path = save_path.unwrap_or_else(|| settings.download_dir.clone());
    let concurrency = concurrency.unwrap_or_else(|| settings.effective_max_concurrent());

    let downloader = Downloader::new(
        Arc::new(HttpVideoSource::new()),
        services.converter.clone(),
        Arc::new(SettingsStore::new(settings)),
    );
    let queue = QueueManager::new(Arc::new(downloader), services.bus.clone(), concurrency);
    let mut rx = services.bus.subscribe();

    for url in &urls {
        if queue.has_url(url) {
            tracing::warn!(url = %url, "Skipping duplicate URL");
            continue;
        }
        if let Err(e) = queue.add_url(url, format, &save_path) {
            eprintln!("Skipping {url}: {e}");
        }
    }
    if queue.items().is_empty() {
        anyhow::bail!("nothing to download");
    }
    queue.start_all();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    let mut last_bucket: HashMap<String, (DownloadState, u32)> = HashMap::new();

    loop {
        let items = queue.items();
        if items.iter().all(|i| i.state.is_terminal()) {
            let mut failed = 0;
            for item in &items {
                match (&item.file_path, &item.error) {
                    (Some(path), _) => println!("{} -> {}", item.url, path.display()),
                    (None, Some(err)) => {
                        failed += 1;
                        println!("{} failed: {err}", item.url);
                    }
                    (None, None) => {
                        failed += 1;
                        println!("{} {}", item.url, item.state);
                    }
                }
            }
            if failed > 0 {
                anyhow::bail!("{failed} of {} downloads did not complete", items.len());
            }
            return Ok(());
        }

        tokio::select! {
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                eprintln!("Cancelling...");
                queue.cancel_all();
            }
            event = rx.recv() => match event {
                Ok(Event::DownloadProgress(p)) => {
                    let bucket = (p.state, (p.percent / 10.0) as u32);
                    if last_bucket.get(&p.item_id) != Some(&bucket) {
                        last_bucket.insert(p.item_id.clone(), bucket);
                        let name = queue
                            .item(&p.item_id)
                            .and_then(|i| i.title().map(str::to_string))
                            .unwrap_or_else(|| p.item_id.clone());
                        println!(
                            "[{}] {name}: {:5.1}%  {:.0} KiB/s  eta {:.0}s",
                            p.state,
                            p.percent,
                            p.speed_bytes_per_sec / 1024.0,
                            p.eta_seconds
                        );
                    }
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    anyhow::bail!("event bus closed")
                }
            },
        }
    }
}

async fn waveform(config_path: Option<&Path>, file: &Path, points: usize) -> Result<()> {
    let services = Services::load(config_path)?;
    let peaks = services.converter.waveform(file, points).await?;
    println!("{}", serde_json::to_string(&peaks)?);
    Ok(())
}

async fn thumbnail(config_path: Option<&Path>, file: &Path, at: f64, width: u32) -> Result<()> {
    let services = Services::load(config_path)?;
    let path = services.converter.thumbnail(file, at, width, None).await?;
    println!("{}", path.display());
    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let settings = config::load_config_or_default(config_path)?;
    let registry = ToolRegistry::discover(&ToolPaths::from_settings(&settings));
    let mut all_ok = true;

    for tool in registry.check_all() {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version);
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install them to enable all features.");
    }

    Ok(())
}
