//! `clipstash` - CLI for the clipstash library
//!
//! Records clips from the test-pattern camera, imports video files, and
//! manages the local clip store.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use bytes::Bytes;
use clap::Parser;
use tracing::warn;

use clipstash::cli::{
    CheckCommand, Cli, Command, ConfigCommand, ImportCommand, RecordCommand,
};
use clipstash::clip::{format_clock, format_size, parse_clock};
use clipstash::device::{DeviceStreamProvider, MediaDevices};
use clipstash::synthetic::{SyntheticDecoder, SyntheticDevices, SyntheticEncoder};
use clipstash::thumbnail::ThumbnailExtractor;
use clipstash::{init_logging, CaptureSession, Config, LocalMediaStore, MediaLibrary, VideoDraft};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    let config = Config::load_from(cli.config.clone())?;

    match cli.command {
        Command::Record(cmd) => handle_record(&config, cmd).await,
        Command::Import(cmd) => handle_import(&config, cmd).await,
        Command::List(cmd) => handle_list(&config, cmd.json),
        Command::Export(cmd) => handle_export(&config, &cmd.id, &cmd.path),
        Command::Delete { id } => handle_delete(&config, &id),
        Command::Clear { yes } => handle_clear(&config, yes),
        Command::Stats(cmd) => handle_stats(&config, cmd.json),
        Command::Check(cmd) => handle_check(&config, &cmd),
        Command::Config(cmd) => handle_config(&config, cmd),
    }
}

fn open_library(config: &Config) -> anyhow::Result<MediaLibrary> {
    let store = LocalMediaStore::from_config(config)
        .with_context(|| format!("opening {}", config.database_path().display()))?;
    Ok(MediaLibrary::new(Arc::new(store), config.library.clone()))
}

async fn handle_record(config: &Config, cmd: RecordCommand) -> anyhow::Result<()> {
    let too_long = || clipstash::Error::InvalidDuration {
        text: cmd.duration.clone(),
    };
    let length = Duration::from_secs(parse_clock(&cmd.duration)?);
    tokio::time::Instant::now()
        .checked_add(length)
        .ok_or_else(too_long)?;

    let mut capture = config.capture.clone();
    if let Some(facing) = cmd.facing {
        capture.facing = facing.into();
    }

    let devices: Arc<dyn MediaDevices> = Arc::new(SyntheticDevices::new());
    let provider = DeviceStreamProvider::new(devices, capture.clone());
    let mut session = CaptureSession::new(provider, Box::new(SyntheticEncoder::new()), capture);
    if config.thumbnail.enabled {
        session = session.with_thumbnails(ThumbnailExtractor::new(
            Arc::new(SyntheticDecoder::new()),
            &config.thumbnail,
        ));
    }

    session.start_preview().await?;
    session.start_recording().await?;
    eprintln!("Recording from the {} camera (Ctrl-C to stop)", session.facing());

    let deadline = tokio::time::Instant::now()
        .checked_add(length)
        .ok_or_else(too_long)?;
    let mut progress = tokio::time::interval(Duration::from_millis(250));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            () = tokio::time::sleep_until(deadline) => break,
            _ = &mut ctrl_c => break,
            _ = progress.tick() => {
                if let Some(fault) = session.poll_faults().await {
                    bail!("{}", fault.user_message());
                }
                eprint!("\r{}", format_clock(session.elapsed_secs()));
            }
        }
    }
    eprintln!();

    let clip = match session.stop_recording().await {
        Ok(Some(clip)) => clip,
        Ok(None) => bail!("recording was not running"),
        Err(e) => {
            let message = e.fault().user_message();
            return Err(anyhow::Error::new(e).context(message));
        }
    };
    session.reset();

    println!(
        "Recorded {} ({}, {})",
        format_clock(clip.duration_secs()),
        format_size(clip.size() as u64),
        clip.format
    );

    if let Some(dir) = &cmd.output {
        let path = clip.write_to_dir(dir)?;
        println!("Wrote {}", path.display());
    }

    if !cmd.no_save {
        let title = cmd.title.unwrap_or_else(|| {
            format!("Recording {}", clip.recorded_at.format("%Y-%m-%d %H:%M"))
        });
        let mut library = open_library(config)?;
        let entry = library.add_video(
            VideoDraft::from_clip(&clip, title),
            Some(clip.payload.clone()),
            cmd.category,
            Some(!cmd.private),
        )?;
        println!("Saved {}", entry.record.id);
    }
    Ok(())
}

async fn handle_import(config: &Config, cmd: ImportCommand) -> anyhow::Result<()> {
    let payload = Bytes::from(
        std::fs::read(&cmd.file).with_context(|| format!("reading {}", cmd.file.display()))?,
    );
    if payload.is_empty() {
        bail!("{} is empty", cmd.file.display());
    }

    let thumbnail = if config.thumbnail.enabled {
        match ThumbnailExtractor::with_ffmpeg(&config.thumbnail)
            .extract(&payload)
            .await
        {
            Ok(still) => still.to_data_url(),
            Err(e) => {
                warn!("No thumbnail for {}: {}", cmd.file.display(), e);
                String::new()
            }
        }
    } else {
        String::new()
    };

    let duration_secs = match &cmd.duration {
        Some(text) => parse_clock(text)?,
        None => 0,
    };
    let title = cmd.title.unwrap_or_else(|| {
        cmd.file
            .file_stem()
            .map_or_else(|| "Imported video".to_string(), |s| s.to_string_lossy().into_owned())
    });
    let source = std::fs::canonicalize(&cmd.file).unwrap_or_else(|_| cmd.file.clone());

    let draft = VideoDraft {
        title,
        thumbnail,
        duration_secs,
        source_url: Some(format!("file://{}", source.display())),
        ..VideoDraft::default()
    };

    let mut library = open_library(config)?;
    let entry = library.add_video(draft, Some(payload), cmd.category, Some(!cmd.private))?;
    println!("Imported {} as {}", cmd.file.display(), entry.record.id);
    Ok(())
}

fn handle_list(config: &Config, json: bool) -> anyhow::Result<()> {
    let library = open_library(config)?;
    let videos = library.list_videos()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&videos)?);
        return Ok(());
    }

    if videos.is_empty() {
        println!("No videos saved.");
        return Ok(());
    }
    for video in &videos {
        let record = &video.record;
        println!(
            "{:<32} {:>5}  {}  {:<12} {}",
            record.id,
            format_clock(record.duration_secs),
            record.created_at.format("%Y-%m-%d %H:%M"),
            record.category,
            record.title
        );
    }
    Ok(())
}

fn handle_export(config: &Config, id: &str, path: &Path) -> anyhow::Result<()> {
    let library = open_library(config)?;
    let payload = library
        .store()
        .get_payload(id)?
        .ok_or_else(|| clipstash::Error::payload_missing(id))?;

    std::fs::write(path, &payload).with_context(|| format!("writing {}", path.display()))?;
    println!(
        "Exported {} ({}) to {}",
        id,
        format_size(payload.len() as u64),
        path.display()
    );
    Ok(())
}

fn handle_delete(config: &Config, id: &str) -> anyhow::Result<()> {
    let mut library = open_library(config)?;
    if library.delete_video(id)? {
        println!("Deleted {id}");
        Ok(())
    } else {
        bail!("no video with id {id}")
    }
}

fn handle_clear(config: &Config, yes: bool) -> anyhow::Result<()> {
    if !yes {
        println!("This will delete every saved video.");
        println!("Use --yes to confirm.");
        return Ok(());
    }
    let mut library = open_library(config)?;
    let removed = library.clear_local()?;
    println!("Deleted {removed} video(s).");
    Ok(())
}

fn handle_stats(config: &Config, json: bool) -> anyhow::Result<()> {
    let library = open_library(config)?;
    let stats = library.store().stats()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let when = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string())
    };
    println!("clipstash library");
    println!("-----------------");
    println!("Database:      {}", library.store().path().display());
    println!("Videos:        {}", stats.record_count);
    println!("Payload size:  {}", format_size(stats.payload_bytes));
    println!("Database size: {}", format_size(stats.db_size_bytes));
    println!("Oldest:        {}", when(stats.oldest_record));
    println!("Newest:        {}", when(stats.newest_record));
    Ok(())
}

fn handle_check(config: &Config, cmd: &CheckCommand) -> anyhow::Result<()> {
    let library = open_library(config)?;
    let store = library.store();
    let report = store.integrity_report()?;

    if report.is_clean() {
        println!("Library is consistent.");
        return Ok(());
    }

    println!("Records without payload:  {}", report.records_without_payload.len());
    println!("Payloads without record:  {}", report.payloads_without_record.len());
    println!("Digest mismatches:        {}", report.digest_mismatches.len());
    println!("Interrupted saves:        {}", report.pending_saves.len());
    for id in &report.digest_mismatches {
        println!("  corrupted: {id}");
    }

    if cmd.repair {
        let removed = store.repair()?;
        println!("Removed {removed} unpaired row(s).");
        if !report.digest_mismatches.is_empty() {
            bail!("corrupted payloads need to be deleted manually");
        }
        Ok(())
    } else {
        bail!("library has consistency problems (run with --repair to fix)")
    }
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!("  Sweep on open:      {}", config.storage.sweep_orphans_on_open);
                println!();
                println!("[Capture]");
                println!("  Camera:             {}", config.capture.facing);
                println!(
                    "  Resolution:         {}x{}",
                    config.capture.width, config.capture.height
                );
                println!("  Audio:              {}", config.capture.audio_enabled);
                println!("  Minimum length:     {} ms", config.capture.min_duration_ms);
                println!(
                    "  Formats:            {}",
                    config.capture.format_preferences.join(", ")
                );
                println!();
                println!("[Thumbnail]");
                println!("  Enabled:            {}", config.thumbnail.enabled);
                println!("  Seek offset:        {} ms", config.thumbnail.seek_offset_ms);
                println!("  JPEG quality:       {}", config.thumbnail.jpeg_quality);
                println!();
                println!("[Library]");
                println!("  Channel:            {}", config.library.default_channel);
                println!("  Category:           {}", config.library.default_category);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => bail!("configuration error: {e}"),
            }
        }
    }
    Ok(())
}
