//! # Strata Loader Demo
//!
//! This example shows the loader end to end.
//! It writes two small class folders of solid-color images, runs the
//! loader over them and prints what comes out of the ring.
//!
//! Run with: `cargo run --example preview`

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use strata_loader::{ImageLoader, LoaderConfig};

const SAMPLES: usize = 24;

fn main() -> Result<()> {
    // Initialize logging so we can see what's happening
    strata_loader::init_logging();

    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║           Strata Loader Demo                               ║");
    println!("╠════════════════════════════════════════════════════════════╣");
    println!("║ This demo builds a two-class dataset, runs the loader and  ║");
    println!("║ prints every image it serves.                              ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    println!();

    let root = std::env::temp_dir().join("strata-loader-preview");
    let circles = write_class(&root, "circles", 16, [230, 80, 40])?;
    let squares = write_class(&root, "squares", 12, [40, 120, 230])?;

    let config = LoaderConfig::new(8, 32, 32).seed(2024);
    println!("📦 Configuration:");
    println!("   Ring slots (batch size): {}", config.capacity);
    println!("   Image size: {}x{} {:?}", config.width, config.height, config.color);
    println!("   Estimated memory: {:.2} MB", config.estimated_memory_mb());
    println!();

    let mut loader = ImageLoader::with_config(config)?;
    loader.create_dataset("shapes")?;
    loader.select_dataset("shapes")?;
    loader.add_folder(&circles)?;
    loader.add_folder(&squares)?;

    let info = loader.active_dataset()?;
    println!("🗂️  Dataset \"{}\": {} images", info.name, info.image_count);
    for (name, size) in info.class_names.iter().zip(&info.class_sizes) {
        println!("   {:<8} {} images", name, size);
    }
    println!();

    loader.run()?;
    println!("🚚 Serving {} images...", SAMPLES);

    let mut per_class = [0usize; 2];
    for i in 0..SAMPLES {
        let Some(image) = loader.get()? else {
            break;
        };
        let first = image.pixel(0, 0).unwrap_or(&[]);
        println!(
            "   #{:02} {:<8} first pixel {:?}",
            i,
            image.label(),
            first
        );
        if image.label() == "circles" {
            per_class[0] += 1;
        } else {
            per_class[1] += 1;
        }
    }

    loader.stop()?;
    let stats = loader.stats();

    println!();
    println!("📊 Results:");
    println!("   circles: {}  squares: {}", per_class[0], per_class[1]);
    println!("   Batches sampled: {}", stats.batches_sampled);
    println!("   Images decoded: {}", stats.images_loaded);
    println!("   Decode failures: {}", stats.decode_failures);

    fs::remove_dir_all(&root).context("cleaning up demo folders")?;
    Ok(())
}

/// Writes `count` solid-color PNGs into `root/name`.
fn write_class(root: &Path, name: &str, count: usize, color: [u8; 3]) -> Result<PathBuf> {
    let dir = root.join(name);
    fs::create_dir_all(&dir).with_context(|| format!("creating {:?}", dir))?;

    for i in 0..count {
        let shade = (i * 4) as u8;
        let pixel = Rgb([color[0].saturating_sub(shade), color[1], color[2]]);
        RgbImage::from_pixel(48, 48, pixel)
            .save(dir.join(format!("{}_{:02}.png", name, i)))
            .with_context(|| format!("writing image {} of {}", i, name))?;
    }
    Ok(dir)
}
