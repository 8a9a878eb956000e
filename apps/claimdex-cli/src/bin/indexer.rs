use std::{env, path::PathBuf};

use claimdex_cli::{build_generation, embedder, index_dir, init_tracing, load_sections, load_settings};
use claimdex_core::config::IndexBackend;
use claimdex_retrieval::ActiveIndex;

fn usage() -> ! {
    eprintln!("Usage: claimdex-indexer <input> [--index-dir DIR]");
    std::process::exit(1);
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let settings = load_settings()?;
    let args: Vec<String> = env::args().skip(1).collect();
    let mut input = None;
    let mut dir_override = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--index-dir" => match args.get(i + 1) {
                Some(d) => {
                    dir_override = Some(PathBuf::from(d));
                    i += 1;
                }
                None => {
                    eprintln!("Error: --index-dir requires a path");
                    usage();
                }
            },
            "-h" | "--help" => usage(),
            a if !a.starts_with('-') => input = Some(PathBuf::from(a)),
            other => eprintln!("Ignoring unknown flag {}", other),
        }
        i += 1;
    }
    let Some(input) = input else { usage() };
    let dir = index_dir(&settings, dir_override);

    println!("Claim Document Indexer\n======================");
    println!("Input: {}", input.display());
    let sections = load_sections(&input)?;
    println!("Sections loaded: {}", sections.len());

    let active = ActiveIndex::new();
    let generation = build_generation(&settings, embedder(&settings)?, &active, &sections, &dir)?;
    let report = &generation.report;

    println!("\nGeneration {} built at {}", generation.id, generation.built_at.to_rfc3339());
    println!("  sections indexed: {}/{}", report.sections_indexed, report.sections_seen);
    println!(
        "  chunks: {} large, {} medium, {} small ({} total)",
        report.counts.large,
        report.counts.medium,
        report.counts.small,
        report.counts.total()
    );
    println!("  summaries: {}", generation.summaries.len());
    for skipped in &report.skipped {
        println!("  skipped section {} ({:?}): {}", skipped.index, skipped.title, skipped.reason);
    }
    match settings.index.backend {
        IndexBackend::Lance => println!("\nPublished to {}", dir.display()),
        IndexBackend::Memory => println!("\nMemory backend: nothing persisted. Set index.backend = \"lance\" to keep the index."),
    }
    Ok(())
}
