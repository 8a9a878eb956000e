use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use claimdex_cli::{
    build_generation, embedder, index_dir, init_tracing, load_sections, load_settings, open_generation, ClaimCalculator,
};
use claimdex_core::config::Settings;
use claimdex_retrieval::{render_context, ActiveIndex, QueryEngine, QueryRouter};

struct Options {
    positional: Vec<String>,
    json: bool,
    index_dir: Option<PathBuf>,
}

fn parse_args() -> (String, Options) {
    let mut args: Vec<String> = env::args().collect();
    let prog = args.remove(0);
    if args.is_empty() {
        eprintln!("Usage: {} <route|ask|sections> [args...] [--json] [--index-dir DIR]", prog);
        eprintln!("  route \"<question>\" [input]");
        eprintln!("  ask <input> \"<question>\"");
        eprintln!("  sections <input>");
        std::process::exit(1);
    }
    let cmd = args.remove(0);
    let mut opts = Options { positional: Vec::new(), json: false, index_dir: None };
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--json" => opts.json = true,
            "--index-dir" => {
                if let Some(d) = args.get(i + 1) {
                    opts.index_dir = Some(PathBuf::from(d));
                    i += 1;
                } else {
                    eprintln!("Error: --index-dir requires a path");
                    std::process::exit(1);
                }
            }
            _ => opts.positional.push(args[i].clone()),
        }
        i += 1;
    }
    (cmd, opts)
}

fn required<'a>(opts: &'a Options, idx: usize, usage: &str) -> &'a str {
    opts.positional.get(idx).map(String::as_str).unwrap_or_else(|| {
        eprintln!("Usage: claimdex {}", usage);
        std::process::exit(1)
    })
}

fn route(opts: &Options) -> anyhow::Result<()> {
    let question = required(opts, 0, "route \"<question>\" [input]");
    let labels: Vec<String> = match opts.positional.get(1) {
        Some(input) => load_sections(Path::new(input))?.into_iter().map(|s| s.title).collect(),
        None => Vec::new(),
    };
    let decision = QueryRouter::new(labels).route(question);
    if opts.json {
        println!("{}", serde_json::to_string_pretty(&decision)?);
    } else {
        println!("path: {}", decision.path.category());
        if let claimdex_retrieval::RoutePath::Section { label } = &decision.path {
            println!("section: {}", label);
        }
        let matched: Vec<&str> = decision.matched.iter().map(|c| c.as_str()).collect();
        println!("matched: [{}]{}", matched.join(", "), if decision.ambiguous { " (ambiguous)" } else { "" });
    }
    Ok(())
}

fn ask(settings: &Settings, opts: &Options) -> anyhow::Result<()> {
    let usage = "ask <input> \"<question>\"";
    let input = PathBuf::from(required(opts, 0, usage));
    let question = required(opts, 1, usage);
    let dir = index_dir(settings, opts.index_dir.clone());
    let embedder = embedder(settings)?;

    let active = Arc::new(ActiveIndex::new());
    let generation = match open_generation(settings, embedder.clone(), &dir)? {
        Some(g) => g,
        None => {
            let sections = load_sections(&input)?;
            build_generation(settings, embedder.clone(), &active, &sections, &dir)?
        }
    };
    active.swap(generation)?;

    let engine = QueryEngine::new(active, embedder, settings.retrieval.clone()).with_tool(Box::new(ClaimCalculator));
    let outcome = engine.ask(question)?;
    if opts.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    println!("Generation {} | route: {}", outcome.generation, outcome.route.path.category());
    if let Some(tier) = outcome.result.tier {
        println!("Section filter tier: {}", tier.number());
    }
    if outcome.result.is_empty() {
        println!("\nNo supporting context found.");
    } else {
        println!("{}", render_context(&outcome.result.fragments, true));
    }
    if let Some(request) = &outcome.computation {
        println!("\nOperands:");
        for op in &request.operands {
            println!("  {:?} {:>16}  ({})", op.kind, op.text, op.fragment_id);
        }
    }
    if let Some(output) = &outcome.tool_output {
        println!("\nComputation: {}", output);
    }
    if let Some(error) = &outcome.tool_error {
        println!("\nComputation not possible: {}", error);
    }
    Ok(())
}

fn sections(opts: &Options) -> anyhow::Result<()> {
    let input = required(opts, 0, "sections <input>");
    let sections = load_sections(Path::new(input))?;
    if opts.json {
        println!("{}", serde_json::to_string_pretty(&sections)?);
        return Ok(());
    }
    for (i, s) in sections.iter().enumerate() {
        let words = s.text.split_whitespace().count();
        println!(
            "{:>3}. {} [{}] {} words{}",
            i + 1,
            s.title,
            s.doc_type,
            words,
            s.timestamp.as_deref().map(|t| format!(", dated {}", t)).unwrap_or_default()
        );
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let (cmd, opts) = parse_args();
    match cmd.as_str() {
        "route" => route(&opts),
        "sections" => sections(&opts),
        "ask" => {
            let settings = load_settings()?;
            ask(&settings, &opts)
        }
        _ => {
            eprintln!("Unknown command: {}", cmd);
            std::process::exit(1);
        }
    }
}
