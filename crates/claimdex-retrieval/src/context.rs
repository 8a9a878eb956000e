use claimdex_core::types::Fragment;

/// Numbered context block for the answer generator.
pub fn render_context(fragments: &[Fragment], include_metadata: bool) -> String {
    let mut parts = Vec::with_capacity(fragments.len());
    for (i, f) in fragments.iter().enumerate() {
        let mut part = format!("\n--- Result {} (Score: {:.4}) ---\n", i + 1, f.score);
        if include_metadata {
            let level = f.level.map_or("summary", |l| l.as_str());
            part.push_str(&format!("Section: {}\n", f.section_title));
            part.push_str(&format!("Chunk Level: {}\n", level));
            part.push_str(&format!("Document Type: {}\n", f.doc_type));
            if let Some(tier) = f.provenance_tier {
                part.push_str(&format!("Provenance Tier: {}\n", tier.number()));
            }
            part.push('\n');
        }
        part.push_str(&f.text);
        parts.push(part);
    }
    parts.join("\n")
}
