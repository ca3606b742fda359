use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

/// Content-addressed identifiers for documents, pages, chunks, and graph
/// records. Identical inputs always yield identical ids, which is what makes
/// re-ingestion an idempotent upsert instead of a duplicate insert.

fn hex_digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        // Separator guards against ambiguous concatenation ("ab"+"c" vs "a"+"bc").
        hasher.update([0x1f]);
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// NFC-normalizes and collapses runs of whitespace so cosmetic differences in
/// the extracted text do not change a chunk's identity.
pub fn normalize_content(content: &str) -> String {
    let normalized: String = content.nfc().collect();
    let mut out = String::with_capacity(normalized.len());
    let mut last_was_space = true;
    for ch in normalized.chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        } else {
            out.push(ch);
            last_was_space = false;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Identifier of a source document: the hash of its raw bytes.
pub fn document_id(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

pub fn page_id(document_id: &str, page_number: u32) -> String {
    hex_digest(&["page", document_id, &page_number.to_string()])
}

/// Identifier of a chunk: pure function of provenance and normalized content.
/// Changing any input changes the id; unchanged content keeps it stable
/// across reruns.
pub fn chunk_id(
    document_id: &str,
    page_number: u32,
    kind: &str,
    ordinal: u32,
    content: &str,
) -> String {
    hex_digest(&[
        "chunk",
        document_id,
        &page_number.to_string(),
        kind,
        &ordinal.to_string(),
        &normalize_content(content),
    ])
}

/// Identifier of a graph entity: (canonical name, type). Canonical names are
/// case-folded so "Acme Corp" and "ACME CORP" dedup to one node.
pub fn entity_id(name: &str, entity_type: &str) -> String {
    hex_digest(&[
        "entity",
        &normalize_content(name).to_lowercase(),
        &entity_type.to_lowercase(),
    ])
}

/// Identifier of a relationship edge: (source entity, relation type, target).
pub fn relationship_id(source_entity_id: &str, relation: &str, target_entity_id: &str) -> String {
    hex_digest(&[
        "relationship",
        source_entity_id,
        &relation.to_lowercase(),
        target_entity_id,
    ])
}
