//! Embeds `contracts/v1/*.schema.json` so tests and tools can validate wire
//! payloads without touching the filesystem.

use std::fs;
use std::path::PathBuf;

fn main() {
    let manifest_dir =
        PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR"));
    let schema_dir = manifest_dir.join("../../contracts/v1");
    println!("cargo:rerun-if-changed={}", schema_dir.display());

    let mut schemas: Vec<(String, String)> = fs::read_dir(&schema_dir)
        .expect("contracts/v1 must exist")
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter_map(|path| {
            let name = path.file_name()?.to_str()?.to_string();
            if !name.ends_with(".schema.json") {
                return None;
            }
            println!("cargo:rerun-if-changed={}", path.display());
            let body = fs::read_to_string(&path)
                .unwrap_or_else(|e| panic!("cannot read {}: {e}", path.display()));
            Some((name, body))
        })
        .collect();
    schemas.sort();

    let mut out = String::from("pub const EMBEDDED_SCHEMAS: &[(&str, &str)] = &[\n");
    for (name, body) in &schemas {
        out.push_str(&format!("    ({name:?}, {body:?}),\n"));
    }
    out.push_str("];\n");

    let out_dir = PathBuf::from(std::env::var("OUT_DIR").expect("OUT_DIR"));
    fs::write(out_dir.join("schemas.rs"), out).expect("write schemas.rs");
}
