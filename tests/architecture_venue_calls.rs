use std::fs;
use std::path::{Path, PathBuf};

/// Irreversible venue calls and the only modules allowed to issue them
const GUARDED_CALLS: &[(&str, &[&str])] = &[
    (
        ".create_order(",
        &["src/strategy/hedge_executor.rs", "src/strategy/protective_orders.rs"],
    ),
    (".withdraw(", &["src/strategy/reconciliation.rs"]),
    (".transfer(", &["src/strategy/fund_manager.rs"]),
];

fn collect_rust_files(root: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(root) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_rust_files(&path, out);
            continue;
        }
        if path.extension().and_then(|s| s.to_str()) == Some("rs") {
            out.push(path);
        }
    }
}

/// Source above the unit-test module
fn production_source(content: &str) -> &str {
    content
        .find("#[cfg(test)]\nmod tests")
        .map_or(content, |idx| &content[..idx])
}

#[test]
fn irreversible_venue_calls_stay_in_strategy_components() {
    let repo_root = Path::new(env!("CARGO_MANIFEST_DIR"));
    let mut files = Vec::new();
    collect_rust_files(&repo_root.join("src"), &mut files);
    assert!(!files.is_empty(), "no sources found under src/");

    let mut offenders = Vec::new();
    for file in files {
        let rel = file
            .strip_prefix(repo_root)
            .unwrap_or(&file)
            .to_string_lossy()
            .replace('\\', "/");
        let content = fs::read_to_string(&file).unwrap_or_default();
        for (idx, line) in production_source(&content).lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.starts_with("//") || trimmed.contains("fn ") {
                continue;
            }
            for (call, allowed) in GUARDED_CALLS {
                if trimmed.contains(call) && !allowed.contains(&rel.as_str()) {
                    offenders.push(format!("{rel}:{} {call}", idx + 1));
                }
            }
        }
    }

    assert!(
        offenders.is_empty(),
        "venue calls outside their owning component:\n{}",
        offenders.join("\n")
    );
}
