use std::path::{Path, PathBuf};

const MAX_LINES: usize = 750;

const CHECKED_EXTENSIONS: &[&str] = &["rs"];

const CHECKED_ROOT: &str = "src";

fn main() {
    println!("cargo:rerun-if-changed={}", CHECKED_ROOT);

    enforce_line_limits();
    enforce_no_dead_code_allows();
    enforce_no_test_skips();
    enforce_no_env_mutations_in_tests();
}

fn source_files() -> (PathBuf, Vec<PathBuf>) {
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string());
    let root = PathBuf::from(&manifest_dir);
    let mut files = Vec::new();
    walk_directory(&root.join(CHECKED_ROOT), &mut files);
    (root, files)
}

fn walk_directory(dir: &Path, files: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return,
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk_directory(&path, files);
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| CHECKED_EXTENSIONS.contains(&ext))
        {
            files.push(path);
        }
    }
}

fn count_non_empty_lines(content: &str) -> usize {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .count()
}

fn report(title: &str, violations: &[(PathBuf, usize, String)], advice: &[&str]) {
    eprintln!("\n========================================");
    eprintln!("{}", title);
    eprintln!("========================================");
    for (path, line, message) in violations {
        eprintln!("  {}:{}", path.display(), line);
        eprintln!("    {}", message.trim());
    }
    eprintln!("========================================");
    for line in advice {
        eprintln!("{}", line);
    }
    eprintln!("========================================\n");
}

fn enforce_line_limits() {
    let (root, files) = source_files();
    let mut violations = Vec::new();

    for file in &files {
        println!("cargo:rerun-if-changed={}", file.display());
        if let Ok(content) = std::fs::read_to_string(file) {
            let line_count = count_non_empty_lines(&content);
            if line_count > MAX_LINES {
                let rel_path = file.strip_prefix(&root).unwrap_or(file).to_path_buf();
                violations.push((
                    rel_path,
                    line_count,
                    format!("exceeds by {}", line_count - MAX_LINES),
                ));
            }
        }
    }

    if !violations.is_empty() {
        report(
            &format!("FILE LINE LIMIT EXCEEDED (max {} lines)", MAX_LINES),
            &violations,
            &["Please split these files into smaller modules."],
        );
        panic!(
            "Build failed: {} file(s) exceed the {} line limit",
            violations.len(),
            MAX_LINES
        );
    }
}

fn enforce_no_dead_code_allows() {
    let (root, files) = source_files();
    let mut violations = Vec::new();

    for file in &files {
        if let Ok(content) = std::fs::read_to_string(file) {
            for (line_num, line) in content.lines().enumerate() {
                let trimmed = line.trim();
                if (trimmed.starts_with("#[allow(") || trimmed.starts_with("#![allow("))
                    && trimmed.contains("dead_code")
                {
                    let rel_path = file.strip_prefix(&root).unwrap_or(file).to_path_buf();
                    violations.push((rel_path, line_num + 1, line.to_string()));
                }
            }
        }
    }

    if !violations.is_empty() {
        report(
            "#[allow(dead_code)] IS NOT ALLOWED",
            &violations,
            &[
                "Delete unused code entirely.",
                "If the code is for tests, use #[cfg(test)].",
            ],
        );
        panic!(
            "Build failed: {} #[allow(dead_code)] occurrence(s) found. Remove the dead code.",
            violations.len()
        );
    }
}

/// Scans each `#[test]` body, calling `check` for every line until the body closes.
///
/// `check` returns a message to record a violation; only the first one per test is kept.
fn scan_test_bodies<F>(lines: &[&str], mut check: F) -> Vec<(usize, String)>
where
    F: FnMut(&str, &str, i32) -> Option<String>,
{
    let mut found = Vec::new();
    let mut in_test_fn = false;
    let mut test_fn_start = 0;
    let mut test_fn_name = String::new();
    let mut brace_depth = 0;

    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim();

        if trimmed == "#[test]" {
            for candidate in lines.iter().skip(i + 1).take(4) {
                if let Some(fn_pos) = candidate.find("fn ") {
                    test_fn_start = i + 1;
                    let after_fn = candidate.get(fn_pos + 3..).unwrap_or_default();
                    test_fn_name = after_fn
                        .split('(')
                        .next()
                        .unwrap_or_default()
                        .trim()
                        .to_string();
                    in_test_fn = true;
                    brace_depth = 0;
                    break;
                }
            }
        }

        if in_test_fn {
            for c in line.chars() {
                if c == '{' {
                    brace_depth += 1;
                } else if c == '}' {
                    brace_depth -= 1;
                    if brace_depth == 0 {
                        in_test_fn = false;
                    }
                }
            }

            if let Some(message) = check(line, trimmed, brace_depth) {
                found.push((test_fn_start, format!("test `{}` {}", test_fn_name, message)));
                in_test_fn = false;
            }
        }
    }

    found
}

/// Bans tests that silently skip instead of failing.
fn enforce_no_test_skips() {
    let (root, files) = source_files();
    let skip_patterns = ["Skipping test", "skipping test", "Test skipped", "test skipped"];
    let mut violations = Vec::new();

    for file in &files {
        if let Ok(content) = std::fs::read_to_string(file) {
            let lines: Vec<&str> = content.lines().collect();
            let found = scan_test_bodies(&lines, |line, trimmed, depth| {
                if let Some(pattern) = skip_patterns.iter().find(|p| line.contains(*p)) {
                    return Some(format!("contains skip pattern: {}", pattern));
                }
                if trimmed == "return;" && depth > 1 {
                    return Some("has conditional early return (silent skip)".to_string());
                }
                None
            });
            let rel_path = file.strip_prefix(&root).unwrap_or(file).to_path_buf();
            violations.extend(found.into_iter().map(|(l, m)| (rel_path.clone(), l, m)));
        }
    }

    if !violations.is_empty() {
        report(
            "SILENT TEST SKIPS ARE NOT ALLOWED",
            &violations,
            &["Tests must FAIL if they cannot run, not silently pass."],
        );
        panic!(
            "Build failed: {} silent test skip(s) found. Make tests fail instead of skip.",
            violations.len()
        );
    }
}

/// Bans process environment mutation in tests; tests run in parallel threads.
fn enforce_no_env_mutations_in_tests() {
    let (root, files) = source_files();
    let mut violations = Vec::new();

    for file in &files {
        if let Ok(content) = std::fs::read_to_string(file) {
            let lines: Vec<&str> = content.lines().collect();
            let found = scan_test_bodies(&lines, |_, trimmed, _| {
                let mutates = !trimmed.starts_with("//")
                    && (trimmed.contains("env::set_var") || trimmed.contains("env::remove_var"));
                mutates.then(|| "mutates the process environment".to_string())
            });
            let rel_path = file.strip_prefix(&root).unwrap_or(file).to_path_buf();
            violations.extend(found.into_iter().map(|(l, m)| (rel_path.clone(), l, m)));
        }
    }

    if !violations.is_empty() {
        report(
            "TESTS MUST NOT MUTATE THE PROCESS ENVIRONMENT",
            &violations,
            &["Seed an EnvironmentHost instead of calling env::set_var."],
        );
        panic!(
            "Build failed: {} test(s) mutate env vars.",
            violations.len()
        );
    }
}
