//! Renders every `tests/cases/*.pug` and compares with the `.html` beside it.

use std::fs;
use std::path::{Path, PathBuf};

use pug::{text_filter, Options, Value};
use serde_json::json;

fn cases_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/cases")
}

fn options(filename: &Path) -> Options {
    let custom = text_filter(|text, options| {
        assert_eq!(options.get("opt"), Some(&Value::from("val")));
        assert_eq!(options.get("num"), Some(&Value::Number(2.0)));
        Ok(format!("BEGIN{text}END"))
    });
    Options::new()
        .with_filename(filename)
        .with_basedir(cases_dir())
        .with_pretty(true)
        .with_filter("custom", custom)
}

#[test]
fn cases_render_as_expected() {
    let mut entries: Vec<PathBuf> = fs::read_dir(cases_dir())
        .unwrap_or_else(|e| panic!("cannot open {}: {e}", cases_dir().display()))
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|x| x == "pug"))
        .collect();
    entries.sort();
    assert!(!entries.is_empty(), "no cases found");

    let mut failures = Vec::new();
    for path in &entries {
        let src = fs::read_to_string(path).unwrap();
        let expected = fs::read_to_string(path.with_extension("html"))
            .unwrap_or_else(|e| panic!("missing expectation for {}: {e}", path.display()));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        match pug::compile(&src, &options(path)).and_then(|t| t.render(&Value::from(json!({"title": "Pug"})))) {
            Ok(html) if html.trim() == expected.trim() => {}
            Ok(html) => failures.push(format!("{name}: expected\n{}\n--- got\n{}", expected.trim(), html.trim())),
            Err(e) => failures.push(format!("{name}: {e}")),
        }
    }

    if !failures.is_empty() {
        panic!("{}/{} cases failed:\n{}", failures.len(), entries.len(), failures.join("\n\n"));
    }
}

#[test]
fn dependencies_of_the_extending_case() {
    let path = cases_dir().join("extends.pug");
    let template = pug::compile_file(&path, &options(&path)).unwrap();
    let names: Vec<String> = template
        .dependencies()
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, ["extends.pug", "layout.pug"]);
}
