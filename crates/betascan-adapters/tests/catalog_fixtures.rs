use betascan_adapters::CatalogFormat;
use betascan_core::normalize_name;

fn fixture(name: &str) -> Vec<u8> {
    let root = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");
    std::fs::read(root.join("fixtures/catalog").join(name)).expect("fixture present")
}

#[test]
fn json_fixture_parses_and_drops_nameless_rows() {
    let entries = CatalogFormat::Json.parse(&fixture("apps.json")).unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].categories, vec!["Productivity".to_string()]);
    assert_eq!(entries[1].description, "");
    assert_eq!(normalize_name(&entries[2].name), "Caf%C3%A9%20Finder");
}

#[test]
fn markdown_fixture_matches_json_names() {
    let md = CatalogFormat::Markdown.parse(&fixture("daily.md")).unwrap();
    let keys = md.iter().map(|e| normalize_name(&e.name)).collect::<Vec<_>>();
    assert_eq!(keys, vec!["acme-notes", "beta-box", "orbit-player"]);
    assert!(md.iter().all(|e| e.link.starts_with("https://testflight.apple.com/join/")));
}
