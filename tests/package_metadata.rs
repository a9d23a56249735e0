//! Checks on the published package metadata.

const MANIFEST: &str = include_str!("../Cargo.toml");

#[test]
fn test_manifest_has_no_template_placeholders() {
    for placeholder in ["your-username", "example.com", "Your Name"] {
        assert!(!MANIFEST.contains(placeholder), "Cargo.toml still contains {placeholder:?}");
    }
    assert!(!env!("CARGO_PKG_AUTHORS").is_empty());
    assert_eq!(env!("CARGO_PKG_NAME"), "tn5250-core");
}
