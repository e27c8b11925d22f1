mod support;

use serde_json::json;
use std::fs::File;
use std::io::{Read, Write};
use support::{seed_catalog, temp_dir, Sidecar};
use zip::write::FileOptions;

#[test]
fn bundle_export_and_import_roundtrip() {
    let src = temp_dir("registrar-bundle-src");
    let dst = temp_dir("registrar-bundle-dst");
    let out_dir = temp_dir("registrar-bundle-out");
    let bundle = out_dir.join("workspace.zip");

    let mut s = Sidecar::with_workspace(&src);
    seed_catalog(&mut s, "Exported Term");
    let exported = s.ok(
        "backup.exportWorkspaceBundle",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(exported["bundleFormat"], json!("registrar-workspace-v1"));
    let sha = exported["dbSha256"].as_str().expect("sha").to_string();
    assert_eq!(sha.len(), 64);

    let mut archive = zip::ZipArchive::new(File::open(&bundle).expect("open bundle"))
        .expect("zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    assert!(manifest.contains(&sha));
    archive
        .by_name("db/registrar.sqlite3")
        .expect("database entry");

    let mut fresh = Sidecar::with_workspace(&dst);
    assert_eq!(fresh.ok("terms.list", json!({}))["terms"], json!([]));
    let imported = fresh.ok(
        "backup.importWorkspaceBundle",
        json!({ "inPath": bundle.to_string_lossy() }),
    );
    assert_eq!(imported["dbSha256"], json!(sha));
    let terms = fresh.ok("terms.list", json!({}));
    assert_eq!(terms["terms"][0]["name"], json!("Exported Term"));
    let courses = fresh.ok("courses.list", json!({}));
    assert_eq!(courses["courses"].as_array().map(|a| a.len()), Some(6));

    let _ = std::fs::remove_dir_all(src);
    let _ = std::fs::remove_dir_all(dst);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn tampered_bundle_is_refused() {
    let dst = temp_dir("registrar-bundle-tampered");
    let bundle = dst.join("tampered.zip");
    {
        let mut zip = zip::ZipWriter::new(File::create(&bundle).expect("create bundle"));
        let opts = FileOptions::default();
        zip.start_file("manifest.json", opts).expect("manifest");
        zip.write_all(
            json!({ "format": "registrar-workspace-v1", "dbSha256": "00".repeat(32) })
                .to_string()
                .as_bytes(),
        )
        .expect("write manifest");
        zip.start_file("db/registrar.sqlite3", opts).expect("db entry");
        zip.write_all(b"definitely not the promised bytes")
            .expect("write db");
        zip.finish().expect("finish");
    }

    let mut s = Sidecar::with_workspace(&dst);
    s.ok("terms.create", json!({ "name": "Keep Me" }));
    assert_eq!(
        s.err_code(
            "backup.importWorkspaceBundle",
            json!({ "inPath": bundle.to_string_lossy() })
        ),
        "io_failed"
    );
    assert_eq!(
        s.err_code(
            "backup.importWorkspaceBundle",
            json!({ "inPath": dst.join("missing.zip").to_string_lossy() })
        ),
        "not_found"
    );

    let mut again = Sidecar::with_workspace(&dst);
    let terms = again.ok("terms.list", json!({}));
    assert_eq!(terms["terms"][0]["name"], json!("Keep Me"));

    let _ = std::fs::remove_dir_all(dst);
}
