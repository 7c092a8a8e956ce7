mod common;

use std::fs;

use bioimageio_spec::collection::entry_base;
use bioimageio_spec::fields::merge_over;
use bioimageio_spec::reader::{RdfSource, parse_yaml};
use bioimageio_spec::summary::ErrorTree;
use bioimageio_spec::{BuildOptions, Description, PackageOptions, Packager, ValidationContext};
use indoc::indoc;
use serde_json::Value;
use tempfile::TempDir;

const COLLECTION_YAML: &str = indoc! {r#"
    type: collection
    format_version: 0.2.3
    name: nucleus tools
    description: tools for nucleus segmentation
    license: CC-BY-4.0
    tags: [nuclei]
    collection:
      - id: nuclei-images
        type: dataset
        name: nuclei images
        description: fluorescence images
      - id: broken
        rdf_source: missing/rdf.yaml
      - id: viewer
        rdf_source: viewer/rdf.yaml
"#};

const VIEWER_YAML: &str = indoc! {r#"
    type: application
    format_version: 0.2.3
    name: nucleus viewer
    description: browse segmentations
"#};

fn write_collection(temp: &TempDir) {
    fs::create_dir_all(temp.path().join("viewer")).unwrap();
    fs::write(temp.path().join("bioimageio.yaml"), COLLECTION_YAML).unwrap();
    fs::write(temp.path().join("viewer/rdf.yaml"), VIEWER_YAML).unwrap();
}

#[test]
fn failing_entry_is_reported_under_its_index_only() {
    let temp = TempDir::new().unwrap();
    write_collection(&temp);

    let report = common::resolver().validate(
        &RdfSource::Path(temp.path().to_path_buf()),
        &ValidationContext::default(),
        &BuildOptions::default(),
    );

    assert!(!report.passed());
    assert_eq!(report.nested_errors.keys().copied().collect::<Vec<_>>(), vec![1]);
    let ErrorTree::Message(message) = &report.nested_errors[&1] else {
        panic!("expected a single message, got {:?}", report.nested_errors[&1]);
    };
    assert!(
        message.starts_with("(id=broken) Failed to interpret source as rdf source; "),
        "{message}"
    );

    let lines = report.error.as_ref().unwrap().lines();
    assert_eq!(lines.len(), 1, "{lines:?}");
    assert!(lines[0].starts_with("collection.1"), "{lines:?}");
}

#[test]
fn entries_inherit_parent_fields_and_external_content_wins() {
    let temp = TempDir::new().unwrap();
    write_collection(&temp);
    let text = COLLECTION_YAML.replace(
        "  - id: broken\n    rdf_source: missing/rdf.yaml\n",
        "",
    );
    fs::write(temp.path().join("bioimageio.yaml"), text).unwrap();

    let description = common::resolver()
        .load(
            &RdfSource::Path(temp.path().to_path_buf()),
            &ValidationContext::default(),
            &BuildOptions::default(),
        )
        .unwrap();
    let Description::Valid(descr) = description else {
        panic!("collection should validate: {:?}", description.summary());
    };
    assert!(descr.summary.nested_errors.is_empty());
    assert_eq!(descr.fields["collection"].as_array().unwrap().len(), 2);
}

#[test]
fn entry_warnings_are_prefixed_with_their_index_and_id() {
    let temp = TempDir::new().unwrap();
    fs::write(
        temp.path().join("bioimageio.yaml"),
        indoc! {r#"
            type: collection
            format_version: 0.2.3
            name: nucleus tools
            description: tools
            collection:
              - id: legacy-license
                type: dataset
                name: nuclei images
                description: images
                license: GPL-3.0
        "#},
    )
    .unwrap();

    let report = common::resolver().validate(
        &RdfSource::Path(temp.path().to_path_buf()),
        &ValidationContext::default(),
        &BuildOptions::default(),
    );
    assert!(report.passed(), "{report}");
    let warnings = report.warnings.values().flatten().collect::<Vec<_>>();
    assert!(
        warnings
            .iter()
            .any(|w| w.starts_with("collection[0]:license: (id=legacy-license) ")),
        "{warnings:?}"
    );
}

#[test]
fn invalid_entry_leaves_its_siblings_valid_on_their_own() {
    let temp = TempDir::new().unwrap();
    write_collection(&temp);
    let text = COLLECTION_YAML.replace(
        "  - id: broken\n    rdf_source: missing/rdf.yaml\n",
        "  - id: broken\n    type: workflow\n",
    );
    fs::write(temp.path().join("bioimageio.yaml"), &text).unwrap();
    let resolver = common::resolver();
    let ctx = ValidationContext::default().with_root_dir(temp.path());

    let report = resolver.validate(
        &RdfSource::Path(temp.path().to_path_buf()),
        &ctx,
        &BuildOptions::default(),
    );
    assert!(!report.passed());
    assert_eq!(report.nested_errors.keys().copied().collect::<Vec<_>>(), vec![1]);

    let parent = parse_yaml(&text, "collection").unwrap();
    let entries = parent["collection"].as_array().unwrap();
    let Value::Object(first) = &entries[0] else {
        panic!("inline entry expected");
    };
    let first = resolver.build(&merge_over(&entry_base(&parent), first), &ctx, &BuildOptions::default());
    assert!(first.is_valid(), "{:?}", first.summary());

    let third = resolver
        .load(
            &RdfSource::Path(temp.path().join("viewer/rdf.yaml")),
            &ctx,
            &BuildOptions::default(),
        )
        .unwrap();
    assert!(third.is_valid(), "{:?}", third.summary());
}

#[test]
fn packaging_bundles_external_entries_and_their_files() {
    let temp = TempDir::new().unwrap();
    write_collection(&temp);
    let text = COLLECTION_YAML.replace("  - id: broken\n    rdf_source: missing/rdf.yaml\n", "");
    fs::write(temp.path().join("bioimageio.yaml"), text).unwrap();
    fs::create_dir_all(temp.path().join("viewer/images")).unwrap();
    fs::write(temp.path().join("viewer/images/cover.png"), b"viewer cover").unwrap();
    fs::write(
        temp.path().join("viewer/rdf.yaml"),
        format!("{VIEWER_YAML}covers: [images/cover.png]\n"),
    )
    .unwrap();

    let resolver = common::resolver();
    let ctx = ValidationContext::default();
    let descr = resolver
        .load(&RdfSource::Path(temp.path().to_path_buf()), &ctx, &BuildOptions::default())
        .unwrap()
        .into_valid()
        .unwrap();

    let out = temp.path().join("dist/tools");
    Packager::new(&resolver, &ctx, PackageOptions::default())
        .save_as_folder(&descr, &out)
        .unwrap();

    let mut files: Vec<String> = fs::read_dir(&out)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    files.sort();
    assert_eq!(files, vec!["bioimageio.yaml", "cover.png", "rdf_1.yaml"]);

    let metadata = parse_yaml(&fs::read_to_string(out.join("bioimageio.yaml")).unwrap(), "metadata").unwrap();
    assert_eq!(metadata["collection"][1]["rdf_source"], "rdf_1.yaml");
    assert_eq!(metadata["collection"][1]["id"], "viewer");
    let viewer = parse_yaml(&fs::read_to_string(out.join("rdf_1.yaml")).unwrap(), "viewer").unwrap();
    assert_eq!(viewer["covers"], serde_json::json!(["cover.png"]));
    assert_eq!(fs::read(out.join("cover.png")).unwrap(), b"viewer cover");

    let reloaded = resolver
        .load(&RdfSource::Path(out), &ctx, &BuildOptions::default())
        .unwrap();
    assert!(reloaded.is_valid(), "{:?}", reloaded.summary());
}
