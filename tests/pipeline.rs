mod common;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::sync::mpsc::channel;
use std::time::Duration;

use camino::Utf8PathBuf;
use canham::{Mode, Reload, Step};
use common::{Project, graph};

fn public_files(project: &Project) -> BTreeSet<Utf8PathBuf> {
    canham::io::files(project.public()).unwrap().into_iter().collect()
}

fn manifest(project: &Project) -> BTreeMap<String, String> {
    serde_json::from_str(&project.read(project.manifest())).unwrap()
}

#[test]
fn dev_rebuild_leaves_no_leftovers() {
    let project = Project::new();
    let env = project.env(Mode::Dev);

    graph().run(&env, ["build"]).unwrap();
    assert!(public_files(&project).contains(&Utf8PathBuf::from("images/icons/arrow.svg")));

    project.remove("theme/images/icons/arrow.svg");
    graph().run(&env, ["build"]).unwrap();

    let staged: BTreeSet<_> = canham::io::files(env.staging()).unwrap().into_iter().collect();
    assert_eq!(public_files(&project), staged);
    assert!(!project.public().join("images/icons").exists());
}

#[test]
fn dist_rebuild_leaves_no_leftovers() {
    let project = Project::new();
    let env = project.env(Mode::Dist);

    graph().run(&env, ["build"]).unwrap();
    project.remove("theme/images/icons/arrow.svg");
    graph().run(&env, ["build"]).unwrap();

    let mut expected: BTreeSet<_> = manifest(&project).into_values().map(Utf8PathBuf::from).collect();
    expected.insert(Utf8PathBuf::from(".htaccess"));

    assert_eq!(public_files(&project), expected);
    assert!(!manifest(&project).contains_key("images/icons/arrow.svg"));
}

#[test]
fn dist_manifest_names_existing_unique_files() {
    let project = Project::new();
    let env = project.env(Mode::Dist);

    let report = graph().run(&env, ["build"]).unwrap();
    assert!(report.is_clean(), "{report}");

    let manifest = manifest(&project);
    for original in ["styles/main.css", "scripts/main.js", "scripts/modernizr.js", "images/logo.png"] {
        assert!(manifest.contains_key(original), "{original} missing from manifest");
    }

    let mut seen = HashSet::new();
    for (original, revved) in &manifest {
        assert_ne!(original, revved);
        assert!(project.public().join(revved).is_file(), "{revved} does not exist");
        assert!(seen.insert(revved), "{revved} produced twice");
    }

    // Only fingerprinted names end up public.
    assert!(!project.public().join("styles/main.css").exists());
    assert_eq!(
        fs::read_to_string(project.public().join(".htaccess")).unwrap(),
        "Options -Indexes\n"
    );

    // The stylesheet points at the fingerprinted image.
    let css = fs::read_to_string(project.public().join(&manifest["styles/main.css"])).unwrap();
    let logo = Utf8PathBuf::from(&manifest["images/logo.png"]);
    assert!(css.contains(&format!("../images/{}", logo.file_name().unwrap())), "{css}");
}

#[test]
fn dist_fingerprint_follows_content() {
    let project = Project::new();
    let env = project.env(Mode::Dist);

    graph().run(&env, ["build"]).unwrap();
    let before = manifest(&project);

    project.write("theme/js/lib/slider.js", "var slider = function () { return 1; };\n");
    graph().run(&env, ["build"]).unwrap();
    let after = manifest(&project);

    assert_ne!(before["scripts/main.js"], after["scripts/main.js"]);
    assert_eq!(before["images/logo.png"], after["images/logo.png"]);
}

#[test]
fn dev_writes_no_manifest_and_resyncs_nothing() {
    let project = Project::new();
    let (tx, rx) = channel();
    let env = project.env(Mode::Dev).with_reload(tx);

    graph().run(&env, ["build"]).unwrap();
    assert!(!project.manifest().exists());
    assert!(rx.try_iter().count() > 0);

    let modified = |rel: &str| {
        fs::metadata(project.public().join(rel))
            .unwrap()
            .modified()
            .unwrap()
    };
    let css = modified("styles/main.css");
    let png = modified("images/logo.png");

    std::thread::sleep(Duration::from_millis(50));
    graph().run(&env, ["build"]).unwrap();

    assert!(!project.manifest().exists());
    assert_eq!(rx.try_iter().collect::<Vec<Reload>>(), vec![]);
    assert_eq!(modified("styles/main.css"), css);
    assert_eq!(modified("images/logo.png"), png);
}

#[test]
fn dev_style_change_is_injected() {
    let project = Project::new();
    let (tx, rx) = channel();
    let env = project.env(Mode::Dev).with_reload(tx);

    graph().run(&env, ["build"]).unwrap();
    rx.try_iter().for_each(drop);

    project.write("theme/css/_vars.scss", "$accent: #bada55;\n");
    graph()
        .sequence(&env, &[Step::from("css"), Step::from("rev")])
        .unwrap();

    assert_eq!(
        rx.try_iter().collect::<Vec<_>>(),
        vec![Reload::Inject("styles/main.css".into())]
    );
}

#[test]
fn scripts_are_concatenated_in_order() {
    let project = Project::new();
    let env = project.env(Mode::Dev);

    graph().run(&env, ["js"]).unwrap();
    let script = project.read(env.staging().join("scripts/main.js"));

    let order = [
        "var jQuery = {};",
        "var canham = {",
        "var slider = function",
        "canham.pageHome = function",
        "jQuery(canham.ready);",
    ];
    let positions: Vec<_> = order
        .iter()
        .map(|needle| script.find(needle).unwrap_or_else(|| panic!("{needle} missing")))
        .collect();

    assert!(positions.windows(2).all(|w| w[0] < w[1]), "{positions:?}");

    let map = canham::mapping::embedded(&script).unwrap();
    assert_eq!(map.get_source_count(), 5);
    // jquery.js ends with a newline, so it covers lines 0 and 1.
    let token = map.lookup_token(2, 0).unwrap();
    assert_eq!(token.get_source(), Some("theme/js/canham.js"));
}

#[test]
fn feature_detection_follows_styles_and_scripts() {
    let project = Project::new();
    let env = project.env(Mode::Dev);

    let report = graph().run(&env, ["build"]).unwrap();
    let modernizr = report.position("modernizr").unwrap();
    assert!(report.position("css").unwrap() < modernizr);
    assert!(report.position("js").unwrap() < modernizr);
    assert!(modernizr < report.position("rev").unwrap());

    let detection = project.read(project.public().join("scripts/modernizr.js"));
    let header = detection.lines().next().unwrap();
    let names: Vec<_> = header
        .trim_start_matches("/*! canham feature detection: ")
        .trim_end_matches(" */")
        .split(", ")
        .collect();
    assert_eq!(names, vec!["flexbox", "touchevents"]);

    let css = project.read(project.public().join("styles/main.css"));
    let js = project.read(project.public().join("scripts/main.js"));
    for name in names {
        assert!(css.contains(name) || js.contains(name), "{name} is not used");
    }
}

#[test]
fn run_steps_from_the_command_line() {
    let project = Project::new();
    let env = project.env(Mode::Dev);

    let steps: Vec<_> = ["css,js", "modernizr"].into_iter().map(Step::parse).collect();
    let report = graph().sequence(&env, &steps).unwrap();

    assert!(report.ran("clean:css"));
    assert!(!report.ran("rev"));
    assert!(env.staging().join("scripts/modernizr.js").is_file());
    assert!(!project.public().exists());
}

#[test]
fn legacy_encoded_script_still_builds() {
    let project = Project::new();
    project.write("theme/js/lib/legacy.js", b"var label = \"caf\xE9\";\n");
    let env = project.env(Mode::Dev);

    let report = graph().run(&env, ["build"]).unwrap();
    assert!(report.is_clean(), "{report}");

    let script = project.read(project.public().join("scripts/main.js"));
    assert!(script.contains("var label = \"caf\u{FFFD}\";"));
    assert!(script.contains("jQuery(canham.ready);"));
    assert!(project.public().join("styles/main.css").is_file());
}
