use std::fs::{self, File};
use std::path::Path;

use pipemin::config::EffectiveConfig;
use pipemin::error::PipeminError;
use pipemin::plan::{Composition, build_plan};
use pipemin::recipe::Project;
use pipemin::registry::stage;
use pipemin::transforms::TransformCatalog;
use pipemin::validation::{validate_config, validate_tasks};
use serde_json::{Value, json};
use tempfile::tempdir;

const INDEX: &str = r#"<!doctype html>
<html>
  <head>
    <!-- build:css css/site.css -->
    <link rel="stylesheet" href="css/base.css">
    <!-- endbuild -->
  </head>
  <body>
    <!-- build:js js/app.js -->
    <script src="js/a.js"></script>
    <script src="js/b.js"></script>
    <!-- endbuild -->
  </body>
</html>
"#;

fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn scaffold(root: &Path) {
    write(root, "src/index.html", INDEX);
    write(root, "src/js/a.js", "// first\nvar a = 1;\n");
    write(root, "src/js/b.js", "  var b = 2;\n");
    write(root, "src/css/base.css", "body {\n  margin: 0;\n}\n");
}

fn setup(root: &Path, user: Value) -> Project {
    let config = EffectiveConfig::resolve(user).unwrap();
    Project::setup(root, config, &TransformCatalog::default()).unwrap()
}

#[test]
fn default_recipe_registers_three_tasks() {
    let temp = tempdir().unwrap();
    let project = setup(temp.path(), Value::Null);

    let runner = &project.runner;
    assert_eq!(runner.task_names(), vec!["build", "clean:dist", "package"]);
    assert_eq!(runner.task("build").unwrap().dependencies, vec!["clean:dist"]);
    assert_eq!(runner.task("package").unwrap().dependencies, vec!["build"]);
    assert!(runner.task("clean:dist").unwrap().dependencies.is_empty());
    assert!(runner.dangling_dependencies().is_empty());
}

#[test]
fn build_bundles_minifies_and_cleans_dist() {
    let temp = tempdir().unwrap();
    scaffold(temp.path());
    write(temp.path(), "dist/stale.txt", "old");

    let project = setup(temp.path(), Value::Null);
    project.run(&["build".to_string()]).unwrap();

    let dist = temp.path().join("dist");
    assert!(!dist.join("stale.txt").exists());
    assert_eq!(
        fs::read_to_string(dist.join("js/app.js")).unwrap(),
        "var a = 1;\nvar b = 2;"
    );
    assert_eq!(
        fs::read_to_string(dist.join("css/site.css")).unwrap(),
        "body{margin:0}"
    );

    let page = fs::read_to_string(dist.join("index.html")).unwrap();
    assert!(page.contains(r#"<script src="js/app.js"></script>"#));
    assert!(page.contains(r#"<link rel="stylesheet" href="css/site.css">"#));
    assert!(!page.contains("<!--"));
    assert!(!dist.join("js/a.js").exists());

    let snapshot = project.recipe.metrics().snapshot();
    assert_eq!(snapshot.output_files, 3);
    assert!(snapshot.fragments.contains_key("pipemin"));
    assert!(snapshot.fragments.contains_key("minify-js"));
}

#[test]
fn package_builds_first_and_zips_dist() {
    let temp = tempdir().unwrap();
    scaffold(temp.path());

    let project = setup(temp.path(), Value::Null);
    project.run(&["package".to_string()]).unwrap();

    let archive = zip::ZipArchive::new(File::open(temp.path().join("package.zip")).unwrap())
        .unwrap();
    let mut names: Vec<_> = archive.file_names().map(str::to_string).collect();
    names.sort();
    assert_eq!(names, vec!["css/site.css", "index.html", "js/app.js"]);
}

#[test]
fn renamed_tasks_keep_their_wiring() {
    let temp = tempdir().unwrap();
    let project = setup(
        temp.path(),
        json!({ "tasks": { "build": "compile", "cleanDist": "wipe" } }),
    );

    let runner = &project.runner;
    assert_eq!(runner.task("compile").unwrap().dependencies, vec!["wipe"]);
    assert_eq!(runner.task("package").unwrap().dependencies, vec!["compile"]);
    assert!(runner.task("build").is_none());
}

#[test]
fn disabled_build_leaves_package_dangling() {
    let temp = tempdir().unwrap();
    scaffold(temp.path());
    let project = setup(temp.path(), json!({ "tasks": { "build": "" } }));

    let runner = &project.runner;
    assert!(runner.task("build").is_none());
    assert_eq!(runner.task("package").unwrap().dependencies, vec!["build"]);
    assert_eq!(runner.dangling_dependencies().len(), 1);
    assert_eq!(validate_tasks(runner).warnings.len(), 1);

    let err = project.run(&["package".to_string()]).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipeminError>(),
        Some(PipeminError::DanglingTaskDependency { dependency, .. }) if dependency == "build"
    ));
    assert!(!temp.path().join("package.zip").exists());
}

#[test]
fn configured_pipes_join_their_stage() {
    let temp = tempdir().unwrap();
    scaffold(temp.path());
    let user = json!({
        "pipes": [
            {
                "stage": "postMerge",
                "order": 10,
                "use": "banner",
                "params": { "text": "/* {file} */", "extensions": [".js"] }
            }
        ]
    });

    let project = setup(temp.path(), user);
    project.run(&["build".to_string()]).unwrap();

    let bundle = fs::read_to_string(temp.path().join("dist/js/app.js")).unwrap();
    assert!(bundle.starts_with("/* js/app.js */\n"));
    let page = fs::read_to_string(temp.path().join("dist/index.html")).unwrap();
    assert!(!page.starts_with("/*"));
}

#[test]
fn rev_renames_bundles_and_rewrites_pages() {
    let temp = tempdir().unwrap();
    scaffold(temp.path());
    let user = json!({ "pipes": [ { "stage": "postMerge", "use": "rev" } ] });

    let project = setup(temp.path(), user);
    project.run(&["build".to_string()]).unwrap();

    let dist = temp.path().join("dist");
    let revved: Vec<String> = fs::read_dir(dist.join("js"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(revved.len(), 1);
    assert!(revved[0].starts_with("app-") && revved[0].ends_with(".js"));

    let page = fs::read_to_string(dist.join("index.html")).unwrap();
    assert!(page.contains(&format!("js/{}", revved[0])));
}

#[test]
fn raw_build_sources_are_copied_beside_the_pages() {
    let temp = tempdir().unwrap();
    scaffold(temp.path());
    write(temp.path(), "static/robots.txt", "User-agent: *");
    let project = setup(
        temp.path(),
        json!({ "sources": { "build": ["static/*.txt"] } }),
    );

    project.run(&["build".to_string()]).unwrap();
    assert_eq!(
        fs::read_to_string(temp.path().join("dist/robots.txt")).unwrap(),
        "User-agent: *"
    );
}

#[test]
fn unknown_configured_transform_fails_setup() {
    let temp = tempdir().unwrap();
    let config = EffectiveConfig::resolve(json!({
        "pipes": [ { "stage": "postBuild", "use": "transmogrify" } ]
    }))
    .unwrap();

    let catalog = TransformCatalog::default();
    assert!(!validate_config(&config, &catalog).is_ok());
    let err = Project::setup(temp.path(), config, &catalog).err().unwrap();
    assert!(err.to_string().contains("transmogrify"));
}

#[test]
fn plan_lists_stages_in_execution_order() {
    let temp = tempdir().unwrap();
    let project = setup(
        temp.path(),
        json!({ "pipes": [
            { "stage": "processJs", "order": 150, "use": "banner", "params": { "text": "x" } },
            { "stage": "processJs", "order": 1, "use": "sort" }
        ] }),
    );

    let plan = build_plan(
        project.recipe.config(),
        project.recipe.registry(),
        &project.runner,
    )
    .unwrap();
    let process_js = plan
        .stages
        .iter()
        .find(|s| s.name == stage::PROCESS_JS)
        .unwrap();
    assert_eq!(process_js.composition, Composition::Sequential);
    assert_eq!(process_js.steps, vec!["sort", "minify-js", "banner"]);

    let asset = plan.stages.iter().find(|s| s.name == stage::ASSET).unwrap();
    assert_eq!(asset.composition, Composition::Merged);
    assert_eq!(plan.tasks.len(), 3);
}

#[test]
fn empty_dist_path_is_rejected_before_anything_runs() {
    let temp = tempdir().unwrap();
    write(temp.path(), "precious.txt", "keep me");

    let err = EffectiveConfig::resolve(json!({ "paths": { "dist": "" } })).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipeminError>(),
        Some(PipeminError::Configuration { .. })
    ));
    assert!(temp.path().join("precious.txt").is_file());
}

#[test]
fn clean_dist_refuses_to_remove_the_working_directory() {
    let temp = tempdir().unwrap();
    let root = temp.path().join("site");
    write(&root, "precious.txt", "keep me");

    let project = setup(&root, json!({ "paths": { "dist": ".." } }));
    let err = project.run(&["clean:dist".to_string()]).unwrap_err();
    assert!(err.to_string().contains("Refusing to remove"));
    assert!(root.join("precious.txt").is_file());
}

#[test]
fn roots_with_glob_metacharacters_still_build_and_package() {
    let temp = tempdir().unwrap();
    let root = temp.path().join("site[1]");
    scaffold(&root);

    let project = setup(&root, Value::Null);
    project.run(&["package".to_string()]).unwrap();

    assert!(root.join("dist/index.html").is_file());
    assert!(root.join("dist/js/app.js").is_file());
    let archive = zip::ZipArchive::new(File::open(root.join("package.zip")).unwrap()).unwrap();
    assert_eq!(archive.len(), 3);
}
