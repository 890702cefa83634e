mod common;

use canham::Args;
use clap::Parser;
use common::Project;

fn args(project: &Project, rest: &[&str]) -> Args {
    let mut argv = vec!["canham", "--root", project.root.as_str()];
    argv.extend_from_slice(rest);
    Args::try_parse_from(argv).unwrap()
}

#[test]
fn build_command_publishes() {
    let project = Project::new();

    canham::run(&args(&project, &["build", "--dist"])).unwrap();

    assert!(project.manifest().is_file());
    assert!(project.public().join(".htaccess").is_file());
}

#[test]
fn run_command_with_unknown_task_fails() {
    let project = Project::new();

    let err = canham::run(&args(&project, &["run", "css", "sprites"])).unwrap_err();
    assert!(err.to_string().contains("Unknown task 'sprites'"), "{err}");
}

#[test]
fn missing_explicit_config_fails() {
    let project = Project::new();

    let result = canham::run(&args(&project, &["--config", "Other.toml", "tasks"]));
    assert!(matches!(
        result,
        Err(canham::CanhamError::Config(canham::ConfigError::Read(..)))
    ));
}

#[test]
fn missing_root_fails() {
    let argv = ["canham", "--root", "/definitely/not/here", "tasks"];
    let result = canham::run(&Args::try_parse_from(argv).unwrap());
    assert!(matches!(
        result,
        Err(canham::CanhamError::Config(canham::ConfigError::Read(..)))
    ));
}
