use std::path::Path;
use std::process::Command as StdCommand;

use repo_wiki::config::MaterializeConfig;
use repo_wiki::contract::RepositoryFetcher;
use repo_wiki::download::GitCli;
use repo_wiki::error::RepositoryError;
use tempfile::TempDir;

fn git(args: &[&str], dir: &Path) {
    let status = StdCommand::new("git")
        .args(args)
        .current_dir(dir)
        .status()
        .expect("git runs");
    assert!(status.success(), "git {args:?} failed");
}

/// A one-commit repository on disk, usable as a `file://` clone source.
fn local_origin() -> TempDir {
    let origin = TempDir::new().expect("temp dir");
    git(&["init", "--quiet"], origin.path());
    std::fs::write(origin.path().join("main.py"), "def main():\n    pass\n").unwrap();
    git(&["add", "main.py"], origin.path());
    git(
        &[
            "-c",
            "user.name=wiki",
            "-c",
            "user.email=wiki@example.com",
            "commit",
            "--quiet",
            "-m",
            "init",
        ],
        origin.path(),
    );
    origin
}

fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

#[tokio::test]
async fn clone_of_missing_repository_reports_git_output() {
    let scratch = TempDir::new().expect("temp dir");
    let missing = scratch.path().join("no-such-origin");
    let fetcher = GitCli::new(&MaterializeConfig::default());

    let err = fetcher
        .shallow_clone(&file_url(&missing), &scratch.path().join("checkout"))
        .await
        .unwrap_err();

    match err {
        RepositoryError::CloneFailed(message) => assert!(!message.is_empty()),
        other => panic!("expected CloneFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn zero_clone_timeout_times_out() {
    let origin = local_origin();
    let scratch = TempDir::new().expect("temp dir");
    let config = MaterializeConfig {
        clone_timeout_secs: 0,
        ..MaterializeConfig::default()
    };
    let fetcher = GitCli::new(&config);

    let err = fetcher
        .shallow_clone(&file_url(origin.path()), &scratch.path().join("checkout"))
        .await
        .unwrap_err();

    assert!(matches!(err, RepositoryError::Timeout { secs: 0 }), "{err:?}");
    assert!(err.to_string().starts_with("Git clone timed out after 0s"));
}

#[tokio::test]
async fn shallow_clone_and_revision_of_local_repository() {
    let origin = local_origin();
    let scratch = TempDir::new().expect("temp dir");
    let dest = scratch.path().join("checkout");
    let fetcher = GitCli::new(&MaterializeConfig::default());

    fetcher
        .shallow_clone(&file_url(origin.path()), &dest)
        .await
        .expect("clone succeeds");
    assert!(dest.join("main.py").is_file());

    let rev = fetcher.short_revision(&dest).await.expect("revision present");
    assert!(rev.len() >= 7);
    assert!(rev.chars().all(|c| c.is_ascii_hexdigit()));
}

#[tokio::test]
async fn short_revision_outside_a_repository_is_none() {
    let plain = TempDir::new().expect("temp dir");
    let fetcher = GitCli::new(&MaterializeConfig::default());

    assert_eq!(fetcher.short_revision(plain.path()).await, None);
}
