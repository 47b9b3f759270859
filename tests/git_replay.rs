//! Chapter replay against a real git sandbox.
//!
//! Builds a small sample project whose history mirrors a three-step chapter,
//! then replays the chapter from scratch and from a fast-forward point.

mod common;

use book_replay::blocks::parse_chapter_text;
use book_replay::classify::Classifier;
use book_replay::listing::ListingSequence;
use book_replay::replay::{
    Disposition, OutputMatcher, ReplayOptions, SkipDirective, StartPosition,
};
use book_replay::sandbox::git::{GitSandbox, GitSandboxOptions};
use book_replay::sandbox::Sandbox;
use book_replay::verify::IgnoreSet;
use book_replay::workflow::{replay_chapter, ChapterSettings};
use book_replay::ReplayError;
use common::{skip_if_git_missing, SampleRepo};
use indoc::indoc;
use std::collections::BTreeMap;

const CHAPTER: &str = indoc! {r#"
    We start with the smallest possible program.

    ```python file=app.py ref=ch01l001
    print('hello')
    ```

    ```console
    $ git add app.py && git commit -q -m "add app"
    $ cat app.py
    print('hello')
    ```

    Then we add a second line.

    ```python file=app.py ref=ch01l002
    # [...]
    print('world')
    ```

    ```console
    $ git commit -q -am "extend app"
    ```

    ```text file=README
    done
    ```

    ```console
    $ git add README && git commit -q -m "readme"
    $ # all done
    ```
"#};

/// Position of the `# all done` comment.
const COMMENT_POSITION: usize = 8;
/// First listing after the commit labelled `ch01l001`.
const RESUME_POSITION: usize = 4;

fn sample_project() -> SampleRepo {
    let repo = SampleRepo::init().expect("init sample repo");
    repo.write(".gitkeep", "").expect("write");
    repo.commit_all("start").expect("commit");
    repo.branch("chapter_00").expect("branch");
    repo.write("app.py", "print('hello')\n").expect("write");
    repo.commit_all("add app --ch01l001--").expect("commit");
    repo.write("app.py", "print('hello')\nprint('world')\n")
        .expect("write");
    repo.commit_all("extend app --ch01l002--").expect("commit");
    repo.write("README", "done\n").expect("write");
    repo.commit_all("readme --ch01l003--").expect("commit");
    repo
}

fn classify_chapter(chapter: &str) -> ListingSequence {
    let blocks = parse_chapter_text(chapter).expect("parse chapter");
    Classifier::new(&[])
        .expect("classifier")
        .classify(&blocks)
        .expect("classify")
}

fn settings(ignore: &[&str]) -> ChapterSettings {
    ChapterSettings {
        skips: vec![SkipDirective {
            position: COMMENT_POSITION,
            contains: "all done".to_string(),
        }],
        ignore: IgnoreSet::parse(ignore).expect("ignore"),
        matcher: OutputMatcher::new(&[]).expect("matcher"),
        previous_chapter: Some("chapter_00".to_string()),
        final_commit_message: "final commit".to_string(),
    }
}

fn provision(repo: &SampleRepo) -> GitSandbox {
    GitSandbox::provision(&GitSandboxOptions {
        repo: repo.origin().display().to_string(),
        reference: "origin/main".to_string(),
        dest: None,
        env: BTreeMap::new(),
    })
    .expect("provision sandbox")
}

#[test]
fn full_replay_leaves_no_diff() {
    if skip_if_git_missing() {
        return;
    }
    let repo = sample_project();
    let listings = classify_chapter(CHAPTER);
    assert_eq!(listings.len(), COMMENT_POSITION + 1);

    let mut sandbox = provision(&repo);
    let state = replay_chapter(
        &listings,
        &mut sandbox,
        &settings(&[]),
        &ReplayOptions::default(),
    )
    .into_result()
    .expect("chapter replays cleanly");
    assert_eq!(state.processed().len(), listings.len());
    assert_eq!(
        state.processed().get(COMMENT_POSITION),
        Some(Disposition::Skipped)
    );
    assert_eq!(
        sandbox.read_file("app.py").expect("read app.py"),
        "print('hello')\nprint('world')\n"
    );
}

#[test]
fn fast_forward_is_transparent() {
    if skip_if_git_missing() {
        return;
    }
    let repo = sample_project();
    let listings = classify_chapter(CHAPTER);
    let mut sandbox = provision(&repo);
    let options = ReplayOptions {
        start: Some(StartPosition {
            position: RESUME_POSITION,
            commit_label: "ch01l001".to_string(),
        }),
    };
    let state = replay_chapter(&listings, &mut sandbox, &settings(&[]), &options)
        .into_result()
        .expect("resumed chapter replays cleanly");
    assert_eq!(state.processed().len(), listings.len());
    assert_eq!(state.fast_forwarded_to(), Some(RESUME_POSITION));
    assert_eq!(
        state.processed().get(RESUME_POSITION - 1),
        Some(Disposition::FastForwarded)
    );
    assert!(sandbox.diff(&IgnoreSet::default()).expect("diff").is_none());
}

#[test]
fn diverging_file_fails_final_diff_unless_ignored() {
    if skip_if_git_missing() {
        return;
    }
    let repo = sample_project();
    let chapter = CHAPTER.replace("```text file=README\ndone\n", "```text file=README\nnot done\n");
    let listings = classify_chapter(&chapter);

    let mut sandbox = provision(&repo);
    let outcome = replay_chapter(
        &listings,
        &mut sandbox,
        &settings(&[]),
        &ReplayOptions::default(),
    );
    match outcome.error {
        Some(ReplayError::FinalDiffMismatch { hunk }) => {
            assert!(hunk.contains("README"), "{hunk}");
            assert!(hunk.contains("not done"), "{hunk}");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let mut sandbox = provision(&repo);
    replay_chapter(
        &listings,
        &mut sandbox,
        &settings(&["done"]),
        &ReplayOptions::default(),
    )
    .into_result()
    .expect("README change ignored");
}

#[test]
fn unknown_label_fails_at_its_listing() {
    if skip_if_git_missing() {
        return;
    }
    let repo = sample_project();
    let chapter = CHAPTER.replace("ref=ch01l002", "ref=ch01l099");
    let listings = classify_chapter(&chapter);
    let mut sandbox = provision(&repo);
    let err = replay_chapter(
        &listings,
        &mut sandbox,
        &settings(&[]),
        &ReplayOptions::default(),
    )
    .into_result()
    .expect_err("unknown label");
    match err {
        ReplayError::SandboxExecution { context, .. } => assert_eq!(context.position, 4),
        other => panic!("unexpected error: {other}"),
    }
}

const PATCH_CHAPTER: &str = indoc! {"
    ```python file=app.py ref=ch01l001
    print('hello')
    ```

    ```diff file=app.py
    --- a/app.py
    +++ b/app.py
    @@ -1 +1,2 @@
     print('hello')
    +print('world')
    ```

    ```text file=README
    done
    ```
"};

fn unskipped_settings() -> ChapterSettings {
    ChapterSettings {
        skips: Vec::new(),
        ..settings(&[])
    }
}

#[test]
fn diff_listing_is_applied_with_git() {
    if skip_if_git_missing() {
        return;
    }
    let repo = sample_project();
    let listings = classify_chapter(PATCH_CHAPTER);
    assert_eq!(listings.len(), 3);

    let mut sandbox = provision(&repo);
    let outcome = replay_chapter(
        &listings,
        &mut sandbox,
        &unskipped_settings(),
        &ReplayOptions::default(),
    );
    assert!(outcome.final_diff_clean);
    outcome.into_result().expect("patched chapter replays cleanly");
    assert_eq!(
        sandbox.read_file("app.py").expect("read app.py"),
        "print('hello')\nprint('world')\n"
    );
}

#[test]
fn stale_diff_listing_fails_at_its_listing() {
    if skip_if_git_missing() {
        return;
    }
    let repo = sample_project();
    let chapter = PATCH_CHAPTER.replace(" print('hello')\n+", " print('goodbye')\n+");
    let listings = classify_chapter(&chapter);
    let mut sandbox = provision(&repo);
    let err = replay_chapter(
        &listings,
        &mut sandbox,
        &unskipped_settings(),
        &ReplayOptions::default(),
    )
    .into_result()
    .expect_err("patch does not apply");
    match err {
        ReplayError::SandboxExecution { context, .. } => assert_eq!(context.position, 1),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn replaying_twice_in_fresh_sandboxes_is_clean_both_times() {
    if skip_if_git_missing() {
        return;
    }
    let repo = sample_project();
    let listings = classify_chapter(CHAPTER);
    let mut files = Vec::new();
    for _ in 0..2 {
        let mut sandbox = provision(&repo);
        let outcome = replay_chapter(
            &listings,
            &mut sandbox,
            &settings(&[]),
            &ReplayOptions::default(),
        );
        assert!(outcome.final_diff_clean);
        outcome.into_result().expect("chapter replays cleanly");
        assert!(sandbox.diff(&IgnoreSet::default()).expect("diff").is_none());
        files.push((
            sandbox.read_file("app.py").expect("read app.py"),
            sandbox.read_file("README").expect("read README"),
        ));
    }
    assert_eq!(files[0], files[1]);
}
