use super::shared::{format_interval, format_time};
use super::watch_cmd::stop_on;
use super::*;
use notifier_core::config::IntervalDefaults;
use tempfile::TempDir;

fn svn_checkout(root: &Path, name: &str) -> PathBuf {
    let path = root.join(name);
    std::fs::create_dir_all(path.join(".svn")).unwrap();
    path
}

#[test]
fn add_parses_negative_intervals() {
    let cli = Cli::try_parse_from([
        "scm-notifier",
        "add",
        "/work/trunk",
        "--active",
        "-1",
        "--idle",
        "900",
        "--disabled",
    ])
    .unwrap();
    match cli.command {
        Commands::Add(args) => {
            assert_eq!(args.path, PathBuf::from("/work/trunk"));
            assert_eq!(args.active, Some(-1));
            assert_eq!(args.idle, Some(900));
            assert!(args.disabled);
        }
        _ => panic!("expected add command"),
    }
}

#[test]
fn global_config_flag_after_subcommand() {
    let cli = Cli::try_parse_from(["scm-notifier", "list", "--config", "/tmp/c.json"]).unwrap();
    assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.json")));
    assert!(matches!(cli.command, Commands::List));
}

#[test]
fn update_all_and_watch_idle_parse() {
    let cli = Cli::try_parse_from(["scm-notifier", "update", "2", "--all"]).unwrap();
    match cli.command {
        Commands::Update(args) => {
            assert_eq!(args.index, 2);
            assert!(args.all);
        }
        _ => panic!("expected update command"),
    }

    let cli = Cli::try_parse_from(["scm-notifier", "watch", "--idle"]).unwrap();
    match cli.command {
        Commands::Watch(args) => {
            assert!(args.idle);
            assert!(args.lock.is_none());
        }
        _ => panic!("expected watch command"),
    }
}

#[test]
fn check_index_is_optional() {
    let cli = Cli::try_parse_from(["scm-notifier", "check"]).unwrap();
    assert!(matches!(cli.command, Commands::Check(CheckArgs { index: None })));
    let cli = Cli::try_parse_from(["scm-notifier", "errors", "--limit", "5"]).unwrap();
    match cli.command {
        Commands::Errors(args) => assert_eq!(args.limit, 5),
        _ => panic!("expected errors command"),
    }
}

#[test]
fn index_commands_require_index() {
    assert!(Cli::try_parse_from(["scm-notifier", "remove"]).is_err());
    assert!(Cli::try_parse_from(["scm-notifier", "changelog", "x"]).is_err());
}

#[test]
fn add_persists_record_once() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("config.json");
    let checkout = svn_checkout(tmp.path(), "trunk");
    let args = || AddArgs {
        path: checkout.clone(),
        active: Some(30),
        idle: None,
        disabled: false,
    };

    handle_add(&config_path, args()).unwrap();
    handle_add(&config_path, args()).unwrap();

    let config = AppConfig::load(&config_path).unwrap();
    assert_eq!(
        config.repositories,
        vec![format!("SVN|{}|30|-1|False|0", checkout.display())]
    );
}

#[test]
fn add_rejects_plain_directory() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("config.json");
    let plain = tmp.path().join("plain");
    std::fs::create_dir(&plain).unwrap();
    let err = handle_add(
        &config_path,
        AddArgs {
            path: plain,
            active: None,
            idle: None,
            disabled: false,
        },
    )
    .unwrap_err();
    assert!(err.to_string().contains("not an SVN working copy"));
    assert!(!config_path.exists());
}

#[test]
fn disable_and_remove_rewrite_config() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("config.json");
    for name in ["one", "two"] {
        let args = AddArgs {
            path: svn_checkout(tmp.path(), name),
            active: None,
            idle: None,
            disabled: false,
        };
        handle_add(&config_path, args).unwrap();
    }

    handle_set_disabled(&config_path, 1, true).unwrap();
    let workspace = Workspace::load(&config_path).unwrap();
    assert!(!workspace.repository(0).unwrap().is_disabled());
    assert!(workspace.repository(1).unwrap().is_disabled());

    handle_remove(&config_path, 0).unwrap();
    let workspace = Workspace::load(&config_path).unwrap();
    assert_eq!(workspace.registry.len(), 1);
    assert!(workspace.repository(0).unwrap().path().ends_with("two"));
    assert!(handle_remove(&config_path, 5).is_err());
}

#[test]
fn errors_on_empty_log_dir() {
    let tmp = TempDir::new().unwrap();
    handle_errors(ErrorsArgs {
        limit: 10,
        dir: Some(tmp.path().join("errors")),
    })
    .unwrap();
}

#[test]
fn formatting_helpers() {
    assert_eq!(format_interval(-1), "default");
    assert_eq!(format_interval(45), "45s");
    assert_eq!(format_time(std::time::UNIX_EPOCH), "never");
    assert!(format_time(std::time::SystemTime::now()).contains('T'));
}

#[test]
fn check_all_skips_disabled_entries() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("config.json");
    let args = AddArgs {
        path: svn_checkout(tmp.path(), "paused"),
        active: None,
        idle: None,
        disabled: true,
    };
    handle_add(&config_path, args).unwrap();

    let workspace = Workspace::load(&config_path).unwrap();
    assert!(workspace.select(None).unwrap().is_empty());
    assert_eq!(workspace.select(Some(0)).unwrap().len(), 1);
    assert!(workspace.select(Some(1)).is_err());
    handle_check(&config_path, None).unwrap();
}

#[test]
fn interrupt_stops_status_loop() {
    let status_loop = StatusLoop::new(
        Arc::new(RepositoryRegistry::new()),
        ProcessRunner::new(Arc::new(ErrorChannel::new())),
        AppConfig::default().tools,
        IntervalDefaults::default(),
        1,
    );
    let listener = stop_on(async { Ok::<(), std::io::Error>(()) }, status_loop.handle()).unwrap();

    assert_eq!(status_loop.run(true), LoopExit::Stopped);
    listener.join().unwrap();
}
