//! Tests for add, list, show, start, cancel, retry, remove.

use super::parse;
use crate::cli::CliCommand;

#[test]
fn cli_parse_add_defaults() {
    match parse(&["vgen", "add", "a sunset over the sea"]) {
        CliCommand::Add {
            prompt,
            duration,
            ratio,
            image,
            start,
        } => {
            assert_eq!(prompt, "a sunset over the sea");
            assert_eq!(duration, 5);
            assert_eq!(ratio, "16:9");
            assert!(image.is_none());
            assert!(!start);
        }
        _ => panic!("expected Add"),
    }
}

#[test]
fn cli_parse_add_with_options() {
    match parse(&[
        "vgen",
        "add",
        "portrait clip",
        "--duration",
        "10",
        "--ratio",
        "9:16",
        "--image",
        "/tmp/ref.png",
        "--start",
    ]) {
        CliCommand::Add {
            prompt,
            duration,
            ratio,
            image,
            start,
        } => {
            assert_eq!(prompt, "portrait clip");
            assert_eq!(duration, 10);
            assert_eq!(ratio, "9:16");
            assert_eq!(image.as_deref(), Some(std::path::Path::new("/tmp/ref.png")));
            assert!(start);
        }
        _ => panic!("expected Add with options"),
    }
}

#[test]
fn cli_parse_list() {
    match parse(&["vgen", "list"]) {
        CliCommand::List {
            category,
            skip,
            limit,
        } => {
            assert!(category.is_none());
            assert_eq!(skip, 0);
            assert_eq!(limit, 50);
        }
        _ => panic!("expected List"),
    }

    match parse(&["vgen", "list", "--category", "history", "--skip", "10", "--limit", "5"]) {
        CliCommand::List {
            category,
            skip,
            limit,
        } => {
            assert_eq!(category.as_deref(), Some("history"));
            assert_eq!(skip, 10);
            assert_eq!(limit, 5);
        }
        _ => panic!("expected List with filters"),
    }
}

#[test]
fn cli_parse_show() {
    match parse(&["vgen", "show", "42"]) {
        CliCommand::Show { id } => assert_eq!(id, 42),
        _ => panic!("expected Show"),
    }
}

#[test]
fn cli_parse_start_multiple_ids() {
    match parse(&["vgen", "start", "1", "2", "3"]) {
        CliCommand::Start { ids } => assert_eq!(ids, vec![1, 2, 3]),
        _ => panic!("expected Start"),
    }
}

#[test]
fn cli_parse_cancel() {
    match parse(&["vgen", "cancel", "7"]) {
        CliCommand::Cancel { ids } => assert_eq!(ids, vec![7]),
        _ => panic!("expected Cancel"),
    }
}

#[test]
fn cli_parse_retry_with_stage() {
    match parse(&["vgen", "retry", "9", "--stage", "download"]) {
        CliCommand::Retry { ids, stage } => {
            assert_eq!(ids, vec![9]);
            assert_eq!(stage.as_deref(), Some("download"));
        }
        _ => panic!("expected Retry with --stage"),
    }
}

#[test]
fn cli_parse_remove() {
    match parse(&["vgen", "remove", "4", "5"]) {
        CliCommand::Remove { ids } => assert_eq!(ids, vec![4, 5]),
        _ => panic!("expected Remove"),
    }
}
