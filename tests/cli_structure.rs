use clap::Parser;
use orchestrator::cli::{Cli, Commands};

#[test]
fn test_cli_help() {
    let result = Cli::try_parse_from(vec!["orchd", "--help"]);
    assert!(result.is_err()); // --help causes early exit with error
}

#[test]
fn test_cli_version() {
    let result = Cli::try_parse_from(vec!["orchd", "--version"]);
    assert!(result.is_err()); // --version causes early exit with error
}

// ============================================================================
// Subcommand parsing
// ============================================================================

#[test]
fn test_run_command() {
    let cli = Cli::try_parse_from(vec!["orchd", "run"]).unwrap();
    assert!(matches!(cli.command, Commands::Run));
}

#[test]
fn test_validate_command() {
    let cli = Cli::try_parse_from(vec!["orchd", "validate"]).unwrap();
    assert!(matches!(cli.command, Commands::Validate));
}

#[test]
fn test_status_command_default_url() {
    let cli = Cli::try_parse_from(vec!["orchd", "status"]).unwrap();
    match cli.command {
        Commands::Status { url } => assert_eq!(url, "http://127.0.0.1:8080"),
        _ => panic!("wrong command"),
    }
}

#[test]
fn test_status_command_custom_url() {
    let cli = Cli::try_parse_from(vec!["orchd", "status", "--url", "http://10.0.0.5:9090"]).unwrap();
    match cli.command {
        Commands::Status { url } => assert_eq!(url, "http://10.0.0.5:9090"),
        _ => panic!("wrong command"),
    }
}

// ============================================================================
// Error cases
// ============================================================================

#[test]
fn test_invalid_command() {
    let result = Cli::try_parse_from(vec!["orchd", "nonexistent"]);
    assert!(result.is_err());
}

#[test]
fn test_missing_command() {
    let result = Cli::try_parse_from(vec!["orchd"]);
    assert!(result.is_err());
}
