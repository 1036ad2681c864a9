use arrrg::CommandLine;
use arrrg_derive::CommandLine;

use galley::{
    cli_utils::{self, OutputFormat},
    commands::{
        handle_auth_command, handle_charter_command, handle_compute_plan_command,
        handle_connection_command, handle_engine_command, handle_project_command,
        handle_vessel_command,
    },
    http_utils,
};

#[derive(CommandLine, Default, PartialEq, Eq)]
struct Options {
    #[arrrg(optional, "Base URL of the Galley API server")]
    base_url: String,
    #[arrrg(optional, "Access token; defaults to $GALLEY_TOKEN")]
    token: String,
    #[arrrg(
        optional,
        "Output format for get/list commands: json or yaml (default: json)"
    )]
    output: OutputFormat,
}

const USAGE: &str = r#"Usage: galleyctl [options] <command> [args...]

Options:
  --base-url <url>     Base URL of the Galley API server (default: $GALLEY_URL or http://localhost:8080)
  --token <token>      Access token (default: $GALLEY_TOKEN)
  --output <format>    Output format for get/list commands: json or yaml (default: json)

Bodies are inline JSON or @path to a .json, .yaml or .yml file.

Commands:
  auth sign-in <email>                                Print a refresh token
  auth refresh <refresh-token>                        Rotate a refresh token
  auth access <refresh-token>                         Print an access token
  auth sign-out                                       Revoke every session
  vessel list                                         List your vessels
  vessel get <vessel>                                 Get a vessel
  vessel rename <vessel> <name>                       Rename a vessel
  charter create <vessel> <body>                      Create a charter
  charter list <vessel>                               List charters
  charter get <vessel> <charter>                      Get a charter
  charter update <vessel> <charter> <body>            Update a charter
  charter delete <vessel> <charter>                   Delete a charter
  project create <vessel> <charter> <body>            Create a project
  project list <vessel> <charter>                     List projects
  project get <vessel> <charter> <project>            Get a project
  project update <vessel> <charter> <project> <body>  Update a project
  project delete <vessel> <charter> <project>         Delete a project
  compute-plan create|list|get|update|delete ...      Same arguments as project
  connection create <vessel> <charter> <body>         Start an OAuth connection
  connection approve <vessel> <charter> <body>        Finish it with code and state
  connection list <vessel> <charter>                  List connections
  connection get <vessel> <charter> <connection>      Get a connection
  connection revoke <vessel> <charter> <connection>   Revoke a connection
  engine nodes <vessel> <engine>                      List the engine's nodes
  engine apply <vessel> <engine> <body>               Apply manifests through the agent"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (options, free) = Options::from_command_line_relaxed("USAGE: galleyctl <command> [args...]");

    if free.is_empty() {
        cli_utils::exit_with_usage_error("No command specified", USAGE);
    }

    let base_url = if options.base_url.is_empty() {
        std::env::var("GALLEY_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
    } else {
        options.base_url
    };
    let token = if options.token.is_empty() {
        std::env::var("GALLEY_TOKEN").ok().filter(|t| !t.is_empty())
    } else {
        Some(options.token)
    };

    let client = http_utils::GalleyClient::new(base_url, token);

    match free[0].as_str() {
        "auth" => handle_auth_command(&free[1..], &client, options.output).await,
        "vessel" => handle_vessel_command(&free[1..], &client, options.output).await,
        "charter" => handle_charter_command(&free[1..], &client, options.output).await,
        "project" => handle_project_command(&free[1..], &client, options.output).await,
        "compute-plan" => {
            handle_compute_plan_command(&free[1..], &client, options.output).await
        }
        "connection" => handle_connection_command(&free[1..], &client, options.output).await,
        "engine" => handle_engine_command(&free[1..], &client, options.output).await,
        "help" => println!("{}", USAGE),
        _ => {
            cli_utils::exit_with_error(&format!(
                "Unknown command '{}'. Available commands: auth, vessel, charter, project, compute-plan, connection, engine",
                free[0]
            ));
        }
    }

    Ok(())
}
