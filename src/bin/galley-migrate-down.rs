//! Reverts the most recent Galley database migration.

use arrrg::CommandLine;
use arrrg_derive::CommandLine;

#[derive(CommandLine, Default, PartialEq, Eq)]
struct Options {
    #[arrrg(required, "PostgreSQL database URL")]
    database_url: String,
}

const USAGE: &str = r#"Usage: galley-migrate-down --database-url <URL>

Revert the most recent Galley database migration.

Arguments:
  --database-url <URL>    PostgreSQL database connection URL"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (options, free) = Options::from_command_line(USAGE);

    if !free.is_empty() {
        eprintln!("Error: Unexpected arguments: {:?}", free);
        eprintln!();
        eprintln!("{}", USAGE);
        std::process::exit(1);
    }

    let pool = sqlx::PgPool::connect(&options.database_url).await?;

    println!("Reverting most recent migration...");
    sqlx::migrate!("./migrations").undo(&pool, 1).await?;
    println!("Migration reverted successfully!");

    Ok(())
}
